//! Contract-spec cache in front of the adapter.
//!
//! Specs are immutable on the exchange side, so each instrument is fetched
//! once and kept for the process lifetime.

use crate::error::{EngineError, EngineResult};
use dashmap::DashMap;
use std::time::Duration;
use tidemark_core::ContractSpec;
use tidemark_exchange::{with_retry, DynExchange, DEFAULT_BACKOFF};
use tracing::debug;

pub struct SpecCache {
    adapter: DynExchange,
    specs: DashMap<String, ContractSpec>,
    timeout: Duration,
}

impl SpecCache {
    pub fn new(adapter: DynExchange, timeout: Duration) -> Self {
        Self {
            adapter,
            specs: DashMap::new(),
            timeout,
        }
    }

    /// Cached spec for the symbol, fetching it on first use.
    pub async fn get(&self, symbol: &str) -> EngineResult<ContractSpec> {
        if let Some(spec) = self.specs.get(symbol) {
            return Ok(spec.clone());
        }

        let spec = with_retry("get_contract_spec", &DEFAULT_BACKOFF, || async {
            match tokio::time::timeout(self.timeout, self.adapter.get_contract_spec(symbol)).await
            {
                Ok(result) => result,
                Err(_) => Err(tidemark_exchange::ExchangeError::Timeout),
            }
        })
        .await
        .map_err(EngineError::from_exchange)?;

        debug!(symbol, contract_size = %spec.contract_size, "contract spec cached");
        self.specs.insert(symbol.to_string(), spec.clone());
        Ok(spec)
    }
}
