//! Per-instrument contract attributes.
//!
//! Fetched once per instrument from the exchange adapter and cached for the
//! process lifetime; the attributes are immutable on the exchange side.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Contract specification for a perpetual-swap instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractSpec {
    /// Instrument identifier, e.g. `BTC-USDT-SWAP`.
    pub symbol: String,
    /// Base-currency units represented by one contract.
    pub contract_size: Decimal,
    /// Decimal places of the quoted price.
    pub price_precision: u32,
    /// Decimal places of the order size field.
    pub size_precision: u32,
    /// Minimum order size in contracts.
    pub min_size: Decimal,
}

impl ContractSpec {
    /// Quote-currency value of one contract at the given price.
    pub fn contract_value(&self, price: Decimal) -> Decimal {
        self.contract_size * price
    }
}
