//! Recording mock adapter with scriptable results for unit tests.
//!
//! By default behaves like a thin paper exchange (fills at limit or mark);
//! tests can queue explicit results per call to exercise failure paths
//! (rejections, transport errors, timeouts).

use crate::adapter::{
    BoxFuture, ExchangeAdapter, ExchangePosition, OrderReport, OrderRequest, OrderStatus,
    PriceCallback,
};
use crate::error::{ExchangeError, ExchangeResult};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tidemark_core::{ContractSpec, Price};

/// A call observed by the mock, for assertions.
#[derive(Debug, Clone)]
pub enum RecordedCall {
    ContractSpec(String),
    SetLeverage { symbol: String, leverage: u32 },
    PlaceOrder(OrderRequest),
    MarkPrice(String),
    Subscribe(Vec<String>),
    Positions,
}

/// Scriptable mock exchange.
pub struct MockExchange {
    calls: Mutex<Vec<RecordedCall>>,
    specs: DashMap<String, ContractSpec>,
    marks: DashMap<String, Price>,
    /// Queued results consumed by successive `place_order` calls.
    place_results: Mutex<VecDeque<ExchangeResult<OrderReport>>>,
    /// Queued results consumed by successive `get_positions` calls.
    positions_results: Mutex<VecDeque<ExchangeResult<Vec<ExchangePosition>>>>,
    /// Default `get_positions` response when the queue is empty.
    positions: Mutex<Vec<ExchangePosition>>,
    next_order_id: AtomicU64,
}

impl Default for MockExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl MockExchange {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            specs: DashMap::new(),
            marks: DashMap::new(),
            place_results: Mutex::new(VecDeque::new()),
            positions_results: Mutex::new(VecDeque::new()),
            positions: Mutex::new(Vec::new()),
            next_order_id: AtomicU64::new(1),
        }
    }

    pub fn with_instrument(self, spec: ContractSpec, mark: Price) -> Self {
        self.marks.insert(spec.symbol.clone(), mark);
        self.specs.insert(spec.symbol.clone(), spec);
        self
    }

    pub fn set_mark(&self, symbol: &str, price: Price) {
        self.marks.insert(symbol.to_string(), price);
    }

    /// Queue an explicit result for the next `place_order` call.
    pub fn push_place_result(&self, result: ExchangeResult<OrderReport>) {
        self.place_results.lock().push_back(result);
    }

    /// Queue an explicit result for the next `get_positions` call.
    pub fn push_positions_result(&self, result: ExchangeResult<Vec<ExchangePosition>>) {
        self.positions_results.lock().push_back(result);
    }

    /// Set the default `get_positions` response.
    pub fn set_positions(&self, positions: Vec<ExchangePosition>) {
        *self.positions.lock() = positions;
    }

    /// Snapshot of all recorded calls.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Count of `place_order` calls observed.
    pub fn place_order_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, RecordedCall::PlaceOrder(_)))
            .count()
    }

    fn default_fill(&self, request: &OrderRequest) -> ExchangeResult<OrderReport> {
        let fill_price = match request.price {
            Some(limit) => limit,
            None => self
                .marks
                .get(&request.symbol)
                .map(|r| *r)
                .ok_or_else(|| ExchangeError::UnknownInstrument(request.symbol.clone()))?,
        };
        let id = self.next_order_id.fetch_add(1, Ordering::SeqCst);
        Ok(OrderReport {
            order_id: format!("mock-{id}"),
            client_order_id: request.client_order_id.clone(),
            filled_contracts: request.contracts,
            avg_fill_price: fill_price,
            status: OrderStatus::Filled,
        })
    }
}

impl ExchangeAdapter for MockExchange {
    fn get_contract_spec(&self, symbol: &str) -> BoxFuture<'_, ExchangeResult<ContractSpec>> {
        self.calls
            .lock()
            .push(RecordedCall::ContractSpec(symbol.to_string()));
        let result = self
            .specs
            .get(symbol)
            .map(|r| r.clone())
            .ok_or_else(|| ExchangeError::UnknownInstrument(symbol.to_string()));
        Box::pin(async move { result })
    }

    fn set_leverage(&self, symbol: &str, leverage: u32) -> BoxFuture<'_, ExchangeResult<()>> {
        self.calls.lock().push(RecordedCall::SetLeverage {
            symbol: symbol.to_string(),
            leverage,
        });
        Box::pin(async move { Ok(()) })
    }

    fn place_order(&self, request: OrderRequest) -> BoxFuture<'_, ExchangeResult<OrderReport>> {
        self.calls
            .lock()
            .push(RecordedCall::PlaceOrder(request.clone()));
        let result = match self.place_results.lock().pop_front() {
            Some(scripted) => scripted,
            None => self.default_fill(&request),
        };
        Box::pin(async move { result })
    }

    fn get_mark_price(&self, symbol: &str) -> BoxFuture<'_, ExchangeResult<Price>> {
        self.calls
            .lock()
            .push(RecordedCall::MarkPrice(symbol.to_string()));
        let result = self
            .marks
            .get(symbol)
            .map(|r| *r)
            .ok_or_else(|| ExchangeError::UnknownInstrument(symbol.to_string()));
        Box::pin(async move { result })
    }

    fn subscribe_mark_price(
        &self,
        symbols: Vec<String>,
        _on_update: PriceCallback,
    ) -> BoxFuture<'_, ExchangeResult<()>> {
        self.calls.lock().push(RecordedCall::Subscribe(symbols));
        Box::pin(async move { Ok(()) })
    }

    fn get_positions(&self) -> BoxFuture<'_, ExchangeResult<Vec<ExchangePosition>>> {
        self.calls.lock().push(RecordedCall::Positions);
        let result = match self.positions_results.lock().pop_front() {
            Some(scripted) => scripted,
            None => Ok(self.positions.lock().clone()),
        };
        Box::pin(async move { result })
    }
}
