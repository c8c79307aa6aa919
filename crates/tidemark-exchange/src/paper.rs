//! Deterministic in-process exchange for dry runs and integration tests.
//!
//! Fills every order immediately and fully at the limit price (when given)
//! or the current mark price. Honors client order ids: replaying an id
//! returns the original report without touching the book again.

use crate::adapter::{
    BoxFuture, ExchangeAdapter, ExchangePosition, OrderReport, OrderRequest, OrderSide,
    OrderStatus, PriceCallback,
};
use crate::error::{ExchangeError, ExchangeResult};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::prelude::Signed;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tidemark_core::{ContractSpec, Price};
use tracing::debug;

/// Paper-trading adapter.
pub struct PaperExchange {
    specs: DashMap<String, ContractSpec>,
    marks: DashMap<String, Price>,
    leverage: DashMap<String, u32>,
    /// Exchange-side book: symbol -> signed position.
    book: DashMap<String, ExchangePosition>,
    /// Client order id -> original report, for replay deduplication.
    seen: DashMap<String, OrderReport>,
    subscribers: Mutex<Vec<(HashSet<String>, PriceCallback)>>,
    next_order_id: AtomicU64,
}

impl Default for PaperExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl PaperExchange {
    pub fn new() -> Self {
        Self {
            specs: DashMap::new(),
            marks: DashMap::new(),
            leverage: DashMap::new(),
            book: DashMap::new(),
            seen: DashMap::new(),
            subscribers: Mutex::new(Vec::new()),
            next_order_id: AtomicU64::new(1),
        }
    }

    /// Register an instrument with its starting mark price.
    pub fn with_instrument(self, spec: ContractSpec, mark: Price) -> Self {
        self.marks.insert(spec.symbol.clone(), mark);
        self.specs.insert(spec.symbol.clone(), spec);
        self
    }

    /// Update the mark price and notify subscribers, like a live tick.
    pub fn set_mark(&self, symbol: &str, price: Price) {
        self.marks.insert(symbol.to_string(), price);
        let now = Utc::now();
        let subscribers = self.subscribers.lock();
        for (symbols, callback) in subscribers.iter() {
            if symbols.contains(symbol) {
                callback(symbol, price, now);
            }
        }
    }

    /// Leverage last configured for a symbol, if any.
    pub fn leverage_for(&self, symbol: &str) -> Option<u32> {
        self.leverage.get(symbol).map(|r| *r)
    }

    /// Number of orders actually applied to the book (replays excluded).
    pub fn order_count(&self) -> u64 {
        self.next_order_id.load(Ordering::SeqCst) - 1
    }

    fn fill(&self, request: &OrderRequest) -> ExchangeResult<OrderReport> {
        if !self.specs.contains_key(&request.symbol) {
            return Err(ExchangeError::UnknownInstrument(request.symbol.clone()));
        }
        let fill_price = match request.price {
            Some(limit) => limit,
            None => self
                .marks
                .get(&request.symbol)
                .map(|r| *r)
                .ok_or_else(|| ExchangeError::UnknownInstrument(request.symbol.clone()))?,
        };

        let delta = match request.side {
            OrderSide::Buy => request.contracts,
            OrderSide::Sell => -request.contracts,
        };

        let mut entry = self
            .book
            .entry(request.symbol.clone())
            .or_insert_with(|| ExchangePosition {
                symbol: request.symbol.clone(),
                quantity: Decimal::ZERO,
                avg_price: fill_price,
                leverage: self.leverage_for(&request.symbol).unwrap_or(1),
            });
        let before = entry.quantity;
        entry.quantity += delta;
        // Opening or flipping resets the average entry; reductions keep it.
        if before.is_zero() || before.signum() != entry.quantity.signum() {
            entry.avg_price = fill_price;
        }
        let now_flat = entry.quantity.is_zero();
        drop(entry);
        if now_flat {
            self.book.remove(&request.symbol);
        }

        let id = self.next_order_id.fetch_add(1, Ordering::SeqCst);
        debug!(
            symbol = %request.symbol,
            side = request.side.as_str(),
            contracts = %request.contracts,
            price = %fill_price,
            "paper fill"
        );

        Ok(OrderReport {
            order_id: format!("paper-{id}"),
            client_order_id: request.client_order_id.clone(),
            filled_contracts: request.contracts,
            avg_fill_price: fill_price,
            status: OrderStatus::Filled,
        })
    }
}

impl ExchangeAdapter for PaperExchange {
    fn get_contract_spec(&self, symbol: &str) -> BoxFuture<'_, ExchangeResult<ContractSpec>> {
        let result = self
            .specs
            .get(symbol)
            .map(|r| r.clone())
            .ok_or_else(|| ExchangeError::UnknownInstrument(symbol.to_string()));
        Box::pin(async move { result })
    }

    fn set_leverage(&self, symbol: &str, leverage: u32) -> BoxFuture<'_, ExchangeResult<()>> {
        self.leverage.insert(symbol.to_string(), leverage);
        Box::pin(async move { Ok(()) })
    }

    fn place_order(&self, request: OrderRequest) -> BoxFuture<'_, ExchangeResult<OrderReport>> {
        // Replay with a known client id returns the original report.
        let result = match self.seen.get(&request.client_order_id) {
            Some(previous) => Ok(previous.clone()),
            None => {
                let report = self.fill(&request);
                if let Ok(ref r) = report {
                    self.seen.insert(request.client_order_id.clone(), r.clone());
                }
                report
            }
        };
        Box::pin(async move { result })
    }

    fn get_mark_price(&self, symbol: &str) -> BoxFuture<'_, ExchangeResult<Price>> {
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
        on_update: PriceCallback,
    ) -> BoxFuture<'_, ExchangeResult<()>> {
        self.subscribers
            .lock()
            .push((symbols.into_iter().collect(), on_update));
        Box::pin(async move { Ok(()) })
    }

    fn get_positions(&self) -> BoxFuture<'_, ExchangeResult<Vec<ExchangePosition>>> {
        let positions: Vec<ExchangePosition> =
            self.book.iter().map(|r| r.value().clone()).collect();
        Box::pin(async move { Ok(positions) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn btc_spec() -> ContractSpec {
        ContractSpec {
            symbol: "BTC-USDT-SWAP".to_string(),
            contract_size: dec!(0.01),
            price_precision: 1,
            size_precision: 0,
            min_size: dec!(1),
        }
    }

    fn buy_one(client_order_id: &str) -> OrderRequest {
        OrderRequest {
            symbol: "BTC-USDT-SWAP".to_string(),
            side: OrderSide::Buy,
            pos_side: tidemark_core::Direction::Long,
            contracts: dec!(1),
            price: None,
            client_order_id: client_order_id.to_string(),
            reduce_only: false,
        }
    }

    #[tokio::test]
    async fn test_market_order_fills_at_mark() {
        let paper = PaperExchange::new().with_instrument(btc_spec(), Price::new(dec!(50000)));

        let report = paper.place_order(buy_one("c-1")).await.unwrap();
        assert_eq!(report.status, OrderStatus::Filled);
        assert_eq!(report.avg_fill_price, Price::new(dec!(50000)));

        let positions = paper.get_positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].quantity, dec!(1));
    }

    #[tokio::test]
    async fn test_replayed_client_id_does_not_double_fill() {
        let paper = PaperExchange::new().with_instrument(btc_spec(), Price::new(dec!(50000)));

        let first = paper.place_order(buy_one("c-1")).await.unwrap();
        let second = paper.place_order(buy_one("c-1")).await.unwrap();

        assert_eq!(first, second);
        let positions = paper.get_positions().await.unwrap();
        assert_eq!(positions[0].quantity, dec!(1));
    }

    #[tokio::test]
    async fn test_reduce_to_flat_removes_position() {
        let paper = PaperExchange::new().with_instrument(btc_spec(), Price::new(dec!(50000)));
        paper.place_order(buy_one("c-1")).await.unwrap();

        let mut sell = buy_one("c-2");
        sell.side = OrderSide::Sell;
        sell.reduce_only = true;
        paper.place_order(sell).await.unwrap();

        assert!(paper.get_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_mark_notifies_subscribers() {
        let paper = PaperExchange::new().with_instrument(btc_spec(), Price::new(dec!(50000)));

        let seen: Arc<parking_lot::Mutex<Vec<Price>>> =
            Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: PriceCallback = Arc::new(move |_symbol, price, _ts| {
            sink.lock().push(price);
        });

        paper
            .subscribe_mark_price(vec!["BTC-USDT-SWAP".to_string()], callback)
            .await
            .unwrap();
        paper.set_mark("BTC-USDT-SWAP", Price::new(dec!(51000)));
        paper.set_mark("ETH-USDT-SWAP", Price::new(dec!(2000)));

        let ticks = seen.lock();
        assert_eq!(ticks.as_slice(), &[Price::new(dec!(51000))]);
    }

    #[tokio::test]
    async fn test_unknown_instrument_is_rejected() {
        let paper = PaperExchange::new();
        let result = paper.place_order(buy_one("c-1")).await;
        assert!(matches!(result, Err(ExchangeError::UnknownInstrument(_))));
    }
}
