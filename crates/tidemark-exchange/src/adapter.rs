//! The exchange adapter trait and its wire types.
//!
//! The trait is dyn-compatible via a boxed-future alias so that the engine
//! can hold `Arc<dyn ExchangeAdapter>` and tests can substitute mocks.

use crate::error::ExchangeResult;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use tidemark_core::{ContractSpec, Direction, Price};

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Callback invoked by the adapter's mark-price subscription, once per tick.
pub type PriceCallback = Arc<dyn Fn(&str, Price, DateTime<Utc>) + Send + Sync>;

/// Order side on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// The side that opens a position in `direction`.
    pub fn opening(direction: Direction) -> Self {
        match direction {
            Direction::Long => Self::Buy,
            Direction::Short => Self::Sell,
        }
    }

    /// The side that reduces a position in `direction`.
    pub fn reducing(direction: Direction) -> Self {
        match direction {
            Direction::Long => Self::Sell,
            Direction::Short => Self::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

/// An order submitted to the adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    /// Position side the order acts on (hedge-mode exchanges require it).
    pub pos_side: Direction,
    /// Whole contracts.
    pub contracts: Decimal,
    /// Limit price; `None` = market.
    pub price: Option<Price>,
    /// Client-generated id; the adapter is assumed to honor it for
    /// deduplication, so a replay never places a second order.
    pub client_order_id: String,
    /// Reduce-only flag for closes and ladder tranches.
    pub reduce_only: bool,
}

/// Terminal state of an order as reported by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Filled,
    PartiallyFilled,
    Canceled,
    Pending,
}

/// Fill report returned by `place_order`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderReport {
    /// Adapter-issued order / fill identifier.
    pub order_id: String,
    pub client_order_id: String,
    pub filled_contracts: Decimal,
    pub avg_fill_price: Price,
    pub status: OrderStatus,
}

/// One exchange-side position, as returned by `get_positions`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangePosition {
    pub symbol: String,
    /// Signed contracts: positive = long, negative = short.
    pub quantity: Decimal,
    pub avg_price: Price,
    pub leverage: u32,
}

/// The contract every exchange adapter must satisfy.
///
/// Calls are expected to be bounded in time by the caller; the adapter
/// itself may also fail with `ExchangeError::Timeout`.
pub trait ExchangeAdapter: Send + Sync {
    /// Fetch the immutable contract attributes for a symbol.
    fn get_contract_spec(&self, symbol: &str) -> BoxFuture<'_, ExchangeResult<ContractSpec>>;

    /// Configure leverage for a symbol. Idempotent.
    fn set_leverage(&self, symbol: &str, leverage: u32) -> BoxFuture<'_, ExchangeResult<()>>;

    /// Place an order and report its terminal fill/cancel state.
    fn place_order(&self, request: OrderRequest) -> BoxFuture<'_, ExchangeResult<OrderReport>>;

    /// Snapshot the current mark price.
    fn get_mark_price(&self, symbol: &str) -> BoxFuture<'_, ExchangeResult<Price>>;

    /// Subscribe to mark-price ticks for the symbols; `on_update` is invoked
    /// per tick with `(symbol, price, timestamp)`.
    fn subscribe_mark_price(
        &self,
        symbols: Vec<String>,
        on_update: PriceCallback,
    ) -> BoxFuture<'_, ExchangeResult<()>>;

    /// List all exchange-side positions, for reconciliation.
    fn get_positions(&self) -> BoxFuture<'_, ExchangeResult<Vec<ExchangePosition>>>;
}

/// Arc wrapper for adapter trait objects.
pub type DynExchange = Arc<dyn ExchangeAdapter>;
