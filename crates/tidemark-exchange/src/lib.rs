//! Exchange adapter contract for the tidemark executor.
//!
//! The live REST/WebSocket adapter for a particular venue lives outside this
//! workspace; this crate holds the contract it must satisfy plus two
//! in-process implementations:
//! - `PaperExchange`: a deterministic fill engine for dry runs and
//!   integration tests
//! - `MockExchange`: a recording mock with scriptable results for unit tests

pub mod adapter;
pub mod error;
pub mod mock;
pub mod paper;
pub mod retry;

pub use adapter::{
    BoxFuture, DynExchange, ExchangeAdapter, ExchangePosition, OrderReport, OrderRequest,
    OrderSide, OrderStatus, PriceCallback,
};
pub use error::{ExchangeError, ExchangeResult};
pub use mock::{MockExchange, RecordedCall};
pub use paper::PaperExchange;
pub use retry::{with_retry, DEFAULT_BACKOFF};
