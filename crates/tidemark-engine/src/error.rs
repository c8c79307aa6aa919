//! Error types for tidemark-engine.

use thiserror::Error;
use tidemark_exchange::ExchangeError;
use tidemark_store::StoreError;

/// Engine error types. These are the error kinds visible at the core's edge
/// for position operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("No open position for {0}")]
    NoSuchPosition(String),

    #[error("A position is already open for {0}")]
    PositionExists(String),

    #[error("{0} is reconciling with the exchange, try again later")]
    Reconciling(String),

    #[error("Another operation is in flight for {0}")]
    Busy(String),

    #[error("Order size too small: {0}")]
    SizeTooSmall(String),

    #[error("Entry price cap exceeded: {0}")]
    EntryCapExceeded(String),

    #[error("Price unavailable for {0}")]
    PriceUnavailable(String),

    #[error("Adapter call timed out")]
    AdapterTimeout,

    #[error("Adapter error: {0}")]
    AdapterError(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Map a terminal adapter error onto the engine taxonomy.
    pub fn from_exchange(err: ExchangeError) -> Self {
        match err {
            ExchangeError::Timeout => Self::AdapterTimeout,
            other => Self::AdapterError(other.to_string()),
        }
    }
}

/// Result type alias for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;
