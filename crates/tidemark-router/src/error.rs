//! Error types for tidemark-router.
//!
//! These are exactly the error kinds that may cross the core's boundary;
//! everything recoverable stays inside the components.

use thiserror::Error;
use tidemark_engine::EngineError;
use tidemark_risk::RiskError;

/// Router error types.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("Invalid signal: {0}")]
    InvalidSignal(String),

    #[error("Symbol not in the allowed pool: {0}")]
    SymbolNotAllowed(String),

    #[error(transparent)]
    RiskGate(#[from] RiskError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Result type alias for router operations.
pub type RouterResult<T> = std::result::Result<T, RouterError>;
