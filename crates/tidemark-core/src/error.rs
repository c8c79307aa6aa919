//! Error types for tidemark-core.

use thiserror::Error;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid signal: {0}")]
    InvalidSignal(String),

    #[error("Invalid direction: {0}")]
    InvalidDirection(String),

    #[error("Invalid close reason: {0}")]
    InvalidCloseReason(String),

    #[error("Invalid position status: {0}")]
    InvalidStatus(String),

    #[error("Decimal parse error: {0}")]
    DecimalParse(#[from] rust_decimal::Error),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
