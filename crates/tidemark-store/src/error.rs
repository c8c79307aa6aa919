//! Error types for tidemark-store.

use thiserror::Error;
use tidemark_core::CoreError;

/// Store error types.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
