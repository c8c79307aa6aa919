//! Error types for the bot binary.

use thiserror::Error;

/// Application-level errors.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Store(#[from] tidemark_store::StoreError),

    #[error(transparent)]
    Engine(#[from] tidemark_engine::EngineError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for application operations.
pub type AppResult<T> = std::result::Result<T, AppError>;
