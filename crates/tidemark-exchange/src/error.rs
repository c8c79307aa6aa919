//! Error types for tidemark-exchange.

use thiserror::Error;

/// Adapter-facing error types.
#[derive(Debug, Clone, Error)]
pub enum ExchangeError {
    /// The call did not complete within its bounded timeout.
    #[error("Adapter call timed out")]
    Timeout,

    /// Transport-level failure (connection drop, 5xx, malformed response).
    #[error("Adapter transport error: {0}")]
    Transport(String),

    /// The exchange rejected the request.
    #[error("Order rejected: {0}")]
    Rejected(String),

    /// No contract spec exists for the symbol.
    #[error("Unknown instrument: {0}")]
    UnknownInstrument(String),
}

impl ExchangeError {
    /// Whether retrying the same call may succeed.
    ///
    /// Rejections and unknown instruments are deterministic and never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Transport(_))
    }
}

/// Result type alias for adapter operations.
pub type ExchangeResult<T> = std::result::Result<T, ExchangeError>;
