//! Error types for tidemark-risk.

use thiserror::Error;

/// Risk error types.
#[derive(Debug, Clone, Error)]
pub enum RiskError {
    #[error("Risk gate '{gate}' blocked: {reason}")]
    GateBlocked { gate: String, reason: String },
}

/// Result type alias for risk operations.
pub type RiskResult<T> = std::result::Result<T, RiskError>;
