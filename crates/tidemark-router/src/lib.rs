//! Signal router.
//!
//! The gatekeeper between the outside world and the position manager:
//! validates canonical signals, applies the symbol whitelist and risk
//! gates, fans multi-symbol signals out into independent per-symbol
//! dispatches, and aggregates the outcomes. It never mutates position state
//! itself.

pub mod error;
pub mod router;

pub use error::{RouterError, RouterResult};
pub use router::{DispatchResult, RouterConfig, SignalRouter, SymbolOutcome};
