//! Exit-rule evaluation and signal risk gates.
//!
//! The evaluator is a pure function over `(position, price, now)` — it never
//! mutates anything, which makes every decision reproducible from a log
//! line. The gates guard the open path: cooldowns, daily caps, and the
//! concurrent-position limit.

pub mod error;
pub mod evaluator;
pub mod gates;

pub use error::{RiskError, RiskResult};
pub use evaluator::{evaluate, EvaluatorLimits, Verdict};
pub use gates::{GateConfig, RiskGates};
