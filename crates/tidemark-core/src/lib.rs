//! Core domain types for the tidemark trading executor.
//!
//! This crate provides the types shared by every subsystem:
//! - `Price`, `Qty`: precision-safe numeric types
//! - `ContractSpec`: per-instrument contract attributes
//! - `TradeSignal`: the canonical signal every strategy adapter produces
//! - `Position`: the managed position record with its frozen rule snapshot

pub mod decimal;
pub mod error;
pub mod instrument;
pub mod position;
pub mod signal;

pub use decimal::{Price, Qty};
pub use error::{CoreError, Result};
pub use instrument::ContractSpec;
pub use position::{
    CloseReason, Direction, LadderRules, Position, PositionStatus, RuleSnapshot,
};
pub use signal::{LadderSpec, SignalAction, TradeSignal, UnitType};
