//! Position lifecycle engine.
//!
//! Owns the symbol state machine (`manager`), the order sizer, the
//! background monitor loop, and the read-only reporting views. All mutating
//! operations on a symbol serialize through that symbol's async lock;
//! adapter calls happen while holding it, because order placement is the
//! critical section that defines the position's state.

pub mod error;
pub mod manager;
pub mod monitor;
pub mod report;
pub mod sizer;
pub mod spec_cache;

pub use error::{EngineError, EngineResult};
pub use manager::{
    CloseOutcome, EntryPricePolicy, ManagerConfig, OpenRequest, PositionManager, RulePatch,
    TickOutcome,
};
pub use monitor::MonitorLoop;
pub use report::{DailyPnlReport, OpenPositionReport, Reporter, StatusReport};
pub use sizer::contracts_for;
pub use spec_cache::SpecCache;
