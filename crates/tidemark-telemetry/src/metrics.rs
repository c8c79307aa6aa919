//! Prometheus metrics for the tidemark executor.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally: a registration failure
//! means duplicate metric names, which should crash at startup rather than
//! fail silently. These panics only occur during static initialization.

use once_cell::sync::Lazy;
use prometheus::{register_counter_vec, CounterVec};

/// Signals by action and routing outcome (accepted/rejected/error).
pub static SIGNALS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tidemark_signals_total",
        "Total canonical signals processed",
        &["action", "outcome"]
    )
    .unwrap()
});

/// Orders sent to the exchange adapter.
pub static ORDERS_PLACED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tidemark_orders_placed_total",
        "Total orders placed via the adapter",
        &["symbol", "side"]
    )
    .unwrap()
});

/// Position exits (full closes) by reason.
pub static POSITION_EXITS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tidemark_position_exits_total",
        "Total position closes",
        &["symbol", "reason"]
    )
    .unwrap()
});

/// Monitor ticks skipped per symbol, by reason.
pub static MONITOR_SKIPS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tidemark_monitor_skips_total",
        "Monitor evaluations skipped",
        &["reason"]
    )
    .unwrap()
});

/// Convenience recording functions.
pub struct Metrics;

impl Metrics {
    pub fn signal(action: &str, outcome: &str) {
        SIGNALS_TOTAL.with_label_values(&[action, outcome]).inc();
    }

    pub fn order_placed(symbol: &str, side: &str) {
        ORDERS_PLACED_TOTAL
            .with_label_values(&[symbol, side])
            .inc();
    }

    pub fn position_exit(symbol: &str, reason: &str) {
        POSITION_EXITS_TOTAL
            .with_label_values(&[symbol, reason])
            .inc();
    }

    pub fn monitor_skip(reason: &str) {
        MONITOR_SKIPS_TOTAL.with_label_values(&[reason]).inc();
    }
}
