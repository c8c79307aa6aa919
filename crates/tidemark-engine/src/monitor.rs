//! Background monitor loop.
//!
//! A single cooperative task that visits every monitored symbol each
//! interval. Ticks are single-flight: a tick runs to completion before the
//! next one starts, so evaluations never overlap. Per-symbol work respects
//! the symbol lock discipline inside `PositionManager::tick_symbol`.

use crate::error::EngineError;
use crate::manager::{PositionManager, TickOutcome};
use std::sync::Arc;
use std::time::Duration;
use tidemark_risk::EvaluatorLimits;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct MonitorLoop {
    manager: Arc<PositionManager>,
    interval: Duration,
    limits: EvaluatorLimits,
    cancel: CancellationToken,
}

impl MonitorLoop {
    pub fn new(
        manager: Arc<PositionManager>,
        interval: Duration,
        limits: EvaluatorLimits,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            manager,
            interval,
            limits,
            cancel,
        }
    }

    /// Run until cancelled. Cancellation is checked between ticks, so the
    /// loop never abandons a tick midway through a symbol.
    pub async fn run(self) {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            "monitor loop started"
        );
        let mut ticker = tokio::time::interval(self.interval);
        // A slow tick delays the next one instead of bursting.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("monitor loop stopped");
                    return;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    /// Visit every monitored symbol once.
    pub async fn tick(&self) {
        for symbol in self.manager.monitored_symbols() {
            match self.manager.tick_symbol(&symbol, &self.limits).await {
                Ok(TickOutcome::Held) | Ok(TickOutcome::Idle) => {}
                Ok(TickOutcome::Closed(reason)) => {
                    info!(symbol = %symbol, reason = %reason, "monitor closed position");
                }
                Ok(TickOutcome::PartiallyClosed { tier }) => {
                    info!(symbol = %symbol, tier, "monitor took ladder profit");
                }
                Ok(TickOutcome::Resolved) => {
                    info!(symbol = %symbol, "monitor resolved reconciling symbol");
                }
                Err(EngineError::PriceUnavailable(_)) => {
                    // Already counted; a skipped tick is routine.
                    debug!(symbol = %symbol, "no usable price this tick");
                }
                Err(err) => {
                    warn!(symbol = %symbol, error = %err, "monitor tick failed");
                }
            }
        }
    }
}
