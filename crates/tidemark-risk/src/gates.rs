//! Risk gates for the open path.
//!
//! All gates must pass before a new position is opened. When in doubt,
//! block. Gates are checked in a fixed order and the first block is
//! returned; `record_open` must be called only after the order succeeds.

use crate::error::{RiskError, RiskResult};
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Gate configuration. Zero values disable the corresponding gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Minimum seconds between two opens on the same symbol.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Maximum opens per UTC day across all symbols.
    #[serde(default)]
    pub max_daily_trades: u32,
    /// Once the day's realized loss reaches this (quote units), block opens
    /// until the next day.
    #[serde(default)]
    pub max_daily_loss: Decimal,
    /// Maximum concurrently open positions.
    #[serde(default = "default_max_open_positions")]
    pub max_open_positions: usize,
}

fn default_cooldown_secs() -> u64 {
    300
}

fn default_max_open_positions() -> usize {
    10
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown_secs(),
            max_daily_trades: 0,
            max_daily_loss: Decimal::ZERO,
            max_open_positions: default_max_open_positions(),
        }
    }
}

/// Stateful gate checker for `open` signals.
pub struct RiskGates {
    config: GateConfig,
    /// Last accepted open per symbol, for the cooling period.
    last_open: DashMap<String, DateTime<Utc>>,
    /// `(day, opens that day)`; rolls over on date change.
    daily_opens: Mutex<(NaiveDate, u32)>,
}

impl RiskGates {
    pub fn new(config: GateConfig) -> Self {
        Self {
            config,
            last_open: DashMap::new(),
            daily_opens: Mutex::new((Utc::now().date_naive(), 0)),
        }
    }

    /// Check every gate for an open on `symbol`.
    ///
    /// `open_positions` is the current count of live positions and
    /// `realized_today` the day's realized PnL from the store rollup
    /// (negative = loss).
    pub fn check_open(
        &self,
        symbol: &str,
        now: DateTime<Utc>,
        open_positions: usize,
        realized_today: Decimal,
    ) -> RiskResult<()> {
        // Gate 1: per-symbol cooling period.
        if self.config.cooldown_secs > 0 {
            if let Some(last) = self.last_open.get(symbol) {
                let elapsed = (now - *last).num_seconds();
                if elapsed >= 0 && (elapsed as u64) < self.config.cooldown_secs {
                    return Err(RiskError::GateBlocked {
                        gate: "cooldown".to_string(),
                        reason: format!(
                            "{symbol} opened {elapsed}s ago, cooling period is {}s",
                            self.config.cooldown_secs
                        ),
                    });
                }
            }
        }

        // Gate 2: daily trade cap.
        if self.config.max_daily_trades > 0 {
            let opens_today = self.opens_today(now.date_naive());
            if opens_today >= self.config.max_daily_trades {
                return Err(RiskError::GateBlocked {
                    gate: "daily_trades".to_string(),
                    reason: format!(
                        "daily trade cap reached ({opens_today}/{})",
                        self.config.max_daily_trades
                    ),
                });
            }
        }

        // Gate 3: daily loss cap.
        if self.config.max_daily_loss > Decimal::ZERO
            && realized_today <= -self.config.max_daily_loss
        {
            return Err(RiskError::GateBlocked {
                gate: "daily_loss".to_string(),
                reason: format!(
                    "realized {realized_today} today, loss cap is {}",
                    self.config.max_daily_loss
                ),
            });
        }

        // Gate 4: concurrent position cap.
        if self.config.max_open_positions > 0 && open_positions >= self.config.max_open_positions {
            return Err(RiskError::GateBlocked {
                gate: "max_positions".to_string(),
                reason: format!(
                    "{open_positions} positions open, cap is {}",
                    self.config.max_open_positions
                ),
            });
        }

        Ok(())
    }

    /// Record an accepted open. Starts the symbol's cooling period and
    /// counts against the daily cap.
    pub fn record_open(&self, symbol: &str, now: DateTime<Utc>) {
        self.last_open.insert(symbol.to_string(), now);
        let mut daily = self.daily_opens.lock();
        let today = now.date_naive();
        if daily.0 != today {
            *daily = (today, 0);
        }
        daily.1 += 1;
        debug!(symbol, opens_today = daily.1, "recorded open");
    }

    fn opens_today(&self, today: NaiveDate) -> u32 {
        let mut daily = self.daily_opens.lock();
        if daily.0 != today {
            *daily = (today, 0);
        }
        daily.1
    }
}
