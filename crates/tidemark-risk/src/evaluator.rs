//! Pure exit-rule evaluator.
//!
//! All thresholds operate on the unleveraged move
//! `u = sign · (price − entry) / entry`; leverage affects margin, never the
//! exit rules. Decision order: sanity guards, stop-loss, fixed take-profit,
//! ladder take-profit, trailing stop, expiry, hold. Stop-loss always wins
//! over profit exits; thresholds are inclusive.
//!
//! The evaluator reads watermarks but never writes them — watermark
//! maintenance belongs to the position manager, under the symbol lock.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::time::Duration;
use tidemark_core::{CloseReason, Direction, Position, Price};
use tracing::warn;

/// Evaluation decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Nothing to do.
    Hold,
    /// Close the whole remaining quantity.
    Close(CloseReason),
    /// Close `fraction` of the remaining quantity for ladder tier `tier`.
    PartialClose { fraction: Decimal, tier: u32 },
}

/// Process-wide evaluation limits (not part of the per-position snapshot).
#[derive(Debug, Clone)]
pub struct EvaluatorLimits {
    /// Reject prices older than this.
    pub max_price_age: Duration,
    /// Force-close positions held longer than this, when set.
    pub max_hold: Option<Duration>,
    /// Favorable move required before the trailing stop arms.
    /// `None` = arm at the position's own `trailing_distance`.
    pub trailing_arm: Option<Decimal>,
}

impl Default for EvaluatorLimits {
    fn default() -> Self {
        Self {
            max_price_age: Duration::from_secs(30),
            max_hold: None,
            trailing_arm: None,
        }
    }
}

/// Evaluate a position against a fresh price.
///
/// Deterministic: the same `(position, price, price_age, now)` always yields
/// the same verdict.
pub fn evaluate(
    position: &Position,
    price: Price,
    price_age: Duration,
    now: DateTime<Utc>,
    limits: &EvaluatorLimits,
) -> Verdict {
    // Sanity guards: a nonsensical price must never trigger an exit.
    if !price.is_positive() {
        warn!(symbol = %position.symbol, %price, "ignoring non-positive price");
        return Verdict::Hold;
    }
    if price_age > limits.max_price_age {
        warn!(
            symbol = %position.symbol,
            age_ms = price_age.as_millis() as u64,
            "ignoring stale price"
        );
        return Verdict::Hold;
    }
    let u = match position.unleveraged_move(price) {
        Some(u) => u,
        None => return Verdict::Hold,
    };
    if u.abs() > Decimal::ONE {
        warn!(symbol = %position.symbol, %price, move_pct = %u, "ignoring absurd price jump");
        return Verdict::Hold;
    }

    let rules = &position.rules;

    // Stop-loss precedes every profit exit. Inclusive threshold.
    if rules.sl_pct > Decimal::ZERO && u <= -rules.sl_pct {
        return Verdict::Close(CloseReason::StopLoss);
    }

    let ladder_active = rules.ladder.is_active();

    // Fixed take-profit only applies when the ladder is off. Inclusive.
    if !ladder_active && rules.tp_pct > Decimal::ZERO && u >= rules.tp_pct {
        return Verdict::Close(CloseReason::TakeProfit);
    }

    // Ladder take-profit: one tranche per newly reached tier.
    if ladder_active && u > Decimal::ZERO {
        let tier = (u / rules.ladder.step_pct)
            .floor()
            .to_u32()
            .unwrap_or(u32::MAX);
        if tier >= 1 && tier > position.ladder_tier_hit {
            // The tranche that would complete the position collapses to a
            // full take-profit close.
            if position.ladder_closed_fraction + rules.ladder.close_pct >= Decimal::ONE {
                return Verdict::Close(CloseReason::TakeProfit);
            }
            return Verdict::PartialClose {
                fraction: rules.ladder.close_pct,
                tier,
            };
        }
    }

    // Trailing stop: armed once the favorable move has reached the arm
    // threshold, then fires on the configured retrace from the watermark.
    if rules.trailing_enabled && rules.trailing_distance > Decimal::ZERO {
        let distance = rules.trailing_distance;
        let arm = limits.trailing_arm.unwrap_or(distance);
        match position.direction {
            Direction::Long => {
                let armed = position
                    .high_watermark
                    .frac_from(position.entry_price)
                    .is_some_and(|f| f >= arm);
                let stop = position.high_watermark.inner() * (Decimal::ONE - distance);
                if armed && price.inner() <= stop {
                    return Verdict::Close(CloseReason::TrailingStop);
                }
            }
            Direction::Short => {
                let armed = position
                    .low_watermark
                    .frac_from(position.entry_price)
                    .is_some_and(|f| -f >= arm);
                let stop = position.low_watermark.inner() * (Decimal::ONE + distance);
                if armed && price.inner() >= stop {
                    return Verdict::Close(CloseReason::TrailingStop);
                }
            }
        }
    }

    // Expiry beats Hold but nothing above it.
    if let Some(max_hold) = limits.max_hold {
        let held = (now - position.entry_ts).to_std().unwrap_or(Duration::ZERO);
        if held > max_hold {
            return Verdict::Close(CloseReason::Expired);
        }
    }

    Verdict::Hold
}
