//! Managed position record.
//!
//! A `Position` is created when an open order fills and is mutated only by
//! rule modifications, ladder partial closes, and the final close. The rule
//! snapshot is frozen at open so later configuration changes never
//! retroactively alter a live position.

use crate::decimal::{Price, Qty};
use crate::error::CoreError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Position direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// `+1` for long, `-1` for short. Used in every PnL formula.
    #[inline]
    pub fn sign(&self) -> Decimal {
        match self {
            Self::Long => Decimal::ONE,
            Self::Short => Decimal::NEGATIVE_ONE,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Long => "long",
            Self::Short => "short",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "long" => Ok(Self::Long),
            "short" => Ok(Self::Short),
            other => Err(CoreError::InvalidDirection(other.to_string())),
        }
    }
}

/// Why a position (or part of one) was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    TakeProfit,
    StopLoss,
    TrailingStop,
    LadderTp,
    Manual,
    Forced,
    Expired,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TakeProfit => "take_profit",
            Self::StopLoss => "stop_loss",
            Self::TrailingStop => "trailing_stop",
            Self::LadderTp => "ladder_tp",
            Self::Manual => "manual",
            Self::Forced => "forced",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CloseReason {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "take_profit" => Ok(Self::TakeProfit),
            "stop_loss" => Ok(Self::StopLoss),
            "trailing_stop" => Ok(Self::TrailingStop),
            "ladder_tp" => Ok(Self::LadderTp),
            "manual" => Ok(Self::Manual),
            "forced" => Ok(Self::Forced),
            "expired" => Ok(Self::Expired),
            other => Err(CoreError::InvalidCloseReason(other.to_string())),
        }
    }
}

/// Lifecycle status of a stored position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    /// Live: quantity > 0 after any ladder closures.
    Open,
    /// Fully flat; row retained as history.
    Closed,
    /// Local belief and exchange state possibly divergent.
    Reconciling,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Reconciling => "reconciling",
        }
    }
}

impl FromStr for PositionStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "closed" => Ok(Self::Closed),
            "reconciling" => Ok(Self::Reconciling),
            other => Err(CoreError::InvalidStatus(other.to_string())),
        }
    }
}

/// Ladder take-profit rules, frozen onto a position at open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LadderRules {
    pub enabled: bool,
    /// Favorable move per tier, decimal fraction of entry.
    pub step_pct: Decimal,
    /// Fraction of the remaining quantity closed per tier.
    pub close_pct: Decimal,
}

impl LadderRules {
    pub const DISABLED: Self = Self {
        enabled: false,
        step_pct: Decimal::ZERO,
        close_pct: Decimal::ZERO,
    };

    pub fn is_active(&self) -> bool {
        self.enabled && !self.step_pct.is_zero() && !self.close_pct.is_zero()
    }
}

/// Per-position risk rules, frozen at open.
///
/// Zero percentages mean "rule disabled". All fractions refer to the
/// unleveraged price move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSnapshot {
    pub tp_pct: Decimal,
    pub sl_pct: Decimal,
    pub trailing_enabled: bool,
    pub trailing_distance: Decimal,
    pub ladder: LadderRules,
}

impl Default for RuleSnapshot {
    fn default() -> Self {
        Self {
            tp_pct: Decimal::ZERO,
            sl_pct: Decimal::ZERO,
            trailing_enabled: false,
            trailing_distance: Decimal::ZERO,
            ladder: LadderRules::DISABLED,
        }
    }
}

/// A managed position.
///
/// Uniquely keyed by `(symbol, position_id)` where `position_id` is the
/// adapter's fill identifier. `quantity` is a signed contract count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub position_id: String,
    pub direction: Direction,
    pub entry_price: Price,
    pub quantity: Qty,
    /// Unsigned contract count at open; `quantity` only shrinks from here.
    pub opened_contracts: Decimal,
    pub leverage: u32,
    pub entry_ts: DateTime<Utc>,
    /// Base units per contract, snapshotted from the instrument spec.
    pub contract_size: Decimal,
    pub rules: RuleSnapshot,

    // Runtime fields, maintained by the position manager.
    pub high_watermark: Price,
    pub low_watermark: Price,
    pub ladder_tier_hit: u32,
    /// Cumulative fraction closed by ladder tiers, in `[0, 1]`.
    pub ladder_closed_fraction: Decimal,
    /// Realized PnL accumulated so far (ladder tranches + final close).
    pub realized_pnl: Decimal,

    pub status: PositionStatus,

    // Terminal fields, set on close.
    pub exit_price: Option<Price>,
    pub exit_ts: Option<DateTime<Utc>>,
    pub pnl_pct: Option<Decimal>,
    pub close_reason: Option<CloseReason>,
}

impl Position {
    /// Create a freshly opened position. Watermarks start at the entry price.
    pub fn opened(
        symbol: String,
        position_id: String,
        direction: Direction,
        entry_price: Price,
        contracts: Decimal,
        leverage: u32,
        contract_size: Decimal,
        rules: RuleSnapshot,
        entry_ts: DateTime<Utc>,
    ) -> Self {
        Self {
            symbol,
            position_id,
            direction,
            entry_price,
            quantity: Qty::new(contracts * direction.sign()),
            opened_contracts: contracts,
            leverage,
            entry_ts,
            contract_size,
            rules,
            high_watermark: entry_price,
            low_watermark: entry_price,
            ladder_tier_hit: 0,
            ladder_closed_fraction: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            status: PositionStatus::Open,
            exit_price: None,
            exit_ts: None,
            pnl_pct: None,
            close_reason: None,
        }
    }

    /// Unsigned contract count.
    #[inline]
    pub fn contracts_abs(&self) -> Decimal {
        self.quantity.abs()
    }

    /// Unleveraged PnL fraction at `price`:
    /// `sign · (price − entry) / entry`. `None` when the entry price is zero.
    pub fn unleveraged_move(&self, price: Price) -> Option<Decimal> {
        let raw = price.frac_from(self.entry_price)?;
        Some(raw * self.direction.sign())
    }

    /// Unrealized quote-currency PnL at `price` for the remaining quantity:
    /// `sign · (price − entry) · |quantity| · contract_size`.
    pub fn unrealized_pnl(&self, price: Price) -> Decimal {
        self.direction.sign()
            * (price.inner() - self.entry_price.inner())
            * self.contracts_abs()
            * self.contract_size
    }

    /// Realized quote-currency PnL of closing `contracts` at `exit`.
    pub fn tranche_pnl(&self, exit: Price, contracts: Decimal) -> Decimal {
        self.direction.sign()
            * (exit.inner() - self.entry_price.inner())
            * contracts
            * self.contract_size
    }

    /// Fold an observed price into the watermarks.
    pub fn observe_price(&mut self, price: Price) {
        if price > self.high_watermark {
            self.high_watermark = price;
        }
        if price < self.low_watermark {
            self.low_watermark = price;
        }
    }

    /// Apply a ladder partial close of `contracts` at `exit` for `tier`.
    pub fn apply_partial_close(
        &mut self,
        contracts: Decimal,
        exit: Price,
        tier: u32,
        fraction: Decimal,
    ) {
        self.realized_pnl += self.tranche_pnl(exit, contracts);
        self.quantity = self.quantity.reduced_by(contracts);
        self.ladder_tier_hit = tier;
        self.ladder_closed_fraction = (self.ladder_closed_fraction + fraction).min(Decimal::ONE);
    }

    /// Finalize the position at `exit`, realizing the remaining quantity.
    pub fn finalize_close(&mut self, exit: Price, ts: DateTime<Utc>, reason: CloseReason) {
        let remaining = self.contracts_abs();
        self.realized_pnl += self.tranche_pnl(exit, remaining);
        self.pnl_pct = self.unleveraged_move(exit);
        self.quantity = Qty::ZERO;
        self.status = PositionStatus::Closed;
        self.exit_price = Some(exit);
        self.exit_ts = Some(ts);
        self.close_reason = Some(reason);
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn long_btc() -> Position {
        Position::opened(
            "BTC-USDT-SWAP".to_string(),
            "fill-1".to_string(),
            Direction::Long,
            Price::new(dec!(50000)),
            dec!(1),
            3,
            dec!(0.01),
            RuleSnapshot::default(),
            Utc::now(),
        )
    }

    #[test]
    fn test_opened_long_sign_and_watermarks() {
        let pos = long_btc();
        assert_eq!(pos.quantity, Qty::new(dec!(1)));
        assert_eq!(pos.high_watermark, pos.entry_price);
        assert_eq!(pos.low_watermark, pos.entry_price);
    }

    #[test]
    fn test_unleveraged_move_short() {
        let mut pos = long_btc();
        pos.direction = Direction::Short;
        pos.quantity = Qty::new(dec!(-1));

        // Short gains when price falls.
        let u = pos.unleveraged_move(Price::new(dec!(47500))).unwrap();
        assert_eq!(u, dec!(0.05));
    }

    #[test]
    fn test_finalize_close_realizes_pnl() {
        let mut pos = long_btc();
        pos.finalize_close(Price::new(dec!(52500)), Utc::now(), CloseReason::TakeProfit);

        // +2500 price move * 1 contract * 0.01 contract_size = 25 quote units.
        assert_eq!(pos.realized_pnl, dec!(25.00));
        assert_eq!(pos.pnl_pct, Some(dec!(0.05)));
        assert!(pos.quantity.is_zero());
        assert_eq!(pos.status, PositionStatus::Closed);
    }

    #[test]
    fn test_apply_partial_close_reduces_and_accumulates() {
        let mut pos = long_btc();
        pos.quantity = Qty::new(dec!(4));

        pos.apply_partial_close(dec!(1), Price::new(dec!(50500)), 1, dec!(0.25));
        assert_eq!(pos.quantity, Qty::new(dec!(3)));
        assert_eq!(pos.ladder_tier_hit, 1);
        assert_eq!(pos.ladder_closed_fraction, dec!(0.25));
        // 500 * 1 * 0.01 = 5
        assert_eq!(pos.realized_pnl, dec!(5.00));
    }

    #[test]
    fn test_observe_price_is_monotone() {
        let mut pos = long_btc();
        pos.observe_price(Price::new(dec!(51000)));
        pos.observe_price(Price::new(dec!(49000)));
        pos.observe_price(Price::new(dec!(50500)));

        assert_eq!(pos.high_watermark, Price::new(dec!(51000)));
        assert_eq!(pos.low_watermark, Price::new(dec!(49000)));
    }
}
