//! Canonical trade signal.
//!
//! Every strategy adapter (webhook parser, operator call) translates its
//! native payload into this schema before it reaches the router. Unknown
//! wire fields are accepted and ignored; required fields per action are
//! enforced by the router, not here.

use crate::position::Direction;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// What the signal asks the executor to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalAction {
    /// Open a new position.
    Open,
    /// Close the position on the symbol(s).
    Close,
    /// Update rule fields on a live position.
    Modify,
    /// Set the take-profit percentage (shorthand for a modify).
    Tp,
    /// Set the stop-loss percentage (shorthand for a modify).
    Sl,
    /// Read-only status query.
    Status,
}

impl SignalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Close => "close",
            Self::Modify => "modify",
            Self::Tp => "tp",
            Self::Sl => "sl",
            Self::Status => "status",
        }
    }
}

/// Unit the signal's `quantity` is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitType {
    /// Quote currency (e.g. USDT notional).
    #[default]
    Quote,
    /// Base currency (e.g. BTC).
    Base,
    /// Exchange contracts.
    Contract,
}

/// Ladder take-profit parameters carried on a signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LadderSpec {
    /// Whether laddered profit taking is active.
    #[serde(default = "default_ladder_enabled")]
    pub enabled: bool,
    /// Favorable price-move size of one tier, as a decimal fraction.
    pub step_pct: Decimal,
    /// Fraction of the remaining quantity closed per tier.
    pub close_pct: Decimal,
}

fn default_ladder_enabled() -> bool {
    true
}

/// The canonical signal.
///
/// All percentage fields are decimal fractions of the unleveraged price move
/// (0.05 = price moved 5% from entry), independent of leverage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeSignal {
    pub action: SignalAction,
    /// Single target symbol.
    #[serde(default)]
    pub symbol: Option<String>,
    /// Multi-symbol fan-out targets; takes precedence over `symbol`.
    #[serde(default)]
    pub symbols: Option<Vec<String>>,
    /// Required for `open`.
    #[serde(default)]
    pub direction: Option<Direction>,
    /// Requested size in `unit_type` units; missing = configured default.
    #[serde(default)]
    pub quantity: Option<Decimal>,
    #[serde(default)]
    pub unit_type: Option<UnitType>,
    /// Missing = market order.
    #[serde(default)]
    pub entry_price: Option<Decimal>,
    #[serde(default)]
    pub leverage: Option<u32>,
    #[serde(default)]
    pub take_profit_pct: Option<Decimal>,
    #[serde(default)]
    pub stop_loss_pct: Option<Decimal>,
    #[serde(default)]
    pub trailing_stop: Option<bool>,
    #[serde(default)]
    pub trailing_distance: Option<Decimal>,
    #[serde(default)]
    pub ladder_tp: Option<LadderSpec>,
    /// Bypass the symbol whitelist for this signal.
    #[serde(default)]
    pub override_symbol_pool: bool,
    /// Client-generated idempotency key; the router fills one in if absent.
    #[serde(default)]
    pub request_id: Option<String>,
    /// Opaque strategy payload, passed through untouched.
    #[serde(default)]
    pub extra: Option<serde_json::Value>,
}

impl TradeSignal {
    /// The symbols this signal targets, `symbols[]` winning over `symbol`.
    pub fn target_symbols(&self) -> Vec<String> {
        match (&self.symbols, &self.symbol) {
            (Some(list), _) if !list.is_empty() => list.clone(),
            (_, Some(sym)) => vec![sym.clone()],
            _ => Vec::new(),
        }
    }

    /// Build a single-symbol copy of this signal, used by the fan-out.
    pub fn for_symbol(&self, symbol: &str) -> TradeSignal {
        let mut one = self.clone();
        one.symbol = Some(symbol.to_string());
        one.symbols = None;
        one
    }
}
