//! Application configuration.
//!
//! Loaded from a TOML file at startup; read-only afterwards. Every field
//! has a default so a missing section falls back to something sane.

use crate::error::{AppError, AppResult};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tidemark_api::ApiConfig;
use tidemark_core::{LadderRules, RuleSnapshot, UnitType};
use tidemark_engine::{EntryPricePolicy, ManagerConfig};
use tidemark_risk::EvaluatorLimits;
use tidemark_router::RouterConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub manager: ManagerSection,
    #[serde(default)]
    pub rules: RulesSection,
    #[serde(default)]
    pub monitor: MonitorSection,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub paper: PaperSection,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(Path::new(path)))
            .build()
            .map_err(|e| AppError::Config(e.to_string()))?;
        settings
            .try_deserialize()
            .map_err(|e| AppError::Config(e.to_string()))
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            adapter_timeout: Duration::from_secs(self.manager.adapter_timeout_secs),
            default_leverage: self.manager.default_leverage,
            default_quantity: self.manager.default_quantity,
            default_unit: self.manager.default_unit,
            round_up_to_min_size: self.manager.round_up_to_min_size,
            entry_price_policy: self.manager.entry_price_policy,
            rule_defaults: self.rules.snapshot(),
        }
    }

    pub fn evaluator_limits(&self) -> EvaluatorLimits {
        EvaluatorLimits {
            max_price_age: Duration::from_secs(self.monitor.max_price_age_secs),
            max_hold: self.monitor.max_hold_secs.map(Duration::from_secs),
            trailing_arm: self.monitor.trailing_arm_pct,
        }
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor.interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSection {
    /// Path of the SQLite database file.
    #[serde(default = "default_store_path")]
    pub path: String,
}

fn default_store_path() -> String {
    "data/positions.db".to_string()
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerSection {
    /// Bound on every adapter round-trip (seconds).
    #[serde(default = "default_adapter_timeout_secs")]
    pub adapter_timeout_secs: u64,
    #[serde(default = "default_leverage")]
    pub default_leverage: u32,
    /// Size used when a signal omits `quantity`, in `default_unit` units.
    #[serde(default = "default_quantity")]
    pub default_quantity: Decimal,
    #[serde(default)]
    pub default_unit: UnitType,
    #[serde(default)]
    pub round_up_to_min_size: bool,
    #[serde(default)]
    pub entry_price_policy: EntryPricePolicy,
}

fn default_adapter_timeout_secs() -> u64 {
    10
}

fn default_leverage() -> u32 {
    3
}

fn default_quantity() -> Decimal {
    Decimal::from(100)
}

impl Default for ManagerSection {
    fn default() -> Self {
        Self {
            adapter_timeout_secs: default_adapter_timeout_secs(),
            default_leverage: default_leverage(),
            default_quantity: default_quantity(),
            default_unit: UnitType::default(),
            round_up_to_min_size: false,
            entry_price_policy: EntryPricePolicy::default(),
        }
    }
}

/// Default exit rules applied when a signal omits the field. Zero disables
/// the corresponding rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesSection {
    #[serde(default)]
    pub take_profit_pct: Decimal,
    #[serde(default)]
    pub stop_loss_pct: Decimal,
    #[serde(default)]
    pub trailing_stop: bool,
    #[serde(default)]
    pub trailing_distance: Decimal,
    #[serde(default)]
    pub ladder: LadderSection,
}

impl RulesSection {
    pub fn snapshot(&self) -> RuleSnapshot {
        RuleSnapshot {
            tp_pct: self.take_profit_pct,
            sl_pct: self.stop_loss_pct,
            trailing_enabled: self.trailing_stop,
            trailing_distance: self.trailing_distance,
            ladder: LadderRules {
                enabled: self.ladder.enabled,
                step_pct: self.ladder.step_pct,
                close_pct: self.ladder.close_pct,
            },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LadderSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub step_pct: Decimal,
    #[serde(default)]
    pub close_pct: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSection {
    #[serde(default = "default_monitor_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_max_price_age_secs")]
    pub max_price_age_secs: u64,
    /// Force-close positions held longer than this, when set.
    #[serde(default)]
    pub max_hold_secs: Option<u64>,
    /// Trailing-stop arm threshold; defaults to the trailing distance.
    #[serde(default)]
    pub trailing_arm_pct: Option<Decimal>,
}

fn default_monitor_interval_secs() -> u64 {
    5
}

fn default_max_price_age_secs() -> u64 {
    30
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            interval_secs: default_monitor_interval_secs(),
            max_price_age_secs: default_max_price_age_secs(),
            max_hold_secs: None,
            trailing_arm_pct: None,
        }
    }
}

/// Paper-exchange instruments for dry runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaperSection {
    #[serde(default)]
    pub instruments: Vec<PaperInstrument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperInstrument {
    pub symbol: String,
    pub contract_size: Decimal,
    #[serde(default)]
    pub price_precision: u32,
    #[serde(default)]
    pub size_precision: u32,
    pub min_size: Decimal,
    pub mark_price: Decimal,
}
