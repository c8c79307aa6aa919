//! Signal validation, gating, fan-out, and dispatch.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use tidemark_core::{CloseReason, Price, SignalAction, TradeSignal};
use tidemark_engine::{CloseOutcome, OpenRequest, PositionManager, RulePatch};
use tidemark_risk::{GateConfig, RiskGates};
use tidemark_store::PositionStore;
use tidemark_telemetry::Metrics;

use crate::error::{RouterError, RouterResult};

/// Router configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// When true, `open` signals must name a symbol in `symbol_pool`
    /// (unless they carry `override_symbol_pool`).
    #[serde(default)]
    pub whitelist_enabled: bool,
    #[serde(default)]
    pub symbol_pool: Vec<String>,
    #[serde(default)]
    pub gates: GateConfig,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            whitelist_enabled: false,
            symbol_pool: Vec::new(),
            gates: GateConfig::default(),
        }
    }
}

/// Outcome for one symbol of a (possibly fanned-out) signal.
#[derive(Debug, Clone, Serialize)]
pub struct SymbolOutcome {
    pub symbol: String,
    pub success: bool,
    pub message: String,
}

/// Aggregated dispatch result.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchResult {
    pub success: bool,
    pub message: String,
    pub outcomes: Vec<SymbolOutcome>,
}

impl DispatchResult {
    fn rejected(message: String) -> Self {
        Self {
            success: false,
            message,
            outcomes: Vec::new(),
        }
    }
}

/// The gatekeeper in front of the position manager.
pub struct SignalRouter {
    manager: Arc<PositionManager>,
    store: Arc<PositionStore>,
    gates: RiskGates,
    config: RouterConfig,
}

impl SignalRouter {
    pub fn new(
        manager: Arc<PositionManager>,
        store: Arc<PositionStore>,
        config: RouterConfig,
    ) -> Self {
        Self {
            manager,
            store,
            gates: RiskGates::new(config.gates.clone()),
            config,
        }
    }

    /// Validate, gate, fan out, and dispatch one canonical signal.
    pub async fn dispatch(&self, signal: TradeSignal) -> DispatchResult {
        let action = signal.action;
        if let Err(err) = validate(&signal) {
            Metrics::signal(action.as_str(), "invalid");
            debug!(action = action.as_str(), error = %err, "signal rejected");
            return DispatchResult::rejected(err.to_string());
        }

        let symbols = signal.target_symbols();

        // A bare status query summarizes everything open.
        if action == SignalAction::Status && symbols.is_empty() {
            let open = self.manager.open_positions();
            let listing: Vec<String> = open.iter().map(|p| p.symbol.clone()).collect();
            return DispatchResult {
                success: true,
                message: format!("{} open position(s): {}", open.len(), listing.join(", ")),
                outcomes: Vec::new(),
            };
        }

        let base_id = signal
            .request_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        // Each expanded symbol is dispatched independently; one failing gate
        // never affects its siblings.
        let mut outcomes = Vec::with_capacity(symbols.len());
        for symbol in &symbols {
            let one = signal.for_symbol(symbol);
            match self.dispatch_one(&one, symbol, &base_id).await {
                Ok(message) => {
                    Metrics::signal(action.as_str(), "accepted");
                    outcomes.push(SymbolOutcome {
                        symbol: symbol.clone(),
                        success: true,
                        message,
                    });
                }
                Err(err) => {
                    Metrics::signal(action.as_str(), "rejected");
                    info!(symbol = %symbol, action = action.as_str(), error = %err, "dispatch failed");
                    outcomes.push(SymbolOutcome {
                        symbol: symbol.clone(),
                        success: false,
                        message: err.to_string(),
                    });
                }
            }
        }

        let success = outcomes.iter().all(|o| o.success);
        DispatchResult {
            success,
            message: if success {
                "ok".to_string()
            } else {
                "one or more symbols failed".to_string()
            },
            outcomes,
        }
    }

    /// Close every open position; per-symbol outcomes, no early abort.
    pub async fn close_all(&self) -> DispatchResult {
        let results = self.manager.close_all(CloseReason::Manual).await;
        let outcomes: Vec<SymbolOutcome> = results
            .into_iter()
            .map(|(symbol, result)| match result {
                Ok(CloseOutcome::Closed(p)) => SymbolOutcome {
                    symbol,
                    success: true,
                    message: format!("closed, realized {}", p.realized_pnl),
                },
                Ok(CloseOutcome::AlreadyFlat) => SymbolOutcome {
                    symbol,
                    success: true,
                    message: "already closed".to_string(),
                },
                Err(err) => SymbolOutcome {
                    symbol,
                    success: false,
                    message: err.to_string(),
                },
            })
            .collect();

        let success = outcomes.iter().all(|o| o.success);
        DispatchResult {
            success,
            message: format!("closed {} symbol(s)", outcomes.len()),
            outcomes,
        }
    }

    async fn dispatch_one(
        &self,
        signal: &TradeSignal,
        symbol: &str,
        base_id: &str,
    ) -> RouterResult<String> {
        match signal.action {
            SignalAction::Open => self.dispatch_open(signal, symbol, base_id).await,
            SignalAction::Close => {
                match self.manager.close(symbol, CloseReason::Manual).await? {
                    CloseOutcome::Closed(p) => Ok(format!(
                        "closed at {}, realized {}",
                        p.exit_price.map(|x| x.to_string()).unwrap_or_default(),
                        p.realized_pnl
                    )),
                    // Closing an already-closed symbol is not an error.
                    CloseOutcome::AlreadyFlat => Ok("already closed".to_string()),
                }
            }
            SignalAction::Modify | SignalAction::Tp | SignalAction::Sl => {
                let patch = patch_for(signal);
                if patch.is_empty() {
                    return Err(RouterError::InvalidSignal(
                        "no rule fields to modify".to_string(),
                    ));
                }
                let updated = self.manager.modify(symbol, &patch).await?;
                Ok(format!(
                    "rules updated: tp={} sl={} trailing={}",
                    updated.rules.tp_pct, updated.rules.sl_pct, updated.rules.trailing_enabled
                ))
            }
            SignalAction::Status => {
                if self.manager.has_open(symbol) {
                    Ok("open".to_string())
                } else {
                    Ok("flat".to_string())
                }
            }
        }
    }

    async fn dispatch_open(
        &self,
        signal: &TradeSignal,
        symbol: &str,
        base_id: &str,
    ) -> RouterResult<String> {
        // Gate 0: symbol whitelist.
        if self.config.whitelist_enabled
            && !signal.override_symbol_pool
            && !self.config.symbol_pool.iter().any(|s| s == symbol)
        {
            return Err(RouterError::SymbolNotAllowed(symbol.to_string()));
        }

        // Risk gates, fed by the store's rollup for the loss cap.
        let now = Utc::now();
        let realized_today = self
            .store
            .daily_rollup(now.date_naive())
            .await
            .map(|r| r.realized_pnl)
            .map_err(|e| RouterError::Engine(e.into()))?;
        self.gates
            .check_open(symbol, now, self.manager.open_count(), realized_today)?;

        let direction = signal
            .direction
            .ok_or_else(|| RouterError::InvalidSignal("direction is required".to_string()))?;

        let request = OpenRequest {
            symbol: symbol.to_string(),
            direction,
            quantity: signal.quantity,
            unit: signal.unit_type.unwrap_or_default(),
            entry_price: signal.entry_price.map(Price::new),
            leverage: signal.leverage,
            tp_pct: signal.take_profit_pct,
            sl_pct: signal.stop_loss_pct,
            trailing_stop: signal.trailing_stop,
            trailing_distance: signal.trailing_distance,
            ladder: signal.ladder_tp.as_ref().map(|l| tidemark_core::LadderRules {
                enabled: l.enabled,
                step_pct: l.step_pct,
                close_pct: l.close_pct,
            }),
            request_id: format!("{base_id}:{symbol}"),
        };

        let position = self.manager.open(request).await?;
        self.gates.record_open(symbol, now);
        Ok(format!(
            "opened {} {} contract(s) at {}",
            position.direction,
            position.contracts_abs(),
            position.entry_price
        ))
    }
}

fn patch_for(signal: &TradeSignal) -> RulePatch {
    match signal.action {
        SignalAction::Tp => RulePatch {
            tp_pct: signal.take_profit_pct,
            ..RulePatch::default()
        },
        SignalAction::Sl => RulePatch {
            sl_pct: signal.stop_loss_pct,
            ..RulePatch::default()
        },
        _ => RulePatch {
            tp_pct: signal.take_profit_pct,
            sl_pct: signal.stop_loss_pct,
            trailing_enabled: signal.trailing_stop,
            trailing_distance: signal.trailing_distance,
            ladder: signal.ladder_tp.as_ref().map(|l| tidemark_core::LadderRules {
                enabled: l.enabled,
                step_pct: l.step_pct,
                close_pct: l.close_pct,
            }),
        },
    }
}

/// Structural validation. Required fields per action are enforced here;
/// unknown wire fields were already dropped by serde.
fn validate(signal: &TradeSignal) -> RouterResult<()> {
    let symbols = signal.target_symbols();
    if symbols.is_empty() && signal.action != SignalAction::Status {
        return Err(RouterError::InvalidSignal(
            "signal names no symbol".to_string(),
        ));
    }
    if signal.action == SignalAction::Open && signal.direction.is_none() {
        return Err(RouterError::InvalidSignal(
            "direction is required for open".to_string(),
        ));
    }
    if let Some(quantity) = signal.quantity {
        if quantity <= Decimal::ZERO {
            return Err(RouterError::InvalidSignal(format!(
                "quantity {quantity} must be positive"
            )));
        }
    }
    if let Some(leverage) = signal.leverage {
        if leverage == 0 {
            return Err(RouterError::InvalidSignal(
                "leverage must be at least 1".to_string(),
            ));
        }
    }
    if let Some(price) = signal.entry_price {
        if price <= Decimal::ZERO {
            return Err(RouterError::InvalidSignal(format!(
                "entry_price {price} must be positive"
            )));
        }
    }
    for (name, value) in [
        ("take_profit_pct", signal.take_profit_pct),
        ("stop_loss_pct", signal.stop_loss_pct),
        ("trailing_distance", signal.trailing_distance),
    ] {
        if let Some(v) = value {
            if v < Decimal::ZERO {
                return Err(RouterError::InvalidSignal(format!(
                    "{name} {v} must not be negative"
                )));
            }
        }
    }
    if let Some(ladder) = &signal.ladder_tp {
        if ladder.enabled
            && (ladder.step_pct <= Decimal::ZERO
                || ladder.close_pct <= Decimal::ZERO
                || ladder.close_pct > Decimal::ONE)
        {
            return Err(RouterError::InvalidSignal(
                "ladder_tp requires 0 < step_pct and 0 < close_pct <= 1".to_string(),
            ));
        }
    }
    Ok(())
}
