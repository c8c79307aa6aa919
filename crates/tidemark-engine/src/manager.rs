//! Position manager: the per-symbol state machine.
//!
//! Maintains an in-memory `symbol -> Slot` map, each slot guarded by its own
//! `tokio::sync::Mutex`. Every mutating operation for a symbol runs under
//! that lock, adapter calls included; operations on different symbols
//! proceed in parallel. A lock-free `DashMap` mirror of open positions
//! serves read-only snapshots (reporting, monitor symbol list) without
//! touching the locks.
//!
//! # State machine
//!
//! `Empty -> Opening -> Open -> {Modifying, Closing} -> Empty`, with
//! `Reconciling` entered whenever an adapter timeout leaves local belief and
//! exchange state possibly divergent. Reconciliation polls `get_positions`
//! for the order's terminal effect and settles back to `Empty` or `Open`.
//!
//! # Durability
//!
//! Store writes commit before the in-memory transition is considered final.
//! A store failure fails the request closed; the exchange-side effect, if
//! any, is recovered by reconciliation at the next boot.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use tidemark_core::{
    CloseReason, ContractSpec, Direction, LadderRules, Position, PositionStatus, Price,
    RuleSnapshot, UnitType,
};
use tidemark_exchange::{
    with_retry, BoxFuture, DynExchange, ExchangeError, ExchangeResult, OrderRequest, OrderSide,
    PriceCallback, DEFAULT_BACKOFF,
};
use tidemark_feed::{PriceCache, PriceReading};
use tidemark_risk::{evaluate, EvaluatorLimits, Verdict};
use tidemark_store::PositionStore;
use tidemark_telemetry::Metrics;

use crate::error::{EngineError, EngineResult};
use crate::sizer;
use crate::spec_cache::SpecCache;

// ============================================================================
// Configuration
// ============================================================================

/// What to do with an `entry_price` on a market-style open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryPricePolicy {
    /// Reject the open when the current mark is worse than the given price.
    #[default]
    Cap,
    /// Place at market regardless.
    Ignore,
}

/// Manager configuration, read-only after boot.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Bound on every adapter round-trip.
    pub adapter_timeout: Duration,
    pub default_leverage: u32,
    /// Per-position size used when a signal omits `quantity`.
    pub default_quantity: Decimal,
    pub default_unit: UnitType,
    /// Round undersized orders up to `min_size` instead of rejecting.
    pub round_up_to_min_size: bool,
    pub entry_price_policy: EntryPricePolicy,
    /// Rule snapshot applied when a signal omits the corresponding field.
    pub rule_defaults: RuleSnapshot,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            adapter_timeout: Duration::from_secs(10),
            default_leverage: 3,
            default_quantity: Decimal::from(100),
            default_unit: UnitType::Quote,
            round_up_to_min_size: false,
            entry_price_policy: EntryPricePolicy::Cap,
            rule_defaults: RuleSnapshot::default(),
        }
    }
}

// ============================================================================
// Requests and outcomes
// ============================================================================

/// Normalized open request, produced by the router from a canonical signal.
#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub symbol: String,
    pub direction: Direction,
    /// Requested size in `unit` units; `None` = configured default.
    pub quantity: Option<Decimal>,
    pub unit: UnitType,
    /// Limit price; `None` = market.
    pub entry_price: Option<Price>,
    pub leverage: Option<u32>,
    pub tp_pct: Option<Decimal>,
    pub sl_pct: Option<Decimal>,
    pub trailing_stop: Option<bool>,
    pub trailing_distance: Option<Decimal>,
    pub ladder: Option<LadderRules>,
    /// Idempotency key; doubles as the client order id.
    pub request_id: String,
}

/// Rule-field update applied by `modify`.
#[derive(Debug, Clone, Default)]
pub struct RulePatch {
    pub tp_pct: Option<Decimal>,
    pub sl_pct: Option<Decimal>,
    pub trailing_enabled: Option<bool>,
    pub trailing_distance: Option<Decimal>,
    pub ladder: Option<LadderRules>,
}

impl RulePatch {
    fn apply(&self, rules: &mut RuleSnapshot) {
        if let Some(tp) = self.tp_pct {
            rules.tp_pct = tp;
        }
        if let Some(sl) = self.sl_pct {
            rules.sl_pct = sl;
        }
        if let Some(enabled) = self.trailing_enabled {
            rules.trailing_enabled = enabled;
        }
        if let Some(distance) = self.trailing_distance {
            rules.trailing_distance = distance;
        }
        if let Some(ladder) = self.ladder {
            rules.ladder = ladder;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tp_pct.is_none()
            && self.sl_pct.is_none()
            && self.trailing_enabled.is_none()
            && self.trailing_distance.is_none()
            && self.ladder.is_none()
    }
}

/// Result of a close request.
#[derive(Debug, Clone)]
pub enum CloseOutcome {
    /// The position was reduced to flat; terminal fields are set.
    Closed(Position),
    /// No open position existed; closing twice is not an error.
    AlreadyFlat,
}

/// What a monitor tick did for one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing monitorable in the slot.
    Idle,
    /// Evaluated, no rule fired.
    Held,
    Closed(CloseReason),
    PartiallyClosed { tier: u32 },
    /// A reconciling slot was resolved (either direction).
    Resolved,
}

// ============================================================================
// Slot state
// ============================================================================

/// Per-symbol state. Intermediate states (`Opening`, `Modifying`, `Closing`)
/// exist only while the owning operation holds the symbol lock.
enum Slot {
    Empty,
    Opening,
    Open(Position),
    Modifying(Position),
    Closing(Position),
    Reconciling(Box<Pending>),
}

/// What reconciliation must resolve.
#[derive(Clone)]
enum Pending {
    /// An open order whose fate is unknown.
    Open(PendingOpen),
    /// A reduce whose fate is unknown (or a boot-time divergence).
    Close {
        position: Position,
        reason: CloseReason,
    },
}

#[derive(Clone)]
struct PendingOpen {
    request: OpenRequest,
    spec: ContractSpec,
    leverage: u32,
}

enum OpenFlow {
    Done(Position),
    /// Declared not to have happened; slot returns to `Empty`.
    Abandoned(EngineError),
    /// Fate unknown; slot stays `Reconciling`.
    Unresolved(PendingOpen, EngineError),
}

enum CloseFlow {
    Done(Position),
    /// The reduce did not happen; slot returns to `Open`.
    NotReduced(EngineError),
    /// Fate unknown; slot stays `Reconciling`.
    Unresolved(EngineError),
}

// ============================================================================
// PositionManager
// ============================================================================

pub struct PositionManager {
    adapter: DynExchange,
    store: Arc<PositionStore>,
    cache: Arc<PriceCache>,
    specs: SpecCache,
    config: ManagerConfig,
    slots: DashMap<String, Arc<Mutex<Slot>>>,
    /// Lock-free mirror of open positions for reads.
    open_cache: DashMap<String, Position>,
    /// Symbols currently in `Reconciling`, so the monitor keeps visiting them.
    reconciling: DashMap<String, ()>,
    /// Symbols with an active price subscription.
    subscribed: DashMap<String, ()>,
    /// Request id -> opened position, for idempotent replays.
    recent_requests: DashMap<String, Position>,
    price_sink: PriceCallback,
}

impl PositionManager {
    pub fn new(
        adapter: DynExchange,
        store: Arc<PositionStore>,
        cache: Arc<PriceCache>,
        config: ManagerConfig,
    ) -> Arc<Self> {
        let price_sink: PriceCallback = {
            let cache = cache.clone();
            Arc::new(move |symbol, price, ts| cache.update(symbol, price, ts))
        };
        Arc::new(Self {
            specs: SpecCache::new(adapter.clone(), config.adapter_timeout),
            adapter,
            store,
            cache,
            config,
            slots: DashMap::new(),
            open_cache: DashMap::new(),
            reconciling: DashMap::new(),
            subscribed: DashMap::new(),
            recent_requests: DashMap::new(),
            price_sink,
        })
    }

    // === Read-only accessors ===

    /// Snapshot of all open positions.
    pub fn open_positions(&self) -> Vec<Position> {
        self.open_cache.iter().map(|r| r.value().clone()).collect()
    }

    pub fn open_count(&self) -> usize {
        self.open_cache.len()
    }

    pub fn has_open(&self, symbol: &str) -> bool {
        self.open_cache.contains_key(symbol)
    }

    /// Symbols the monitor loop must visit: open plus reconciling.
    pub fn monitored_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> =
            self.open_cache.iter().map(|r| r.key().clone()).collect();
        for entry in self.reconciling.iter() {
            if !symbols.iter().any(|s| s == entry.key()) {
                symbols.push(entry.key().clone());
            }
        }
        symbols
    }

    // === Boot ===

    /// Rehydrate from the store and reconcile against the exchange.
    ///
    /// Rows the adapter confirms become `Open`; rows it cannot confirm are
    /// parked in `Reconciling` and settled by the monitor loop.
    pub async fn hydrate(&self) -> EngineResult<usize> {
        let stored = self.store.load_open().await?;
        if stored.is_empty() {
            return Ok(0);
        }

        let exchange = with_retry("get_positions", &DEFAULT_BACKOFF, || {
            self.bounded(self.adapter.get_positions())
        })
        .await;

        let mut restored = 0usize;
        for mut position in stored {
            let slot = self.slot(&position.symbol);
            let mut guard = slot.lock().await;

            let confirmed = match &exchange {
                Ok(list) => list.iter().any(|p| {
                    p.symbol == position.symbol
                        && !p.quantity.is_zero()
                        && p.quantity.is_sign_positive()
                            == position.quantity.inner().is_sign_positive()
                }),
                Err(_) => false,
            };

            if confirmed {
                position.status = PositionStatus::Open;
                self.ensure_subscribed(&position.symbol).await;
                self.open_cache
                    .insert(position.symbol.clone(), position.clone());
                info!(symbol = %position.symbol, entry = %position.entry_price, "position rehydrated");
                *guard = Slot::Open(position);
                restored += 1;
            } else {
                warn!(symbol = %position.symbol, "stored position not confirmed by adapter, reconciling");
                position.status = PositionStatus::Reconciling;
                self.store.upsert(&position).await?;
                self.reconciling.insert(position.symbol.clone(), ());
                *guard = Slot::Reconciling(Box::new(Pending::Close {
                    position,
                    reason: CloseReason::Forced,
                }));
            }
        }
        Ok(restored)
    }

    // === Mutating operations ===

    /// Open a position. Requires no current position on the symbol.
    pub async fn open(&self, request: OpenRequest) -> EngineResult<Position> {
        // Idempotent replay: a request id we have already opened returns the
        // recorded position without touching the adapter.
        if let Some(previous) = self.recent_requests.get(&request.request_id) {
            debug!(request_id = %request.request_id, "replayed open request");
            return Ok(previous.clone());
        }

        let slot = self.slot(&request.symbol);
        let mut guard = slot.lock().await;
        match &*guard {
            Slot::Empty => {}
            Slot::Reconciling(_) => return Err(EngineError::Reconciling(request.symbol.clone())),
            Slot::Open(_) | Slot::Modifying(_) | Slot::Closing(_) => {
                return Err(EngineError::PositionExists(request.symbol.clone()))
            }
            Slot::Opening => return Err(EngineError::Busy(request.symbol.clone())),
        }
        *guard = Slot::Opening;

        match self.do_open(&request).await {
            OpenFlow::Done(position) => {
                // Commit before the in-memory transition becomes visible.
                if let Err(err) = self.store.upsert(&position).await {
                    *guard = Slot::Empty;
                    return Err(err.into());
                }
                self.open_cache
                    .insert(position.symbol.clone(), position.clone());
                *guard = Slot::Open(position.clone());
                self.remember_request(&request.request_id, &position);
                info!(
                    symbol = %position.symbol,
                    direction = %position.direction,
                    entry = %position.entry_price,
                    contracts = %position.contracts_abs(),
                    leverage = position.leverage,
                    "position opened"
                );
                Ok(position)
            }
            OpenFlow::Abandoned(err) => {
                *guard = Slot::Empty;
                Err(err)
            }
            OpenFlow::Unresolved(pending, err) => {
                self.reconciling.insert(request.symbol.clone(), ());
                *guard = Slot::Reconciling(Box::new(Pending::Open(pending)));
                Err(err)
            }
        }
    }

    /// Close the position on `symbol`. Closing an already-flat symbol is a
    /// no-op success, so a manual close racing a monitor close is harmless.
    pub async fn close(&self, symbol: &str, reason: CloseReason) -> EngineResult<CloseOutcome> {
        let slot = self.slot(symbol);
        let mut guard = slot.lock().await;
        let position = match &*guard {
            Slot::Open(p) => p.clone(),
            Slot::Empty => return Ok(CloseOutcome::AlreadyFlat),
            Slot::Reconciling(_) => return Err(EngineError::Reconciling(symbol.to_string())),
            _ => return Err(EngineError::Busy(symbol.to_string())),
        };
        self.close_under_guard(&mut guard, position, reason).await
    }

    /// Ladder partial close: reduce by `floor(|quantity| * fraction)`
    /// contracts (at least one). A tranche that would flatten the position
    /// upgrades to a full take-profit close.
    pub async fn partial_close(
        &self,
        symbol: &str,
        fraction: Decimal,
        tier: u32,
    ) -> EngineResult<TickOutcome> {
        let slot = self.slot(symbol);
        let mut guard = slot.lock().await;
        let position = match &*guard {
            Slot::Open(p) => p.clone(),
            Slot::Empty => return Err(EngineError::NoSuchPosition(symbol.to_string())),
            Slot::Reconciling(_) => return Err(EngineError::Reconciling(symbol.to_string())),
            _ => return Err(EngineError::Busy(symbol.to_string())),
        };
        self.partial_under_guard(&mut guard, position, fraction, tier)
            .await
    }

    /// Update rule fields on a live position. The snapshot stays frozen
    /// otherwise.
    pub async fn modify(&self, symbol: &str, patch: &RulePatch) -> EngineResult<Position> {
        let slot = self.slot(symbol);
        let mut guard = slot.lock().await;
        let position = match &*guard {
            Slot::Open(p) => p.clone(),
            Slot::Empty => return Err(EngineError::NoSuchPosition(symbol.to_string())),
            Slot::Reconciling(_) => return Err(EngineError::Reconciling(symbol.to_string())),
            _ => return Err(EngineError::Busy(symbol.to_string())),
        };
        *guard = Slot::Modifying(position.clone());

        let mut updated = position.clone();
        patch.apply(&mut updated.rules);
        match self.store.upsert(&updated).await {
            Ok(()) => {
                self.open_cache
                    .insert(symbol.to_string(), updated.clone());
                *guard = Slot::Open(updated.clone());
                info!(symbol, "position rules modified");
                Ok(updated)
            }
            Err(err) => {
                // Fail closed: no in-memory change.
                *guard = Slot::Open(position);
                Err(err.into())
            }
        }
    }

    /// Close every open position, gathering per-symbol outcomes. Individual
    /// failures do not abort the sweep.
    pub async fn close_all(
        &self,
        reason: CloseReason,
    ) -> Vec<(String, EngineResult<CloseOutcome>)> {
        let symbols: Vec<String> = self.open_cache.iter().map(|r| r.key().clone()).collect();
        let mut outcomes = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            let outcome = self.close(&symbol, reason).await;
            outcomes.push((symbol, outcome));
        }
        outcomes
    }

    // === Monitor entry point ===

    /// One monitor visit for `symbol`: update watermarks, evaluate exit
    /// rules, dispatch the verdict. Reconciling slots get a resolution
    /// attempt instead.
    pub async fn tick_symbol(
        &self,
        symbol: &str,
        limits: &EvaluatorLimits,
    ) -> EngineResult<TickOutcome> {
        let slot = self.slot(symbol);
        let mut guard = slot.lock().await;

        if matches!(&*guard, Slot::Reconciling(_)) {
            return self.resolve_under_guard(symbol, &mut guard).await;
        }

        let mut position = match &*guard {
            Slot::Open(p) => p.clone(),
            _ => return Ok(TickOutcome::Idle),
        };

        let tick = match self.cache.reading(symbol) {
            PriceReading::Fresh(tick) => tick,
            PriceReading::Stale(_, age) => {
                Metrics::monitor_skip("stale_price");
                debug!(symbol, age_ms = age.as_millis() as u64, "skipping stale price");
                return Err(EngineError::PriceUnavailable(symbol.to_string()));
            }
            PriceReading::Unknown => {
                Metrics::monitor_skip("no_price");
                return Err(EngineError::PriceUnavailable(symbol.to_string()));
            }
        };

        // Watermarks move under the lock, before evaluation; they are
        // persisted on the next persisting transition.
        position.observe_price(tick.price);
        self.open_cache
            .insert(symbol.to_string(), position.clone());
        *guard = Slot::Open(position.clone());

        match evaluate(&position, tick.price, tick.age(), Utc::now(), limits) {
            Verdict::Hold => Ok(TickOutcome::Held),
            Verdict::Close(reason) => self
                .close_under_guard(&mut guard, position, reason)
                .await
                .map(|_| TickOutcome::Closed(reason)),
            Verdict::PartialClose { fraction, tier } => {
                self.partial_under_guard(&mut guard, position, fraction, tier)
                    .await
            }
        }
    }

    // === Internals ===

    fn slot(&self, symbol: &str) -> Arc<Mutex<Slot>> {
        self.slots
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Slot::Empty)))
            .value()
            .clone()
    }

    async fn bounded<T>(&self, fut: BoxFuture<'_, ExchangeResult<T>>) -> ExchangeResult<T> {
        match tokio::time::timeout(self.config.adapter_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(ExchangeError::Timeout),
        }
    }

    fn remember_request(&self, request_id: &str, position: &Position) {
        // Bounded: this only needs to cover crash-replay windows.
        if self.recent_requests.len() > 256 {
            self.recent_requests.clear();
        }
        self.recent_requests
            .insert(request_id.to_string(), position.clone());
    }

    fn rules_from(&self, request: &OpenRequest) -> RuleSnapshot {
        let defaults = self.config.rule_defaults;
        RuleSnapshot {
            tp_pct: request.tp_pct.unwrap_or(defaults.tp_pct),
            sl_pct: request.sl_pct.unwrap_or(defaults.sl_pct),
            trailing_enabled: request.trailing_stop.unwrap_or(defaults.trailing_enabled),
            trailing_distance: request
                .trailing_distance
                .unwrap_or(defaults.trailing_distance),
            ladder: request.ladder.unwrap_or(defaults.ladder),
        }
    }

    async fn current_mark(&self, symbol: &str) -> EngineResult<Price> {
        if let Some(price) = self.cache.reading(symbol).fresh_price() {
            return Ok(price);
        }
        with_retry("get_mark_price", &DEFAULT_BACKOFF, || {
            self.bounded(self.adapter.get_mark_price(symbol))
        })
        .await
        .map_err(EngineError::from_exchange)
    }

    /// Subscribe the symbol's mark price into the cache, once.
    async fn ensure_subscribed(&self, symbol: &str) {
        if self.subscribed.insert(symbol.to_string(), ()).is_some() {
            return;
        }
        let result = self
            .bounded(
                self.adapter
                    .subscribe_mark_price(vec![symbol.to_string()], self.price_sink.clone()),
            )
            .await;
        if let Err(err) = result {
            // Monitoring will skip the symbol until a tick arrives.
            warn!(symbol, error = %err, "mark price subscription failed");
            self.subscribed.remove(symbol);
        }
    }

    async fn do_open(&self, request: &OpenRequest) -> OpenFlow {
        let spec = match self.specs.get(&request.symbol).await {
            Ok(spec) => spec,
            Err(err) => return OpenFlow::Abandoned(err),
        };
        let mark = match self.current_mark(&request.symbol).await {
            Ok(price) => price,
            Err(err) => return OpenFlow::Abandoned(err),
        };

        // An operator-provided entry price acts as a protective cap on
        // market opens under the default policy.
        if let Some(cap) = request.entry_price {
            if self.config.entry_price_policy == EntryPricePolicy::Cap {
                let worse = match request.direction {
                    Direction::Long => mark.inner() > cap.inner(),
                    Direction::Short => mark.inner() < cap.inner(),
                };
                if worse {
                    return OpenFlow::Abandoned(EngineError::EntryCapExceeded(format!(
                        "mark {mark} is worse than {cap} for a {} open on {}",
                        request.direction, request.symbol
                    )));
                }
            }
        }

        let leverage = request.leverage.unwrap_or(self.config.default_leverage);
        if let Err(err) = with_retry("set_leverage", &DEFAULT_BACKOFF, || {
            self.bounded(self.adapter.set_leverage(&request.symbol, leverage))
        })
        .await
        {
            return OpenFlow::Abandoned(EngineError::from_exchange(err));
        }

        let limit = match self.config.entry_price_policy {
            EntryPricePolicy::Cap => request.entry_price,
            EntryPricePolicy::Ignore => None,
        };
        let reference = limit.unwrap_or(mark);
        let contracts = match sizer::contracts_for(
            &spec,
            request.quantity.unwrap_or(self.config.default_quantity),
            request.unit,
            reference,
            self.config.round_up_to_min_size,
        ) {
            Ok(contracts) => contracts,
            Err(err) => return OpenFlow::Abandoned(err),
        };

        let order = OrderRequest {
            symbol: request.symbol.clone(),
            side: OrderSide::opening(request.direction),
            pos_side: request.direction,
            contracts,
            price: limit,
            client_order_id: request.request_id.clone(),
            reduce_only: false,
        };

        let report = match with_retry("place_order", &DEFAULT_BACKOFF, || {
            self.bounded(self.adapter.place_order(order.clone()))
        })
        .await
        {
            Ok(report) => report,
            Err(ExchangeError::Timeout) => {
                let pending = PendingOpen {
                    request: request.clone(),
                    spec,
                    leverage,
                };
                return self.reconcile_open(&pending).await;
            }
            Err(err) => return OpenFlow::Abandoned(EngineError::from_exchange(err)),
        };
        Metrics::order_placed(&request.symbol, order.side.as_str());

        if report.filled_contracts.is_zero() {
            return OpenFlow::Abandoned(EngineError::AdapterError(format!(
                "order {} not filled (status {:?})",
                report.client_order_id, report.status
            )));
        }

        let position = Position::opened(
            request.symbol.clone(),
            report.order_id,
            request.direction,
            report.avg_fill_price,
            report.filled_contracts,
            leverage,
            spec.contract_size,
            self.rules_from(request),
            Utc::now(),
        );

        // Subscription must be requested before monitoring is armed.
        self.ensure_subscribed(&request.symbol).await;
        OpenFlow::Done(position)
    }

    /// Poll the adapter for the fate of a timed-out open order.
    async fn reconcile_open(&self, pending: &PendingOpen) -> OpenFlow {
        let request = &pending.request;
        let mut saw_response = false;
        for attempt in 0..=DEFAULT_BACKOFF.len() {
            match self.bounded(self.adapter.get_positions()).await {
                Ok(list) => {
                    saw_response = true;
                    let found = list.iter().find(|p| {
                        p.symbol == request.symbol
                            && !p.quantity.is_zero()
                            && p.quantity.is_sign_positive()
                                == (request.direction == Direction::Long)
                    });
                    if let Some(exchange_pos) = found {
                        info!(symbol = %request.symbol, "timed-out open confirmed filled");
                        let position = Position::opened(
                            request.symbol.clone(),
                            request.request_id.clone(),
                            request.direction,
                            exchange_pos.avg_price,
                            exchange_pos.quantity.abs(),
                            pending.leverage,
                            pending.spec.contract_size,
                            self.rules_from(request),
                            Utc::now(),
                        );
                        self.ensure_subscribed(&request.symbol).await;
                        return OpenFlow::Done(position);
                    }
                }
                Err(err) => {
                    warn!(symbol = %request.symbol, error = %err, "reconcile poll failed");
                }
            }
            if attempt < DEFAULT_BACKOFF.len() {
                tokio::time::sleep(DEFAULT_BACKOFF[attempt]).await;
            }
        }

        if saw_response {
            // The adapter answered and never showed the position: abandoned.
            info!(symbol = %request.symbol, "timed-out open declared abandoned");
            OpenFlow::Abandoned(EngineError::AdapterTimeout)
        } else {
            OpenFlow::Unresolved(pending.clone(), EngineError::AdapterTimeout)
        }
    }

    async fn do_close(&self, position: &Position, reason: CloseReason) -> CloseFlow {
        let order = OrderRequest {
            symbol: position.symbol.clone(),
            side: OrderSide::reducing(position.direction),
            pos_side: position.direction,
            contracts: position.contracts_abs(),
            price: None,
            client_order_id: format!("close-{}", position.position_id),
            reduce_only: true,
        };

        match with_retry("place_order", &DEFAULT_BACKOFF, || {
            self.bounded(self.adapter.place_order(order.clone()))
        })
        .await
        {
            Ok(report) => {
                Metrics::order_placed(&position.symbol, order.side.as_str());
                let mut closed = position.clone();
                closed.finalize_close(report.avg_fill_price, Utc::now(), reason);
                CloseFlow::Done(closed)
            }
            Err(ExchangeError::Timeout) => self.reconcile_close(position, reason).await,
            Err(err) => CloseFlow::NotReduced(EngineError::from_exchange(err)),
        }
    }

    /// Poll the adapter for the fate of a timed-out reduce. The position is
    /// not recorded closed until the adapter confirms it is gone.
    async fn reconcile_close(&self, position: &Position, reason: CloseReason) -> CloseFlow {
        let mut saw_response = false;
        for attempt in 0..=DEFAULT_BACKOFF.len() {
            match self.bounded(self.adapter.get_positions()).await {
                Ok(list) => {
                    saw_response = true;
                    let still_held = list
                        .iter()
                        .any(|p| p.symbol == position.symbol && !p.quantity.is_zero());
                    if !still_held {
                        let exit = self
                            .cache
                            .latest(&position.symbol)
                            .map(|t| t.price)
                            .unwrap_or(position.entry_price);
                        let mut closed = position.clone();
                        closed.finalize_close(exit, Utc::now(), reason);
                        info!(symbol = %position.symbol, "timed-out reduce confirmed");
                        return CloseFlow::Done(closed);
                    }
                }
                Err(err) => {
                    warn!(symbol = %position.symbol, error = %err, "reconcile poll failed");
                }
            }
            if attempt < DEFAULT_BACKOFF.len() {
                tokio::time::sleep(DEFAULT_BACKOFF[attempt]).await;
            }
        }

        if saw_response {
            CloseFlow::NotReduced(EngineError::AdapterTimeout)
        } else {
            CloseFlow::Unresolved(EngineError::AdapterTimeout)
        }
    }

    async fn close_under_guard(
        &self,
        guard: &mut Slot,
        position: Position,
        reason: CloseReason,
    ) -> EngineResult<CloseOutcome> {
        let symbol = position.symbol.clone();
        *guard = Slot::Closing(position.clone());

        match self.do_close(&position, reason).await {
            CloseFlow::Done(closed) => {
                if let Err(err) = self.store.record_close(&closed).await {
                    // The exchange is flat but the store is not; park the
                    // slot so the monitor retries the finalization.
                    self.reconciling.insert(symbol.clone(), ());
                    *guard = Slot::Reconciling(Box::new(Pending::Close { position, reason }));
                    return Err(err.into());
                }
                self.open_cache.remove(&symbol);
                self.reconciling.remove(&symbol);
                *guard = Slot::Empty;
                Metrics::position_exit(&symbol, reason.as_str());
                info!(
                    symbol = %symbol,
                    reason = %reason,
                    exit = %closed.exit_price.map(|p| p.to_string()).unwrap_or_default(),
                    realized_pnl = %closed.realized_pnl,
                    "position closed"
                );
                Ok(CloseOutcome::Closed(closed))
            }
            CloseFlow::NotReduced(err) => {
                *guard = Slot::Open(position);
                Err(err)
            }
            CloseFlow::Unresolved(err) => {
                self.reconciling.insert(symbol.clone(), ());
                *guard = Slot::Reconciling(Box::new(Pending::Close { position, reason }));
                Err(err)
            }
        }
    }

    async fn partial_under_guard(
        &self,
        guard: &mut Slot,
        position: Position,
        fraction: Decimal,
        tier: u32,
    ) -> EngineResult<TickOutcome> {
        let contracts = (position.contracts_abs() * fraction)
            .floor()
            .max(Decimal::ONE);
        if contracts >= position.contracts_abs() {
            return self
                .close_under_guard(guard, position, CloseReason::TakeProfit)
                .await
                .map(|_| TickOutcome::Closed(CloseReason::TakeProfit));
        }

        let order = OrderRequest {
            symbol: position.symbol.clone(),
            side: OrderSide::reducing(position.direction),
            pos_side: position.direction,
            contracts,
            price: None,
            client_order_id: format!("ladder-{}-{}", position.position_id, tier),
            reduce_only: true,
        };

        match with_retry("place_order", &DEFAULT_BACKOFF, || {
            self.bounded(self.adapter.place_order(order.clone()))
        })
        .await
        {
            Ok(report) => {
                Metrics::order_placed(&position.symbol, order.side.as_str());
                let mut updated = position.clone();
                updated.apply_partial_close(
                    report.filled_contracts,
                    report.avg_fill_price,
                    tier,
                    fraction,
                );
                if let Err(err) = self.store.upsert(&updated).await {
                    // The exchange already reduced; keep the truthful state
                    // in memory and let the next persisting write catch up.
                    warn!(symbol = %updated.symbol, error = %err, "partial close persisted late");
                }
                info!(
                    symbol = %updated.symbol,
                    tier,
                    closed = %report.filled_contracts,
                    remaining = %updated.contracts_abs(),
                    "ladder tranche closed"
                );
                self.open_cache
                    .insert(updated.symbol.clone(), updated.clone());
                *guard = Slot::Open(updated);
                Ok(TickOutcome::PartiallyClosed { tier })
            }
            Err(err) => {
                // The tier was not recorded, so the next tick retries.
                *guard = Slot::Open(position);
                Err(EngineError::from_exchange(err))
            }
        }
    }

    /// One resolution attempt for a reconciling slot.
    async fn resolve_under_guard(
        &self,
        symbol: &str,
        guard: &mut Slot,
    ) -> EngineResult<TickOutcome> {
        let pending = match &*guard {
            Slot::Reconciling(pending) => (**pending).clone(),
            _ => return Ok(TickOutcome::Idle),
        };

        let list = match self.bounded(self.adapter.get_positions()).await {
            Ok(list) => list,
            // Unreachable adapter: stay parked, try next tick.
            Err(_) => return Ok(TickOutcome::Idle),
        };

        match pending {
            Pending::Open(pending_open) => {
                let request = &pending_open.request;
                let found = list.iter().find(|p| {
                    p.symbol == request.symbol
                        && !p.quantity.is_zero()
                        && p.quantity.is_sign_positive()
                            == (request.direction == Direction::Long)
                });
                match found {
                    Some(exchange_pos) => {
                        let position = Position::opened(
                            request.symbol.clone(),
                            request.request_id.clone(),
                            request.direction,
                            exchange_pos.avg_price,
                            exchange_pos.quantity.abs(),
                            pending_open.leverage,
                            pending_open.spec.contract_size,
                            self.rules_from(request),
                            Utc::now(),
                        );
                        self.store.upsert(&position).await?;
                        self.ensure_subscribed(symbol).await;
                        self.open_cache.insert(symbol.to_string(), position.clone());
                        self.reconciling.remove(symbol);
                        *guard = Slot::Open(position);
                        info!(symbol, "reconciled open order as filled");
                    }
                    None => {
                        self.reconciling.remove(symbol);
                        *guard = Slot::Empty;
                        info!(symbol, "reconciled open order as abandoned");
                    }
                }
                Ok(TickOutcome::Resolved)
            }
            Pending::Close { position, reason } => {
                let still_held = list
                    .iter()
                    .any(|p| p.symbol == position.symbol && !p.quantity.is_zero());
                if still_held {
                    let mut restored = position;
                    restored.status = PositionStatus::Open;
                    self.store.upsert(&restored).await?;
                    self.ensure_subscribed(symbol).await;
                    self.open_cache
                        .insert(symbol.to_string(), restored.clone());
                    self.reconciling.remove(symbol);
                    *guard = Slot::Open(restored);
                    info!(symbol, "reconciled close: exchange still holds the position");
                } else {
                    let exit = self
                        .cache
                        .latest(symbol)
                        .map(|t| t.price)
                        .unwrap_or(position.entry_price);
                    let mut closed = position.clone();
                    closed.finalize_close(exit, Utc::now(), reason);
                    if let Err(err) = self.store.record_close(&closed).await {
                        // Stay parked and retry next tick.
                        return Err(err.into());
                    }
                    self.open_cache.remove(symbol);
                    self.reconciling.remove(symbol);
                    *guard = Slot::Empty;
                    Metrics::position_exit(symbol, reason.as_str());
                    info!(symbol, reason = %reason, "reconciled close finalized");
                }
                Ok(TickOutcome::Resolved)
            }
        }
    }
}
