//! End-to-end lifecycle scenarios against the paper and mock exchanges.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tempfile::TempDir;

use tidemark_core::{CloseReason, ContractSpec, Direction, LadderRules, Price, UnitType};
use tidemark_engine::{
    CloseOutcome, ManagerConfig, OpenRequest, PositionManager, Reporter,
};
use tidemark_engine::manager::TickOutcome;
use tidemark_engine::EngineError;
use tidemark_exchange::{DynExchange, ExchangeError, MockExchange, PaperExchange};
use tidemark_feed::PriceCache;
use tidemark_risk::EvaluatorLimits;
use tidemark_store::PositionStore;

fn btc_spec() -> ContractSpec {
    ContractSpec {
        symbol: "BTC-USDT-SWAP".to_string(),
        contract_size: dec!(0.01),
        price_precision: 1,
        size_precision: 0,
        min_size: dec!(1),
    }
}

fn eth_spec() -> ContractSpec {
    ContractSpec {
        symbol: "ETH-USDT-SWAP".to_string(),
        contract_size: dec!(0.1),
        price_precision: 2,
        size_precision: 0,
        min_size: dec!(1),
    }
}

fn sim_spec() -> ContractSpec {
    ContractSpec {
        symbol: "SIM-USDT-SWAP".to_string(),
        contract_size: dec!(0.01),
        price_precision: 2,
        size_precision: 0,
        min_size: dec!(1),
    }
}

struct Rig {
    _dir: TempDir,
    store: Arc<PositionStore>,
    cache: Arc<PriceCache>,
    manager: Arc<PositionManager>,
}

async fn rig(adapter: DynExchange) -> Rig {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        PositionStore::open(&dir.path().join("positions.db"))
            .await
            .unwrap(),
    );
    let cache = Arc::new(PriceCache::new(Duration::from_secs(30)));
    let manager = PositionManager::new(
        adapter,
        store.clone(),
        cache.clone(),
        ManagerConfig::default(),
    );
    Rig {
        _dir: dir,
        store,
        cache,
        manager,
    }
}

fn open_req(symbol: &str, direction: Direction) -> OpenRequest {
    OpenRequest {
        symbol: symbol.to_string(),
        direction,
        quantity: None,
        unit: UnitType::Quote,
        entry_price: None,
        leverage: None,
        tp_pct: None,
        sl_pct: None,
        trailing_stop: None,
        trailing_distance: None,
        ladder: None,
        request_id: uuid::Uuid::new_v4().to_string(),
    }
}

fn limits() -> EvaluatorLimits {
    EvaluatorLimits::default()
}

// Scenario 1: open long, monitor observes the take-profit price, realized
// PnL lands in the store.
#[tokio::test]
async fn scenario_take_profit_close() {
    let paper =
        Arc::new(PaperExchange::new().with_instrument(btc_spec(), Price::new(dec!(50000))));
    let rig = rig(paper.clone()).await;

    let mut req = open_req("BTC-USDT-SWAP", Direction::Long);
    req.quantity = Some(dec!(0.01));
    req.unit = UnitType::Base;
    req.leverage = Some(3);
    req.tp_pct = Some(dec!(0.05));
    req.sl_pct = Some(dec!(0.03));

    let position = rig.manager.open(req).await.unwrap();
    assert_eq!(position.contracts_abs(), dec!(1));
    assert_eq!(position.entry_price, Price::new(dec!(50000)));
    assert_eq!(paper.leverage_for("BTC-USDT-SWAP"), Some(3));

    // Price reaches exactly u = 0.05: inclusive take-profit.
    paper.set_mark("BTC-USDT-SWAP", Price::new(dec!(52500)));
    let outcome = rig
        .manager
        .tick_symbol("BTC-USDT-SWAP", &limits())
        .await
        .unwrap();
    assert_eq!(outcome, TickOutcome::Closed(CloseReason::TakeProfit));
    assert_eq!(rig.manager.open_count(), 0);

    let rollup = rig
        .store
        .daily_rollup(chrono::Utc::now().date_naive())
        .await
        .unwrap();
    assert_eq!(rollup.realized_pnl, dec!(25.00));
    assert_eq!(rollup.wins, 1);
}

// Scenario 2: short with trailing stop; watermark follows 1990 -> 1950, the
// retrace to 1989.5 crosses 1950 * 1.02 and fires.
#[tokio::test]
async fn scenario_trailing_stop_short() {
    let paper =
        Arc::new(PaperExchange::new().with_instrument(eth_spec(), Price::new(dec!(2000))));
    let rig = rig(paper.clone()).await;

    let mut req = open_req("ETH-USDT-SWAP", Direction::Short);
    req.quantity = Some(dec!(1));
    req.unit = UnitType::Contract;
    req.trailing_stop = Some(true);
    req.trailing_distance = Some(dec!(0.02));

    rig.manager.open(req).await.unwrap();

    for price in [dec!(1990), dec!(1950)] {
        paper.set_mark("ETH-USDT-SWAP", Price::new(price));
        let outcome = rig
            .manager
            .tick_symbol("ETH-USDT-SWAP", &limits())
            .await
            .unwrap();
        assert_eq!(outcome, TickOutcome::Held);
    }

    paper.set_mark("ETH-USDT-SWAP", Price::new(dec!(1989.5)));
    let outcome = rig
        .manager
        .tick_symbol("ETH-USDT-SWAP", &limits())
        .await
        .unwrap();
    assert_eq!(outcome, TickOutcome::Closed(CloseReason::TrailingStop));
}

// Scenario 3: ladder with step 1% / close 25% of the remaining quantity:
// 4 -> 3 -> 2 -> 1 contracts, then the fourth tier collapses to a full
// take-profit close.
#[tokio::test]
async fn scenario_ladder_progression() {
    let paper =
        Arc::new(PaperExchange::new().with_instrument(sim_spec(), Price::new(dec!(100))));
    let rig = rig(paper.clone()).await;

    let mut req = open_req("SIM-USDT-SWAP", Direction::Long);
    req.quantity = Some(dec!(4));
    req.unit = UnitType::Contract;
    req.ladder = Some(LadderRules {
        enabled: true,
        step_pct: dec!(0.01),
        close_pct: dec!(0.25),
    });

    rig.manager.open(req).await.unwrap();

    let mut expected_remaining = vec![dec!(3), dec!(2), dec!(1)].into_iter();
    for (tier, price) in [(1u32, dec!(101)), (2, dec!(102)), (3, dec!(103))] {
        paper.set_mark("SIM-USDT-SWAP", Price::new(price));
        let outcome = rig
            .manager
            .tick_symbol("SIM-USDT-SWAP", &limits())
            .await
            .unwrap();
        assert_eq!(outcome, TickOutcome::PartiallyClosed { tier });
        let open = rig.manager.open_positions();
        assert_eq!(open[0].contracts_abs(), expected_remaining.next().unwrap());
    }

    paper.set_mark("SIM-USDT-SWAP", Price::new(dec!(104)));
    let outcome = rig
        .manager
        .tick_symbol("SIM-USDT-SWAP", &limits())
        .await
        .unwrap();
    assert_eq!(outcome, TickOutcome::Closed(CloseReason::TakeProfit));

    // Tranches: 1@101 + 1@102 + 1@103 + final 1@104, contract size 0.01.
    let history = rig
        .store
        .query_history(&tidemark_store::HistoryQuery {
            symbol: Some("SIM-USDT-SWAP".to_string()),
            start: chrono::Utc::now() - chrono::Duration::hours(1),
            end: chrono::Utc::now() + chrono::Duration::hours(1),
            limit: 10,
        })
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].realized_pnl, dec!(0.10));
}

// Scenario 4: a manual close and a monitor close race on the symbol lock;
// exactly one reducing order is placed and one history row written.
#[tokio::test]
async fn scenario_concurrent_close_race() {
    let paper =
        Arc::new(PaperExchange::new().with_instrument(btc_spec(), Price::new(dec!(50000))));
    let rig = rig(paper.clone()).await;

    let mut req = open_req("BTC-USDT-SWAP", Direction::Long);
    req.quantity = Some(dec!(2));
    req.unit = UnitType::Contract;
    rig.manager.open(req).await.unwrap();
    let orders_after_open = paper.order_count();

    let m1 = rig.manager.clone();
    let m2 = rig.manager.clone();
    let (a, b) = tokio::join!(
        m1.close("BTC-USDT-SWAP", CloseReason::Manual),
        m2.close("BTC-USDT-SWAP", CloseReason::StopLoss),
    );

    let outcomes = [a.unwrap(), b.unwrap()];
    let closed = outcomes
        .iter()
        .filter(|o| matches!(o, CloseOutcome::Closed(_)))
        .count();
    let flat = outcomes
        .iter()
        .filter(|o| matches!(o, CloseOutcome::AlreadyFlat))
        .count();
    assert_eq!((closed, flat), (1, 1));

    // Exactly one reducing order reached the exchange.
    assert_eq!(paper.order_count(), orders_after_open + 1);

    let history = rig
        .store
        .query_history(&tidemark_store::HistoryQuery {
            symbol: None,
            start: chrono::Utc::now() - chrono::Duration::hours(1),
            end: chrono::Utc::now() + chrono::Duration::hours(1),
            limit: 10,
        })
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
}

// Scenario 5: crash-restart. The store row survives, a fresh process
// rehydrates it, reporting sees it, and the monitor resumes evaluating.
#[tokio::test]
async fn scenario_crash_restart_rehydrates() {
    let paper =
        Arc::new(PaperExchange::new().with_instrument(btc_spec(), Price::new(dec!(50000))));

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("positions.db");

    // First process: open, then "crash" (drop the manager).
    {
        let store = Arc::new(PositionStore::open(&db_path).await.unwrap());
        let cache = Arc::new(PriceCache::new(Duration::from_secs(30)));
        let manager = PositionManager::new(
            paper.clone() as DynExchange,
            store,
            cache,
            ManagerConfig::default(),
        );
        let mut req = open_req("BTC-USDT-SWAP", Direction::Long);
        req.quantity = Some(dec!(1));
        req.unit = UnitType::Contract;
        req.tp_pct = Some(dec!(0.05));
        manager.open(req).await.unwrap();
    }

    // Second process over the same store and exchange.
    let store = Arc::new(PositionStore::open(&db_path).await.unwrap());
    let cache = Arc::new(PriceCache::new(Duration::from_secs(30)));
    let manager = PositionManager::new(
        paper.clone() as DynExchange,
        store.clone(),
        cache.clone(),
        ManagerConfig::default(),
    );

    let restored = manager.hydrate().await.unwrap();
    assert_eq!(restored, 1);

    let reporter = Reporter::new(manager.clone(), store, cache);
    let status = reporter.status();
    assert_eq!(status.positions.len(), 1);
    assert_eq!(status.positions[0].symbol, "BTC-USDT-SWAP");

    // Monitoring resumes: the rehydrated position takes profit.
    paper.set_mark("BTC-USDT-SWAP", Price::new(dec!(52500)));
    let outcome = manager
        .tick_symbol("BTC-USDT-SWAP", &limits())
        .await
        .unwrap();
    assert_eq!(outcome, TickOutcome::Closed(CloseReason::TakeProfit));
}

// Scenario 6: the open order times out, polling get_positions never shows a
// fill, the open is declared abandoned and the symbol returns to flat.
#[tokio::test(start_paused = true)]
async fn scenario_open_timeout_declared_abandoned() {
    let mock = Arc::new(MockExchange::new().with_instrument(btc_spec(), Price::new(dec!(50000))));
    // Initial attempt plus three backoff retries.
    for _ in 0..4 {
        mock.push_place_result(Err(ExchangeError::Timeout));
    }
    let rig = rig(mock.clone()).await;

    let mut req = open_req("BTC-USDT-SWAP", Direction::Long);
    req.quantity = Some(dec!(1));
    req.unit = UnitType::Contract;

    let err = rig.manager.open(req).await.unwrap_err();
    assert!(matches!(err, EngineError::AdapterTimeout));
    assert_eq!(rig.manager.open_count(), 0);

    // The symbol is usable again: the next open fills normally.
    let mut retry = open_req("BTC-USDT-SWAP", Direction::Long);
    retry.quantity = Some(dec!(1));
    retry.unit = UnitType::Contract;
    let position = rig.manager.open(retry).await.unwrap();
    assert_eq!(position.contracts_abs(), dec!(1));
}

// Replaying an open with the same request id returns the recorded position
// without a second exchange order.
#[tokio::test]
async fn replayed_open_request_is_idempotent() {
    let paper =
        Arc::new(PaperExchange::new().with_instrument(btc_spec(), Price::new(dec!(50000))));
    let rig = rig(paper.clone()).await;

    let mut req = open_req("BTC-USDT-SWAP", Direction::Long);
    req.quantity = Some(dec!(1));
    req.unit = UnitType::Contract;

    let first = rig.manager.open(req.clone()).await.unwrap();
    let second = rig.manager.open(req).await.unwrap();

    assert_eq!(first.position_id, second.position_id);
    assert_eq!(paper.order_count(), 1);
    assert_eq!(rig.manager.open_count(), 1);
}

// A close-order timeout whose reconciliation still sees the position on the
// exchange restores Open; once the exchange reports it gone, the close is
// finalized.
#[tokio::test(start_paused = true)]
async fn close_timeout_reconciles_both_ways() {
    let mock = Arc::new(MockExchange::new().with_instrument(btc_spec(), Price::new(dec!(50000))));
    let rig = rig(mock.clone()).await;

    let mut req = open_req("BTC-USDT-SWAP", Direction::Long);
    req.quantity = Some(dec!(1));
    req.unit = UnitType::Contract;
    rig.manager.open(req).await.unwrap();

    // First close attempt: all order sends time out, and the exchange still
    // holds the position -> back to Open, nothing recorded.
    for _ in 0..4 {
        mock.push_place_result(Err(ExchangeError::Timeout));
    }
    mock.set_positions(vec![tidemark_exchange::ExchangePosition {
        symbol: "BTC-USDT-SWAP".to_string(),
        quantity: Decimal::ONE,
        avg_price: Price::new(dec!(50000)),
        leverage: 3,
    }]);

    let err = rig
        .manager
        .close("BTC-USDT-SWAP", CloseReason::Manual)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::AdapterTimeout));
    assert!(rig.manager.has_open("BTC-USDT-SWAP"));

    // Second attempt: sends time out again but the exchange reports the
    // position gone -> the reduce is confirmed and the close finalizes.
    for _ in 0..4 {
        mock.push_place_result(Err(ExchangeError::Timeout));
    }
    mock.set_positions(vec![]);

    let outcome = rig
        .manager
        .close("BTC-USDT-SWAP", CloseReason::Manual)
        .await
        .unwrap();
    assert!(matches!(outcome, CloseOutcome::Closed(_)));
    assert!(!rig.manager.has_open("BTC-USDT-SWAP"));

    let history = rig
        .store
        .query_history(&tidemark_store::HistoryQuery {
            symbol: None,
            start: chrono::Utc::now() - chrono::Duration::hours(1),
            end: chrono::Utc::now() + chrono::Duration::hours(1),
            limit: 10,
        })
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
}

// Stop-loss fires inclusively at u == -sl_pct.
#[tokio::test]
async fn stop_loss_close_is_inclusive() {
    let paper =
        Arc::new(PaperExchange::new().with_instrument(btc_spec(), Price::new(dec!(50000))));
    let rig = rig(paper.clone()).await;

    let mut req = open_req("BTC-USDT-SWAP", Direction::Long);
    req.quantity = Some(dec!(1));
    req.unit = UnitType::Contract;
    req.sl_pct = Some(dec!(0.03));
    rig.manager.open(req).await.unwrap();

    paper.set_mark("BTC-USDT-SWAP", Price::new(dec!(48500)));
    assert_eq!(
        rig.manager
            .tick_symbol("BTC-USDT-SWAP", &limits())
            .await
            .unwrap(),
        TickOutcome::Closed(CloseReason::StopLoss)
    );
}

// Rule modifications apply atomically and leave the rest of the snapshot
// frozen.
#[tokio::test]
async fn modify_updates_only_named_rules() {
    let paper =
        Arc::new(PaperExchange::new().with_instrument(btc_spec(), Price::new(dec!(50000))));
    let rig = rig(paper.clone()).await;

    let mut req = open_req("BTC-USDT-SWAP", Direction::Long);
    req.quantity = Some(dec!(1));
    req.unit = UnitType::Contract;
    req.tp_pct = Some(dec!(0.05));
    req.sl_pct = Some(dec!(0.03));
    rig.manager.open(req).await.unwrap();

    let patch = tidemark_engine::RulePatch {
        sl_pct: Some(dec!(0.01)),
        ..Default::default()
    };
    let updated = rig.manager.modify("BTC-USDT-SWAP", &patch).await.unwrap();
    assert_eq!(updated.rules.sl_pct, dec!(0.01));
    assert_eq!(updated.rules.tp_pct, dec!(0.05));

    // The store saw the change too.
    let loaded = rig.store.load_open().await.unwrap();
    assert_eq!(loaded[0].rules.sl_pct, dec!(0.01));
}

// close_all sweeps every symbol and reports per-symbol outcomes.
#[tokio::test]
async fn close_all_reports_each_symbol() {
    let paper = Arc::new(
        PaperExchange::new()
            .with_instrument(btc_spec(), Price::new(dec!(50000)))
            .with_instrument(eth_spec(), Price::new(dec!(2000))),
    );
    let rig = rig(paper.clone()).await;

    for symbol in ["BTC-USDT-SWAP", "ETH-USDT-SWAP"] {
        let mut req = open_req(symbol, Direction::Long);
        req.quantity = Some(dec!(1));
        req.unit = UnitType::Contract;
        rig.manager.open(req).await.unwrap();
    }
    assert_eq!(rig.manager.open_count(), 2);

    let outcomes = rig.manager.close_all(CloseReason::Manual).await;
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|(_, r)| r.is_ok()));
    assert_eq!(rig.manager.open_count(), 0);
}
