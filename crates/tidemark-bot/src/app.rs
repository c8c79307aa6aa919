//! Application wiring and lifecycle.
//!
//! Builds every subsystem with explicit construction-time injection (no
//! global singletons), hydrates positions from the store, spawns the
//! monitor loop and the HTTP API, and coordinates an ordered shutdown:
//! monitor first, a bounded drain of in-flight work, then the HTTP server.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tidemark_api::{serve, ApiState};
use tidemark_core::{ContractSpec, Price};
use tidemark_engine::{MonitorLoop, PositionManager, Reporter};
use tidemark_exchange::{DynExchange, PaperExchange};
use tidemark_feed::PriceCache;
use tidemark_router::SignalRouter;
use tidemark_store::PositionStore;

use crate::config::AppConfig;
use crate::error::AppResult;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub struct Application {
    config: AppConfig,
}

impl Application {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    /// Run until interrupted.
    pub async fn run(self) -> AppResult<()> {
        let config = self.config;

        // Store, with its parent directory created on first run.
        let db_path = PathBuf::from(&config.store.path);
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let store = Arc::new(PositionStore::open(&db_path).await?);

        let cache = Arc::new(PriceCache::new(Duration::from_secs(
            config.monitor.max_price_age_secs,
        )));

        let adapter = build_paper_adapter(&config);

        let manager = PositionManager::new(
            adapter,
            store.clone(),
            cache.clone(),
            config.manager_config(),
        );

        let restored = manager.hydrate().await?;
        if restored > 0 {
            info!(restored, "rehydrated open positions from the store");
        }

        let router = Arc::new(SignalRouter::new(
            manager.clone(),
            store.clone(),
            config.router.clone(),
        ));
        let reporter = Arc::new(Reporter::new(manager.clone(), store.clone(), cache.clone()));

        let monitor_cancel = CancellationToken::new();
        let monitor = MonitorLoop::new(
            manager.clone(),
            config.monitor_interval(),
            config.evaluator_limits(),
            monitor_cancel.clone(),
        );
        let monitor_task = tokio::spawn(monitor.run());

        let api_cancel = CancellationToken::new();
        let api_state = ApiState {
            router,
            reporter,
            config: config.api.clone(),
        };
        let api_task = tokio::spawn(serve(api_state, api_cancel.clone()));

        info!("tidemark running");
        tokio::signal::ctrl_c().await?;
        info!("shutdown requested");

        // Monitor first, so no new exits start while we drain.
        monitor_cancel.cancel();
        if tokio::time::timeout(SHUTDOWN_GRACE, monitor_task)
            .await
            .is_err()
        {
            warn!("monitor loop did not stop within the grace window");
        }

        api_cancel.cancel();
        match tokio::time::timeout(SHUTDOWN_GRACE, api_task).await {
            Ok(Ok(Err(err))) => warn!(error = %err, "HTTP server exited with an error"),
            Ok(_) => {}
            Err(_) => warn!("HTTP server did not stop within the grace window"),
        }

        info!("shutdown complete");
        Ok(())
    }
}

fn build_paper_adapter(config: &AppConfig) -> DynExchange {
    let mut paper = PaperExchange::new();
    for instrument in &config.paper.instruments {
        paper = paper.with_instrument(
            ContractSpec {
                symbol: instrument.symbol.clone(),
                contract_size: instrument.contract_size,
                price_precision: instrument.price_precision,
                size_precision: instrument.size_precision,
                min_size: instrument.min_size,
            },
            Price::new(instrument.mark_price),
        );
    }
    info!(
        instruments = config.paper.instruments.len(),
        "paper exchange adapter ready"
    );
    Arc::new(paper)
}
