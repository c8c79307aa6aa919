//! Read-only reporting views.
//!
//! Pure joins over the position manager's open snapshot, the price cache,
//! and the store. Nothing here mutates state.

use crate::error::EngineResult;
use crate::manager::PositionManager;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tidemark_core::{Position, RuleSnapshot};
use tidemark_feed::PriceCache;
use tidemark_store::{HistoryQuery, PositionStore};

/// One open position with live valuation.
#[derive(Debug, Clone, Serialize)]
pub struct OpenPositionReport {
    pub symbol: String,
    pub position_id: String,
    pub direction: String,
    pub entry_price: Decimal,
    /// Signed contracts.
    pub quantity: Decimal,
    pub leverage: u32,
    pub entry_ts: DateTime<Utc>,
    pub rules: RuleSnapshot,
    pub high_watermark: Decimal,
    pub low_watermark: Decimal,
    pub ladder_tier_hit: u32,
    /// Realized so far by ladder tranches.
    pub realized_pnl: Decimal,
    /// `None` when no usable mark price is cached.
    pub mark_price: Option<Decimal>,
    pub unrealized_pnl: Option<Decimal>,
    /// Unleveraged move fraction.
    pub pnl_pct: Option<Decimal>,
    /// `pnl_pct * leverage`: the return on posted margin.
    pub leveraged_pnl_pct: Option<Decimal>,
}

/// Status snapshot returned by the HTTP API.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub positions: Vec<OpenPositionReport>,
    pub generated_at: DateTime<Utc>,
}

/// Today's realized performance.
#[derive(Debug, Clone, Serialize)]
pub struct DailyPnlReport {
    pub date: NaiveDate,
    pub realized_pnl: Decimal,
    pub closed_count: u32,
    pub wins: u32,
    pub losses: u32,
    pub win_rate: Option<Decimal>,
}

pub struct Reporter {
    manager: Arc<PositionManager>,
    store: Arc<PositionStore>,
    cache: Arc<PriceCache>,
}

impl Reporter {
    pub fn new(
        manager: Arc<PositionManager>,
        store: Arc<PositionStore>,
        cache: Arc<PriceCache>,
    ) -> Self {
        Self {
            manager,
            store,
            cache,
        }
    }

    /// Open positions joined with the latest mark prices.
    pub fn status(&self) -> StatusReport {
        let positions = self
            .manager
            .open_positions()
            .into_iter()
            .map(|p| self.valued(p))
            .collect();
        StatusReport {
            positions,
            generated_at: Utc::now(),
        }
    }

    fn valued(&self, position: Position) -> OpenPositionReport {
        let mark = self
            .cache
            .reading(&position.symbol)
            .fresh_price();
        let pnl_pct = mark.and_then(|m| position.unleveraged_move(m));
        OpenPositionReport {
            mark_price: mark.map(|m| m.inner()),
            unrealized_pnl: mark.map(|m| position.unrealized_pnl(m)),
            leveraged_pnl_pct: pnl_pct.map(|u| u * Decimal::from(position.leverage)),
            pnl_pct,
            symbol: position.symbol,
            position_id: position.position_id,
            direction: position.direction.as_str().to_string(),
            entry_price: position.entry_price.inner(),
            quantity: position.quantity.inner(),
            leverage: position.leverage,
            entry_ts: position.entry_ts,
            rules: position.rules,
            high_watermark: position.high_watermark.inner(),
            low_watermark: position.low_watermark.inner(),
            ladder_tier_hit: position.ladder_tier_hit,
            realized_pnl: position.realized_pnl,
        }
    }

    /// Today's realized PnL rollup (UTC day).
    pub async fn daily_pnl(&self) -> EngineResult<DailyPnlReport> {
        let date = Utc::now().date_naive();
        let rollup = self.store.daily_rollup(date).await?;
        Ok(DailyPnlReport {
            date,
            realized_pnl: rollup.realized_pnl,
            closed_count: rollup.closed_count,
            wins: rollup.wins,
            losses: rollup.losses,
            win_rate: rollup.win_rate(),
        })
    }

    /// Closed-position history window, reverse-chronological.
    pub async fn history(&self, query: &HistoryQuery) -> EngineResult<Vec<Position>> {
        Ok(self.store.query_history(query).await?)
    }
}
