//! SQLite-backed position store.
//!
//! Decimal columns are stored as TEXT and re-parsed through `rust_decimal`;
//! the SQLite driver has no exact decimal type and float columns are
//! forbidden for money in this codebase.

use crate::error::{StoreError, StoreResult};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tidemark_core::{Position, PositionStatus, Price, Qty};
use tracing::{debug, info};

const POSITION_COLUMNS: &str = "symbol, position_id, direction, entry_price, quantity, \
     opened_contracts, leverage, entry_ts, contract_size, tp_pct, sl_pct, trailing_enabled, \
     trailing_distance, ladder_enabled, ladder_step_pct, ladder_close_pct, high_watermark, \
     low_watermark, ladder_tier_hit, ladder_closed_fraction, realized_pnl, status, exit_price, \
     exit_ts, pnl_pct, close_reason";

const POSITION_PLACEHOLDERS: &str = "?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, \
     ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26";

/// Daily PnL rollup over closed positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyRollup {
    pub date: NaiveDate,
    pub realized_pnl: Decimal,
    pub closed_count: u32,
    pub wins: u32,
    pub losses: u32,
}

impl DailyRollup {
    /// Fraction of closed positions with positive realized PnL.
    pub fn win_rate(&self) -> Option<Decimal> {
        if self.closed_count == 0 {
            return None;
        }
        Some(Decimal::from(self.wins) / Decimal::from(self.closed_count))
    }
}

/// History query parameters.
#[derive(Debug, Clone)]
pub struct HistoryQuery {
    pub symbol: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub limit: u32,
}

/// The durable store.
pub struct PositionStore {
    pool: SqlitePool,
}

impl PositionStore {
    /// Open (creating if missing) the store at `path`.
    pub async fn open(path: &Path) -> StoreResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        info!(path = %path.display(), "position store opened");
        Ok(store)
    }

    async fn migrate(&self) -> StoreResult<()> {
        let open_table = format!(
            "CREATE TABLE IF NOT EXISTS positions_open (
                symbol TEXT PRIMARY KEY,
                {}
            )",
            POSITION_SCHEMA_TAIL
        );
        let history_table = format!(
            "CREATE TABLE IF NOT EXISTS positions_history (
                symbol TEXT NOT NULL,
                {},
                PRIMARY KEY (symbol, position_id)
            )",
            POSITION_SCHEMA_TAIL
        );
        sqlx::query(&open_table).execute(&self.pool).await?;
        sqlx::query(&history_table).execute(&self.pool).await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_history_exit_ts ON positions_history (exit_ts)",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Write the full record, keyed by symbol. Durable before return.
    pub async fn upsert(&self, position: &Position) -> StoreResult<()> {
        let sql = format!(
            "INSERT INTO positions_open ({POSITION_COLUMNS}) VALUES ({POSITION_PLACEHOLDERS})
             ON CONFLICT(symbol) DO UPDATE SET
                position_id = excluded.position_id,
                direction = excluded.direction,
                entry_price = excluded.entry_price,
                quantity = excluded.quantity,
                opened_contracts = excluded.opened_contracts,
                leverage = excluded.leverage,
                entry_ts = excluded.entry_ts,
                contract_size = excluded.contract_size,
                tp_pct = excluded.tp_pct,
                sl_pct = excluded.sl_pct,
                trailing_enabled = excluded.trailing_enabled,
                trailing_distance = excluded.trailing_distance,
                ladder_enabled = excluded.ladder_enabled,
                ladder_step_pct = excluded.ladder_step_pct,
                ladder_close_pct = excluded.ladder_close_pct,
                high_watermark = excluded.high_watermark,
                low_watermark = excluded.low_watermark,
                ladder_tier_hit = excluded.ladder_tier_hit,
                ladder_closed_fraction = excluded.ladder_closed_fraction,
                realized_pnl = excluded.realized_pnl,
                status = excluded.status,
                exit_price = excluded.exit_price,
                exit_ts = excluded.exit_ts,
                pnl_pct = excluded.pnl_pct,
                close_reason = excluded.close_reason"
        );
        bind_position(sqlx::query(&sql), position)
            .execute(&self.pool)
            .await?;
        debug!(symbol = %position.symbol, "position upserted");
        Ok(())
    }

    /// Load every non-closed position. Called once at boot.
    pub async fn load_open(&self) -> StoreResult<Vec<Position>> {
        let rows = sqlx::query(&format!("SELECT {POSITION_COLUMNS} FROM positions_open"))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_position).collect()
    }

    /// Finalize a position: remove the open row and append the history row
    /// in one transaction.
    ///
    /// `position` must carry its terminal fields (`exit_price`, `exit_ts`,
    /// `realized_pnl`, `pnl_pct`, `close_reason`).
    pub async fn record_close(&self, position: &Position) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM positions_open WHERE symbol = ?1")
            .bind(&position.symbol)
            .execute(&mut *tx)
            .await?;
        let sql = format!(
            "INSERT OR REPLACE INTO positions_history ({POSITION_COLUMNS})
             VALUES ({POSITION_PLACEHOLDERS})"
        );
        bind_position(sqlx::query(&sql), position)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        debug!(
            symbol = %position.symbol,
            position_id = %position.position_id,
            realized_pnl = %position.realized_pnl,
            "position closed"
        );
        Ok(())
    }

    /// Closed positions in `[start, end]`, reverse-chronological by exit.
    pub async fn query_history(&self, query: &HistoryQuery) -> StoreResult<Vec<Position>> {
        let rows = match &query.symbol {
            Some(symbol) => {
                let sql = format!(
                    "SELECT {POSITION_COLUMNS} FROM positions_history
                     WHERE exit_ts >= ?1 AND exit_ts <= ?2 AND symbol = ?3
                     ORDER BY exit_ts DESC LIMIT ?4"
                );
                sqlx::query(&sql)
                    .bind(query.start)
                    .bind(query.end)
                    .bind(symbol)
                    .bind(query.limit as i64)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let sql = format!(
                    "SELECT {POSITION_COLUMNS} FROM positions_history
                     WHERE exit_ts >= ?1 AND exit_ts <= ?2
                     ORDER BY exit_ts DESC LIMIT ?3"
                );
                sqlx::query(&sql)
                    .bind(query.start)
                    .bind(query.end)
                    .bind(query.limit as i64)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(row_to_position).collect()
    }

    /// Rollup over positions whose `exit_ts` falls in the given UTC day.
    ///
    /// Monotone once the day has closed: history rows are never mutated.
    pub async fn daily_rollup(&self, date: NaiveDate) -> StoreResult<DailyRollup> {
        let start = NaiveDateTime::new(date, NaiveTime::MIN).and_utc();
        let end = start + chrono::Duration::days(1);

        let rows = sqlx::query(
            "SELECT realized_pnl FROM positions_history WHERE exit_ts >= ?1 AND exit_ts < ?2",
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        let mut rollup = DailyRollup {
            date,
            realized_pnl: Decimal::ZERO,
            closed_count: 0,
            wins: 0,
            losses: 0,
        };
        for row in &rows {
            let pnl = get_decimal(row, "realized_pnl")?;
            rollup.realized_pnl += pnl;
            rollup.closed_count += 1;
            if pnl > Decimal::ZERO {
                rollup.wins += 1;
            } else if pnl < Decimal::ZERO {
                rollup.losses += 1;
            }
        }
        Ok(rollup)
    }
}

/// Column definitions shared by both tables (everything after `symbol`).
const POSITION_SCHEMA_TAIL: &str = "position_id TEXT NOT NULL,
    direction TEXT NOT NULL,
    entry_price TEXT NOT NULL,
    quantity TEXT NOT NULL,
    opened_contracts TEXT NOT NULL,
    leverage INTEGER NOT NULL,
    entry_ts TEXT NOT NULL,
    contract_size TEXT NOT NULL,
    tp_pct TEXT NOT NULL,
    sl_pct TEXT NOT NULL,
    trailing_enabled INTEGER NOT NULL,
    trailing_distance TEXT NOT NULL,
    ladder_enabled INTEGER NOT NULL,
    ladder_step_pct TEXT NOT NULL,
    ladder_close_pct TEXT NOT NULL,
    high_watermark TEXT NOT NULL,
    low_watermark TEXT NOT NULL,
    ladder_tier_hit INTEGER NOT NULL,
    ladder_closed_fraction TEXT NOT NULL,
    realized_pnl TEXT NOT NULL,
    status TEXT NOT NULL,
    exit_price TEXT,
    exit_ts TEXT,
    pnl_pct TEXT,
    close_reason TEXT";

type SqliteQuery<'q> = sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>;

fn bind_position<'q>(query: SqliteQuery<'q>, p: &'q Position) -> SqliteQuery<'q> {
    query
        .bind(&p.symbol)
        .bind(&p.position_id)
        .bind(p.direction.as_str())
        .bind(p.entry_price.inner().to_string())
        .bind(p.quantity.inner().to_string())
        .bind(p.opened_contracts.to_string())
        .bind(p.leverage as i64)
        .bind(p.entry_ts)
        .bind(p.contract_size.to_string())
        .bind(p.rules.tp_pct.to_string())
        .bind(p.rules.sl_pct.to_string())
        .bind(p.rules.trailing_enabled)
        .bind(p.rules.trailing_distance.to_string())
        .bind(p.rules.ladder.enabled)
        .bind(p.rules.ladder.step_pct.to_string())
        .bind(p.rules.ladder.close_pct.to_string())
        .bind(p.high_watermark.inner().to_string())
        .bind(p.low_watermark.inner().to_string())
        .bind(p.ladder_tier_hit as i64)
        .bind(p.ladder_closed_fraction.to_string())
        .bind(p.realized_pnl.to_string())
        .bind(p.status.as_str())
        .bind(p.exit_price.map(|x| x.inner().to_string()))
        .bind(p.exit_ts)
        .bind(p.pnl_pct.map(|x| x.to_string()))
        .bind(p.close_reason.map(|r| r.as_str().to_string()))
}

fn get_decimal(row: &SqliteRow, col: &str) -> StoreResult<Decimal> {
    let text: String = row.try_get(col)?;
    Decimal::from_str(&text).map_err(|e| StoreError::Corrupt(format!("{col}: {e}")))
}

fn get_opt_decimal(row: &SqliteRow, col: &str) -> StoreResult<Option<Decimal>> {
    let text: Option<String> = row.try_get(col)?;
    text.map(|t| Decimal::from_str(&t).map_err(|e| StoreError::Corrupt(format!("{col}: {e}"))))
        .transpose()
}

fn row_to_position(row: &SqliteRow) -> StoreResult<Position> {
    let direction = row.try_get::<String, _>("direction")?.parse()?;
    let status: PositionStatus = row.try_get::<String, _>("status")?.parse()?;
    let close_reason = row
        .try_get::<Option<String>, _>("close_reason")?
        .map(|r| r.parse())
        .transpose()?;

    Ok(Position {
        symbol: row.try_get("symbol")?,
        position_id: row.try_get("position_id")?,
        direction,
        entry_price: Price::new(get_decimal(row, "entry_price")?),
        quantity: Qty::new(get_decimal(row, "quantity")?),
        opened_contracts: get_decimal(row, "opened_contracts")?,
        leverage: row.try_get::<i64, _>("leverage")? as u32,
        entry_ts: row.try_get("entry_ts")?,
        contract_size: get_decimal(row, "contract_size")?,
        rules: tidemark_core::RuleSnapshot {
            tp_pct: get_decimal(row, "tp_pct")?,
            sl_pct: get_decimal(row, "sl_pct")?,
            trailing_enabled: row.try_get("trailing_enabled")?,
            trailing_distance: get_decimal(row, "trailing_distance")?,
            ladder: tidemark_core::LadderRules {
                enabled: row.try_get("ladder_enabled")?,
                step_pct: get_decimal(row, "ladder_step_pct")?,
                close_pct: get_decimal(row, "ladder_close_pct")?,
            },
        },
        high_watermark: Price::new(get_decimal(row, "high_watermark")?),
        low_watermark: Price::new(get_decimal(row, "low_watermark")?),
        ladder_tier_hit: row.try_get::<i64, _>("ladder_tier_hit")? as u32,
        ladder_closed_fraction: get_decimal(row, "ladder_closed_fraction")?,
        realized_pnl: get_decimal(row, "realized_pnl")?,
        status,
        exit_price: get_opt_decimal(row, "exit_price")?.map(Price::new),
        exit_ts: row.try_get("exit_ts")?,
        pnl_pct: get_opt_decimal(row, "pnl_pct")?,
        close_reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use tidemark_core::{CloseReason, Direction, RuleSnapshot};

    async fn test_store() -> (tempfile::TempDir, PositionStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = PositionStore::open(&dir.path().join("positions.db"))
            .await
            .unwrap();
        (dir, store)
    }

    fn sample_position(symbol: &str, entry_ts: DateTime<Utc>) -> Position {
        Position::opened(
            symbol.to_string(),
            format!("fill-{symbol}"),
            Direction::Long,
            Price::new(dec!(50000)),
            dec!(2),
            3,
            dec!(0.01),
            RuleSnapshot {
                tp_pct: dec!(0.05),
                sl_pct: dec!(0.03),
                ..RuleSnapshot::default()
            },
            entry_ts,
        )
    }

    fn ts(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 1, h, m, 0).unwrap()
    }

    #[tokio::test]
    async fn test_upsert_then_load_open_round_trips() {
        let (_dir, store) = test_store().await;
        let position = sample_position("BTC-USDT-SWAP", ts(9, 0));

        store.upsert(&position).await.unwrap();
        let loaded = store.load_open().await.unwrap();

        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0], position);
    }

    #[tokio::test]
    async fn test_upsert_replaces_same_symbol() {
        let (_dir, store) = test_store().await;
        let mut position = sample_position("BTC-USDT-SWAP", ts(9, 0));
        store.upsert(&position).await.unwrap();

        position.observe_price(Price::new(dec!(51000)));
        position.ladder_tier_hit = 2;
        store.upsert(&position).await.unwrap();

        let loaded = store.load_open().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].high_watermark, Price::new(dec!(51000)));
        assert_eq!(loaded[0].ladder_tier_hit, 2);
    }

    #[tokio::test]
    async fn test_record_close_moves_row_to_history() {
        let (_dir, store) = test_store().await;
        let mut position = sample_position("BTC-USDT-SWAP", ts(9, 0));
        store.upsert(&position).await.unwrap();

        position.finalize_close(Price::new(dec!(52500)), ts(10, 0), CloseReason::TakeProfit);
        store.record_close(&position).await.unwrap();

        assert!(store.load_open().await.unwrap().is_empty());

        let history = store
            .query_history(&HistoryQuery {
                symbol: None,
                start: ts(0, 0),
                end: ts(23, 59),
                limit: 10,
            })
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].realized_pnl, dec!(50.00));
        assert_eq!(history[0].close_reason, Some(CloseReason::TakeProfit));
    }

    #[tokio::test]
    async fn test_query_history_orders_and_filters() {
        let (_dir, store) = test_store().await;

        for (i, (symbol, hour)) in [("AAA", 9), ("BBB", 11), ("AAA", 13)].iter().enumerate() {
            let mut p = sample_position(symbol, ts(8, 0));
            p.position_id = format!("fill-{i}");
            p.finalize_close(Price::new(dec!(51000)), ts(*hour, 0), CloseReason::Manual);
            store.record_close(&p).await.unwrap();
        }

        let all = store
            .query_history(&HistoryQuery {
                symbol: None,
                start: ts(0, 0),
                end: ts(23, 59),
                limit: 10,
            })
            .await
            .unwrap();
        let hours: Vec<_> = all
            .iter()
            .map(|p| p.exit_ts.unwrap())
            .collect();
        assert_eq!(hours, vec![ts(13, 0), ts(11, 0), ts(9, 0)]);

        let aaa_only = store
            .query_history(&HistoryQuery {
                symbol: Some("AAA".to_string()),
                start: ts(0, 0),
                end: ts(23, 59),
                limit: 10,
            })
            .await
            .unwrap();
        assert_eq!(aaa_only.len(), 2);

        let limited = store
            .query_history(&HistoryQuery {
                symbol: None,
                start: ts(0, 0),
                end: ts(23, 59),
                limit: 1,
            })
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].exit_ts.unwrap(), ts(13, 0));
    }

    #[tokio::test]
    async fn test_daily_rollup_counts_wins_and_losses() {
        let (_dir, store) = test_store().await;

        // Two winners, one loser, closed the same day.
        for (i, exit_price) in [dec!(52500), dec!(51000), dec!(48000)].iter().enumerate() {
            let mut p = sample_position("SYM", ts(8, 0));
            p.symbol = format!("SYM-{i}");
            p.position_id = format!("fill-{i}");
            p.finalize_close(Price::new(*exit_price), ts(9 + i as u32, 0), CloseReason::Manual);
            store.record_close(&p).await.unwrap();
        }

        let rollup = store
            .daily_rollup(NaiveDate::from_ymd_opt(2026, 7, 1).unwrap())
            .await
            .unwrap();
        assert_eq!(rollup.closed_count, 3);
        assert_eq!(rollup.wins, 2);
        assert_eq!(rollup.losses, 1);
        // 2500*2*0.01 + 1000*2*0.01 - 2000*2*0.01 = 50 + 20 - 40 = 30
        assert_eq!(rollup.realized_pnl, dec!(30.00));
        assert_eq!(rollup.win_rate(), Some(dec!(2) / dec!(3)));

        // A different day is empty.
        let empty = store
            .daily_rollup(NaiveDate::from_ymd_opt(2026, 7, 2).unwrap())
            .await
            .unwrap();
        assert_eq!(empty.closed_count, 0);
        assert!(empty.win_rate().is_none());
    }
}
