use std::path::Path;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection};

use crate::error::PersistenceError;

use super::{
    BotEventRow, ExitOutcomeRow, ExitVintageLogRow, FillRow, OhlcvCandleRow, PersistenceStore,
    PriceHistoryRow, Snapshot,
};

const SNAPSHOT_KEY: &str = "__v1__";

/// Production adapter over `rusqlite` (spec.md §6.2). The loop is a
/// single-threaded `tokio` executor (SPEC_FULL §5), so every call here runs
/// its query synchronously on the current task rather than shelling out to
/// `spawn_blocking` — there is no second thread it could block.
pub struct SqlitePersistenceStore {
    conn: Mutex<Connection>,
}

impl SqlitePersistenceStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let conn = Connection::open(path).map_err(|e| PersistenceError::Backend(e.to_string()))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory().map_err(|e| PersistenceError::Backend(e.to_string()))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, PersistenceError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS bot_state (key TEXT PRIMARY KEY, value TEXT NOT NULL);
             CREATE TABLE IF NOT EXISTS fills (
                slot_id INTEGER, txid TEXT, side TEXT, price REAL, volume REAL, fee REAL, filled_at TEXT
             );
             CREATE TABLE IF NOT EXISTS bot_events (
                slot_id INTEGER, kind TEXT, detail TEXT, at TEXT
             );
             CREATE TABLE IF NOT EXISTS price_history (price REAL, at TEXT);
             CREATE TABLE IF NOT EXISTS ohlcv_candles (
                interval_sec INTEGER, open REAL, high REAL, low REAL, close REAL, volume REAL, closed_at TEXT
             );
             CREATE TABLE IF NOT EXISTS exit_outcomes (
                slot_id INTEGER, trade_id TEXT, cycle INTEGER, net_profit REAL, from_recovery INTEGER, exit_time TEXT
             );
             CREATE TABLE IF NOT EXISTS exit_vintage_log (
                slot_id INTEGER, trade_id TEXT, age_bucket_sec INTEGER, count INTEGER, sampled_at TEXT
             );",
        )
        .map_err(|e| PersistenceError::Backend(e.to_string()))?;
        Ok(Self { conn: Mutex::new(conn) })
    }
}

#[async_trait]
impl PersistenceStore for SqlitePersistenceStore {
    async fn load_snapshot(&self) -> Result<Option<Snapshot>, PersistenceError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT value FROM bot_state WHERE key = ?1")
            .map_err(|e| PersistenceError::Backend(e.to_string()))?;
        let mut rows = stmt
            .query(params![SNAPSHOT_KEY])
            .map_err(|e| PersistenceError::Backend(e.to_string()))?;
        match rows.next().map_err(|e| PersistenceError::Backend(e.to_string()))? {
            Some(row) => {
                let raw: String = row.get(0).map_err(|e| PersistenceError::Backend(e.to_string()))?;
                let snapshot = serde_json::from_str(&raw)?;
                Ok(Some(snapshot))
            }
            None => Ok(None),
        }
    }

    async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), PersistenceError> {
        let raw = serde_json::to_string(snapshot)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO bot_state (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![SNAPSHOT_KEY, raw],
        )
        .map_err(|e| PersistenceError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn append_fill(&self, row: FillRow) -> Result<(), PersistenceError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO fills (slot_id, txid, side, price, volume, fee, filled_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![row.slot_id, row.txid, row.side, row.price, row.volume, row.fee, row.filled_at.to_rfc3339()],
        )
        .map_err(|e| PersistenceError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn append_bot_event(&self, row: BotEventRow) -> Result<(), PersistenceError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO bot_events (slot_id, kind, detail, at) VALUES (?1, ?2, ?3, ?4)",
            params![row.slot_id, row.kind, row.detail, row.at.to_rfc3339()],
        )
        .map_err(|e| PersistenceError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn append_price_history(&self, row: PriceHistoryRow) -> Result<(), PersistenceError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO price_history (price, at) VALUES (?1, ?2)",
            params![row.price, row.at.to_rfc3339()],
        )
        .map_err(|e| PersistenceError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn append_ohlcv_candle(&self, row: OhlcvCandleRow) -> Result<(), PersistenceError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO ohlcv_candles (interval_sec, open, high, low, close, volume, closed_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![row.interval_sec, row.open, row.high, row.low, row.close, row.volume, row.closed_at.to_rfc3339()],
        )
        .map_err(|e| PersistenceError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn append_exit_outcome(&self, row: ExitOutcomeRow) -> Result<(), PersistenceError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO exit_outcomes (slot_id, trade_id, cycle, net_profit, from_recovery, exit_time) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![row.slot_id, row.trade_id, row.cycle, row.net_profit, row.from_recovery, row.exit_time.to_rfc3339()],
        )
        .map_err(|e| PersistenceError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn append_exit_vintage_log(&self, row: ExitVintageLogRow) -> Result<(), PersistenceError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO exit_vintage_log (slot_id, trade_id, age_bucket_sec, count, sampled_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![row.slot_id, row.trade_id, row.age_bucket_sec, row.count, row.sampled_at.to_rfc3339()],
        )
        .map_err(|e| PersistenceError::Backend(e.to_string()))?;
        Ok(())
    }
}
