//! Persistence boundary (spec.md §6.2, §6.4): a key-value snapshot blob plus
//! six append-only tables. Schema is additive and column-tolerant in both
//! directions — writers must not assume every column lands, readers must
//! default missing keys (spec.md §6.2).

mod in_memory;
mod sqlite;

pub use in_memory::InMemoryPersistenceStore;
pub use sqlite::SqlitePersistenceStore;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PersistenceError;
use crate::hmm::HmmLayer;
use crate::model::PairState;
use crate::rebalancer::RebalancerState;

/// Run mode surfaced in the status payload and persisted in the snapshot
/// (spec.md §4.3.3, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunMode {
    Init,
    Running,
    Paused,
    Halted,
}

/// Daily realized-loss circuit breaker (spec.md boundary scenario 5):
/// locks the loop into `PAUSED` once `today_realized_loss` crosses
/// `DAILY_LOSS_LIMIT`, auto-clearing on UTC day rollover.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct DailyLossLockState {
    pub locked: bool,
    #[serde(default)]
    pub locked_on: Option<chrono::NaiveDate>,
    #[serde(default)]
    pub realized_loss_today: f64,
}

/// Everything the orchestrator needs to resume a cold-started process
/// unchanged (spec.md §6.4). `#[serde(default)]` on every field that a
/// stripped-column backend might omit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    #[serde(default = "default_mode")]
    pub mode: RunMode,
    #[serde(default)]
    pub pause_reason: Option<String>,
    #[serde(default)]
    pub next_slot_id: u64,
    #[serde(default)]
    pub next_event_id: u64,
    #[serde(default)]
    pub seen_fill_txids: Vec<String>,
    #[serde(default)]
    pub slots: Vec<PairState>,
    #[serde(default)]
    pub rebalancer: RebalancerState,
    #[serde(default)]
    pub hmm: HmmLayer,
    #[serde(default)]
    pub daily_loss: DailyLossLockState,
    #[serde(default)]
    pub ohlcv_cursors: HashMap<String, DateTime<Utc>>,
}

fn default_mode() -> RunMode {
    RunMode::Init
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            mode: RunMode::Init,
            pause_reason: None,
            next_slot_id: 1,
            next_event_id: 1,
            seen_fill_txids: Vec::new(),
            slots: Vec::new(),
            rebalancer: RebalancerState::default(),
            hmm: HmmLayer::default(),
            daily_loss: DailyLossLockState::default(),
            ohlcv_cursors: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FillRow {
    pub slot_id: u64,
    pub txid: String,
    pub side: String,
    pub price: f64,
    pub volume: f64,
    pub fee: f64,
    pub filled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BotEventRow {
    pub slot_id: Option<u64>,
    pub kind: String,
    pub detail: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceHistoryRow {
    pub price: f64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OhlcvCandleRow {
    pub interval_sec: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub closed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExitOutcomeRow {
    pub slot_id: u64,
    pub trade_id: String,
    pub cycle: u64,
    pub net_profit: f64,
    pub from_recovery: bool,
    pub exit_time: DateTime<Utc>,
}

/// One 5-minute-cadence sample of exit-price distribution, keyed by how
/// long the exit had been outstanding (spec.md §6.2 `exit_vintage_log`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExitVintageLogRow {
    pub slot_id: u64,
    pub trade_id: String,
    pub age_bucket_sec: i64,
    pub count: u64,
    pub sampled_at: DateTime<Utc>,
}

/// Persistence boundary consumed by the orchestrator (spec.md §6.2).
/// Implementations must tolerate missing columns on read (default the
/// field) and must not fail a write because an optional column is absent
/// from the backend's schema.
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    async fn load_snapshot(&self) -> Result<Option<Snapshot>, PersistenceError>;
    async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), PersistenceError>;
    async fn append_fill(&self, row: FillRow) -> Result<(), PersistenceError>;
    async fn append_bot_event(&self, row: BotEventRow) -> Result<(), PersistenceError>;
    async fn append_price_history(&self, row: PriceHistoryRow) -> Result<(), PersistenceError>;
    async fn append_ohlcv_candle(&self, row: OhlcvCandleRow) -> Result<(), PersistenceError>;
    async fn append_exit_outcome(&self, row: ExitOutcomeRow) -> Result<(), PersistenceError>;
    async fn append_exit_vintage_log(&self, row: ExitVintageLogRow) -> Result<(), PersistenceError>;
}
