use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::PersistenceError;

use super::{
    BotEventRow, ExitOutcomeRow, ExitVintageLogRow, FillRow, OhlcvCandleRow, PersistenceStore,
    PriceHistoryRow, Snapshot,
};

/// Test double: everything lives in process memory, nothing survives
/// restart. Grounds round-trip and replay tests (spec.md §8).
#[derive(Default)]
pub struct InMemoryPersistenceStore {
    snapshot: Mutex<Option<Snapshot>>,
    fills: Mutex<Vec<FillRow>>,
    bot_events: Mutex<Vec<BotEventRow>>,
    price_history: Mutex<Vec<PriceHistoryRow>>,
    ohlcv_candles: Mutex<Vec<OhlcvCandleRow>>,
    exit_outcomes: Mutex<Vec<ExitOutcomeRow>>,
    exit_vintage_log: Mutex<Vec<ExitVintageLogRow>>,
}

impl InMemoryPersistenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fills(&self) -> Vec<FillRow> {
        self.fills.lock().clone()
    }

    pub fn bot_events(&self) -> Vec<BotEventRow> {
        self.bot_events.lock().clone()
    }

    pub fn exit_outcomes(&self) -> Vec<ExitOutcomeRow> {
        self.exit_outcomes.lock().clone()
    }
}

#[async_trait]
impl PersistenceStore for InMemoryPersistenceStore {
    async fn load_snapshot(&self) -> Result<Option<Snapshot>, PersistenceError> {
        Ok(self.snapshot.lock().clone())
    }

    async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), PersistenceError> {
        *self.snapshot.lock() = Some(snapshot.clone());
        Ok(())
    }

    async fn append_fill(&self, row: FillRow) -> Result<(), PersistenceError> {
        self.fills.lock().push(row);
        Ok(())
    }

    async fn append_bot_event(&self, row: BotEventRow) -> Result<(), PersistenceError> {
        self.bot_events.lock().push(row);
        Ok(())
    }

    async fn append_price_history(&self, row: PriceHistoryRow) -> Result<(), PersistenceError> {
        self.price_history.lock().push(row);
        Ok(())
    }

    async fn append_ohlcv_candle(&self, row: OhlcvCandleRow) -> Result<(), PersistenceError> {
        self.ohlcv_candles.lock().push(row);
        Ok(())
    }

    async fn append_exit_outcome(&self, row: ExitOutcomeRow) -> Result<(), PersistenceError> {
        self.exit_outcomes.lock().push(row);
        Ok(())
    }

    async fn append_exit_vintage_log(&self, row: ExitVintageLogRow) -> Result<(), PersistenceError> {
        self.exit_vintage_log.lock().push(row);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn snapshot_round_trips_byte_identical_after_serialize() {
        let store = InMemoryPersistenceStore::new();
        let snapshot = Snapshot::default();
        store.save_snapshot(&snapshot).await.unwrap();
        let loaded = store.load_snapshot().await.unwrap().unwrap();
        let a = serde_json::to_string(&snapshot).unwrap();
        let b = serde_json::to_string(&loaded).unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn missing_snapshot_is_none_not_an_error() {
        let store = InMemoryPersistenceStore::new();
        assert!(store.load_snapshot().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn appends_accumulate_independently_per_table() {
        let store = InMemoryPersistenceStore::new();
        store
            .append_fill(FillRow {
                slot_id: 1,
                txid: "t1".into(),
                side: "buy".into(),
                price: 1.0,
                volume: 1.0,
                fee: 0.01,
                filled_at: chrono::Utc::now(),
            })
            .await
            .unwrap();
        assert_eq!(store.fills().len(), 1);
        assert!(store.bot_events().is_empty());
    }
}
