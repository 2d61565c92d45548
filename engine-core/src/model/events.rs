use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CycleRecord, Side, TradeLeg};

/// Input to the reducer (spec.md §3 `Event`). A closed sum type — the
/// reducer matches it exhaustively, no open class hierarchy (spec.md §9).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Event {
    PriceTick { price: f64, at: DateTime<Utc> },
    TimerTick { at: DateTime<Utc> },
    FillEvent { local_id: u64, fill_price: f64, fee: f64, at: DateTime<Utc> },
    RecoveryFillEvent { recovery_id: u64, fill_price: f64, fee: f64, at: DateTime<Utc> },
    RecoveryCancelEvent { recovery_id: u64, at: DateTime<Utc> },
}

/// Output of the reducer, executed by the orchestrator against the exchange
/// (spec.md §3 `Action`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Action {
    PlaceOrder {
        local_id: u64,
        side: Side,
        price: f64,
        volume: f64,
        trade_id: TradeLeg,
        is_entry: bool,
    },
    CancelOrder {
        local_id: u64,
        txid: String,
        reason: String,
    },
    OrphanOrder {
        local_id: u64,
        recovery_id: u64,
        reason: String,
    },
    BookCycle {
        record: Box<CycleRecord>,
    },
}
