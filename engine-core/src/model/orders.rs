use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Role, Side, TradeLeg};

/// A live order tracked by a slot (spec.md §3 `OrderState`).
///
/// `txid` is empty until the orchestrator places the order on the exchange
/// and patches it back via [`crate::reducer::apply_order_txid`] — a
/// side-channel, non-reducer mutation (spec.md §9).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderState {
    pub local_id: u64,
    pub side: Side,
    pub role: Role,
    pub price: f64,
    pub volume: f64,
    pub trade_id: TradeLeg,
    pub cycle: u64,
    #[serde(default)]
    pub txid: String,
    pub placed_at: DateTime<Utc>,
    /// 0 for entry roles; > 0 for exit roles (spec.md §3 invariant 4).
    pub entry_price: f64,
    #[serde(default)]
    pub entry_fee: f64,
    #[serde(default)]
    pub entry_filled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub regime_at_entry: Option<i32>,
}

impl OrderState {
    pub fn has_txid(&self) -> bool {
        !self.txid.is_empty()
    }

    /// Age used by the S1 orphan rule (spec.md §4.1.3): from
    /// `entry_filled_at`, falling back to `placed_at` if that's unset, then
    /// `now` as a last resort (age zero).
    pub fn exit_age_sec(&self, now: DateTime<Utc>) -> i64 {
        let anchor = self.entry_filled_at.unwrap_or(self.placed_at);
        (now - anchor).num_seconds().max(0)
    }
}

/// An orphaned exit, tracked independently of the active order set
/// (spec.md §3 `RecoveryOrder`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecoveryOrder {
    pub recovery_id: u64,
    pub side: Side,
    pub price: f64,
    pub volume: f64,
    pub trade_id: TradeLeg,
    pub cycle: u64,
    pub entry_price: f64,
    pub orphaned_at: DateTime<Utc>,
    #[serde(default)]
    pub entry_fee: f64,
    #[serde(default)]
    pub entry_filled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub txid: String,
    pub reason: String,
    #[serde(default)]
    pub regime_at_entry: Option<i32>,
}

impl RecoveryOrder {
    /// Relative distance from the given market price — the eviction
    /// priority key (spec.md §4.1.8).
    pub fn distance_from(&self, market: f64) -> f64 {
        if market <= 0.0 {
            return 0.0;
        }
        (self.price - market).abs() / market
    }
}

/// A completed (entry, exit) pair, appended to the slot's history and never
/// mutated once booked (spec.md §3 `CycleRecord`, lifecycle rules).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CycleRecord {
    pub trade_id: TradeLeg,
    pub cycle: u64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub volume: f64,
    pub gross_profit: f64,
    pub fees: f64,
    pub net_profit: f64,
    pub entry_fee: f64,
    pub exit_fee: f64,
    pub quote_fee: f64,
    pub settled_usd: f64,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    #[serde(default)]
    pub from_recovery: bool,
    #[serde(default)]
    pub regime_at_entry: Option<i32>,
}
