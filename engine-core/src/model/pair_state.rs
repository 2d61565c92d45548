use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    derive_phase, CycleRecord, ModeSource, OrderState, Phase, RecoveryOrder, RefreshDirection,
    TradeLeg,
};

/// Per-leg bookkeeping that doesn't belong on an individual order: loss
/// streaks/cooldowns and refresh-direction damping (spec.md §3, §4.1.2,
/// §4.1.7).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LegState {
    #[serde(default)]
    pub consecutive_losses: u32,
    #[serde(default)]
    pub cooldown_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub consecutive_refresh: u32,
    #[serde(default)]
    pub last_refresh_direction: Option<RefreshDirection>,
    #[serde(default)]
    pub refresh_cooldown_until: Option<DateTime<Utc>>,
}

/// Per-slot mutable state, exclusively owned by its slot and mutated only
/// through reducer output (spec.md §3 `PairState`, "Ownership").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PairState {
    pub market_price: f64,
    pub now: DateTime<Utc>,
    pub orders: Vec<OrderState>,
    pub recovery_orders: Vec<RecoveryOrder>,
    pub cycles: Vec<CycleRecord>,
    pub cycle_a: u64,
    pub cycle_b: u64,
    pub next_order_id: u64,
    pub next_recovery_id: u64,
    pub total_profit: f64,
    #[serde(default = "default_total_settled_usd_sentinel")]
    pub total_settled_usd: f64,
    pub total_fees: f64,
    pub today_realized_loss: f64,
    pub total_round_trips: u64,
    pub s2_entered_at: Option<DateTime<Utc>>,
    pub last_price_update_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub leg_a: LegState,
    #[serde(default)]
    pub leg_b: LegState,
    #[serde(default)]
    pub long_only: bool,
    #[serde(default)]
    pub short_only: bool,
    #[serde(default)]
    pub mode_source: ModeSource,
    #[serde(default = "default_profit_pct_runtime_sentinel")]
    pub profit_pct_runtime: f64,
}

/// Sentinel used only to detect "field absent" during deserialization; the
/// real default substitution (`total_settled_usd` defaults to
/// `total_profit`, spec.md §6.4) happens in [`PairState::backfill_defaults`]
/// because serde's per-field default can't see sibling fields.
fn default_total_settled_usd_sentinel() -> f64 {
    f64::NAN
}

fn default_profit_pct_runtime_sentinel() -> f64 {
    f64::NAN
}

impl PairState {
    pub fn new(now: DateTime<Utc>, profit_pct_runtime: f64) -> Self {
        Self {
            market_price: 0.0,
            now,
            orders: Vec::new(),
            recovery_orders: Vec::new(),
            cycles: Vec::new(),
            cycle_a: 1,
            cycle_b: 1,
            next_order_id: 1,
            next_recovery_id: 1,
            total_profit: 0.0,
            total_settled_usd: 0.0,
            total_fees: 0.0,
            today_realized_loss: 0.0,
            total_round_trips: 0,
            s2_entered_at: None,
            last_price_update_at: None,
            leg_a: LegState::default(),
            leg_b: LegState::default(),
            long_only: false,
            short_only: false,
            mode_source: ModeSource::None,
            profit_pct_runtime,
        }
    }

    /// Apply the documented safe defaults for fields a backend may have
    /// silently stripped (spec.md §6.2, §6.4).
    pub fn backfill_defaults(&mut self) {
        if self.total_settled_usd.is_nan() {
            self.total_settled_usd = self.total_profit;
        }
        if self.profit_pct_runtime.is_nan() || self.profit_pct_runtime <= 0.0 {
            self.profit_pct_runtime = 1.0;
        }
    }

    pub fn phase(&self) -> Phase {
        derive_phase(&self.orders, self.long_only, self.short_only)
    }

    pub fn leg_state(&self, leg: TradeLeg) -> &LegState {
        match leg {
            TradeLeg::A => &self.leg_a,
            TradeLeg::B => &self.leg_b,
        }
    }

    pub fn leg_state_mut(&mut self, leg: TradeLeg) -> &mut LegState {
        match leg {
            TradeLeg::A => &mut self.leg_a,
            TradeLeg::B => &mut self.leg_b,
        }
    }

    pub fn cycle_counter(&self, leg: TradeLeg) -> u64 {
        match leg {
            TradeLeg::A => self.cycle_a,
            TradeLeg::B => self.cycle_b,
        }
    }

    pub fn set_cycle_counter(&mut self, leg: TradeLeg, value: u64) {
        match leg {
            TradeLeg::A => self.cycle_a = value.max(self.cycle_a),
            TradeLeg::B => self.cycle_b = value.max(self.cycle_b),
        }
    }

    pub fn allocate_order_id(&mut self) -> u64 {
        let id = self.next_order_id;
        self.next_order_id += 1;
        id
    }

    pub fn allocate_recovery_id(&mut self) -> u64 {
        let id = self.next_recovery_id;
        self.next_recovery_id += 1;
        id
    }

    /// Mode/source suppresses follow-up entries on the forbidden leg
    /// (spec.md §4.1.1).
    pub fn leg_allowed(&self, leg: TradeLeg) -> bool {
        match leg {
            TradeLeg::A => !self.long_only,
            TradeLeg::B => !self.short_only,
        }
    }

    /// Side-channel, non-mutating-of-other-fields stamp of the exchange
    /// txid once acknowledged (spec.md §9). Monotonic: never rewrites a
    /// non-empty txid.
    pub fn apply_order_txid(&mut self, local_id: u64, txid: &str) {
        if let Some(order) = self.orders.iter_mut().find(|o| o.local_id == local_id) {
            if order.txid.is_empty() {
                order.txid = txid.to_string();
            }
        } else if let Some(rec) = self
            .recovery_orders
            .iter_mut()
            .find(|r| r.recovery_id == local_id)
        {
            if rec.txid.is_empty() {
                rec.txid = txid.to_string();
            }
        }
    }

    /// Side-channel stamp of the HMM regime at entry time, without
    /// disturbing any other field (spec.md §9).
    pub fn apply_order_regime_at_entry(&mut self, local_id: u64, regime: i32) {
        if let Some(order) = self.orders.iter_mut().find(|o| o.local_id == local_id) {
            order.regime_at_entry = Some(regime);
        }
    }
}
