//! Main loop (spec.md §4.3): single-threaded cooperative tick over all
//! slots. Owns every piece of mutable runtime state that isn't a slot's
//! `PairState` — mode, budgets, the HMM/rebalancer layers, the entry
//! scheduler, `seen_fill_txids` — and is the only caller of the
//! `ExchangeGateway`/`PersistenceStore`/`ControlSurface` boundaries.

mod budget;
mod reconciliation;
mod scheduler;

pub use budget::ApiBudget;
pub use scheduler::{EntryScheduler, PendingEntry};

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::{constants, EngineConfig};
use crate::gateway::{Balance, ExchangeGateway, OrderRole, PlaceOrderRequest};
use crate::hmm::{Candle, HmmLayer, HmmSnapshot};
use crate::invariants;
use crate::metrics::EngineMetrics;
use crate::model::{Action, Event, PairState, Role, TradeLeg};
use crate::persistence::{DailyLossLockState, PersistenceStore, RunMode, Snapshot};
use crate::rebalancer::{self, CapacityBand, RebalancerOutput, RebalancerState};
use crate::reducer::transition;
use crate::status::{Command, ControlSurfaceState, StatusPayload};

const CALL_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// One managed slot: its reducer-owned `PairState` plus orchestrator-only
/// bookkeeping (alias for the status payload).
pub struct Slot {
    pub id: u64,
    pub alias: String,
    pub state: PairState,
}

/// Runtime state a HALTED process persists verbatim so a restart doesn't
/// lose the reason an operator needs to see (spec.md §4.3.3).
fn is_transient_halt_reason(reason: &str) -> bool {
    reason == "process exit" || reason.starts_with("signal ")
}

pub struct Orchestrator<G: ExchangeGateway, P: PersistenceStore> {
    gateway: Arc<G>,
    store: Arc<P>,
    cfg: EngineConfig,
    mode: RunMode,
    pause_reason: Option<String>,
    slots: Vec<Slot>,
    next_slot_id: u64,
    seen_fill_txids: HashSet<String>,
    rebalancer_state: RebalancerState,
    hmm: HmmLayer,
    daily_loss: DailyLossLockState,
    scheduler: EntryScheduler,
    budget: ApiBudget,
    consecutive_errors: u32,
    last_price: f64,
    last_price_at: Option<DateTime<Utc>>,
    primary_candles: Vec<Candle>,
    secondary_candles: Vec<Candle>,
    tertiary_candles: Vec<Candle>,
    control: ControlSurfaceState,
    command_rx: mpsc::UnboundedReceiver<Command>,
    last_hmm: Option<HmmSnapshot>,
    last_rebalance: Option<RebalancerOutput>,
    last_idle_usd: f64,
    last_total_portfolio_value: f64,
    entries_admitted_last_tick: usize,
    entries_cap_last_tick: usize,
    metrics: Arc<EngineMetrics>,
}

impl<G: ExchangeGateway, P: PersistenceStore> Orchestrator<G, P> {
    pub fn new(gateway: Arc<G>, store: Arc<P>, cfg: EngineConfig) -> Self {
        let metrics = Arc::new(EngineMetrics::default());
        let (control, command_rx) = ControlSurfaceState::new(metrics.clone());
        Self {
            gateway,
            store,
            cfg,
            mode: RunMode::Init,
            pause_reason: None,
            slots: Vec::new(),
            next_slot_id: 1,
            seen_fill_txids: HashSet::new(),
            rebalancer_state: RebalancerState::default(),
            hmm: HmmLayer::new(true),
            daily_loss: DailyLossLockState::default(),
            scheduler: EntryScheduler::default(),
            budget: ApiBudget::default(),
            consecutive_errors: 0,
            last_price: 0.0,
            last_price_at: None,
            primary_candles: Vec::new(),
            secondary_candles: Vec::new(),
            tertiary_candles: Vec::new(),
            control,
            command_rx,
            last_hmm: None,
            last_rebalance: None,
            last_idle_usd: 0.0,
            last_total_portfolio_value: 0.0,
            entries_admitted_last_tick: 0,
            entries_cap_last_tick: 0,
            metrics,
        }
    }

    pub fn control_surface(&self) -> ControlSurfaceState {
        self.control.clone()
    }

    /// Prometheus counters behind the control surface's `/metrics` route.
    pub fn metrics(&self) -> Arc<EngineMetrics> {
        self.metrics.clone()
    }

    /// Load the persisted snapshot (if any) and reconcile against the
    /// exchange (spec.md §4.3.1). Converts a HALTED-by-transient-reason
    /// snapshot back into INIT (spec.md §4.3.3); an invariant-driven HALTED
    /// persists.
    pub async fn bootstrap(&mut self) -> Result<()> {
        if let Some(snapshot) = self.store.load_snapshot().await.context("load snapshot")? {
            self.mode = match (snapshot.mode, &snapshot.pause_reason) {
                (RunMode::Halted, Some(reason)) if is_transient_halt_reason(reason) => RunMode::Init,
                (mode, _) => mode,
            };
            self.pause_reason = snapshot.pause_reason;
            self.next_slot_id = snapshot.next_slot_id.max(1);
            self.seen_fill_txids = snapshot.seen_fill_txids.into_iter().collect();
            self.rebalancer_state = snapshot.rebalancer;
            self.hmm = snapshot.hmm;
            self.daily_loss = snapshot.daily_loss;
            self.slots = snapshot
                .slots
                .into_iter()
                .enumerate()
                .map(|(i, state)| Slot { id: i as u64 + 1, alias: format!("slot-{}", i + 1), state })
                .collect();
        }

        let now = Utc::now();
        let events = reconciliation::reconcile_on_startup(
            self.gateway.as_ref(),
            &mut self.slots,
            &mut self.seen_fill_txids,
            &mut self.budget,
            now,
        )
        .await
        .context("startup reconciliation")?;
        self.apply_events(events).await;

        if matches!(self.mode, RunMode::Init) {
            self.mode = RunMode::Running;
        }
        Ok(())
    }

    /// Number of slots currently tracked, restored from snapshot or added
    /// since. Callers use this to decide whether a cold start still needs
    /// seeding.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Current run mode (spec.md §4.3.3) — INIT/RUNNING/PAUSED/HALTED.
    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn slots_mut(&mut self) -> &mut [Slot] {
        &mut self.slots
    }

    pub fn add_slot(&mut self, order_size_usd: f64) -> u64 {
        let id = self.next_slot_id;
        self.next_slot_id += 1;
        self.slots.push(Slot {
            id,
            alias: format!("slot-{id}"),
            state: PairState::new(Utc::now(), self.cfg.profit_pct),
        });
        let _ = order_size_usd;
        id
    }

    /// Apply reconciliation-synthesized events (spec.md §4.3.1) through the
    /// same reducer path a live tick uses, then carry out the actions they
    /// produce exactly as `dispatch_actions` would for a live fill.
    async fn apply_events(&mut self, events: Vec<(u64, Event)>) {
        for (slot_id, event) in events {
            let Some(idx) = self.slots.iter().position(|s| s.id == slot_id) else { continue };
            let (next, actions) = transition(&self.slots[idx].state, &event, &self.cfg, self.cfg.order_size_usd, None);
            self.slots[idx].state = next;
            self.dispatch_actions(slot_id, actions).await;
        }
    }

    /// Carry out one reducer action against the exchange/store. Exit
    /// placements and cancels aren't subject to the entry-velocity
    /// scheduler (spec.md §4.3.2 bounds entries only) so they go out
    /// immediately, budget permitting.
    async fn dispatch_action(&mut self, slot_id: u64, action: Action) {
        match action {
            Action::PlaceOrder { local_id, side, price, volume, trade_id, is_entry: true } => {
                self.scheduler.enqueue(PendingEntry { slot_id, local_id, side, price, volume, trade_id });
            }
            Action::PlaceOrder { local_id, side, price, volume, trade_id, is_entry: false } => {
                if self.budget.spend().is_err() {
                    warn!(slot_id, local_id, "budget exhausted, deferring exit placement to next tick");
                    return;
                }
                let req = PlaceOrderRequest { side, role: OrderRole::Exit, price, volume, post_only: true };
                match timeout(CALL_TIMEOUT, self.gateway.place_order(req)).await {
                    Ok(Ok(txid)) => {
                        if let Some(slot) = self.slots.iter_mut().find(|s| s.id == slot_id) {
                            slot.state.apply_order_txid(local_id, &txid);
                        }
                    }
                    Ok(Err(e)) => warn!(error = %e, slot_id, local_id, ?trade_id, "exit placement failed"),
                    Err(_) => warn!(slot_id, local_id, "exit placement timed out"),
                }
            }
            Action::CancelOrder { local_id, txid, reason } => {
                info!(slot_id, local_id, reason, "reducer requested cancel");
                if !txid.is_empty() && self.budget.spend().is_ok() {
                    let _ = timeout(CALL_TIMEOUT, self.gateway.cancel_order(&txid)).await;
                }
            }
            Action::OrphanOrder { local_id, recovery_id, reason } => {
                info!(slot_id, local_id, recovery_id, reason, "reducer orphaned order");
            }
            Action::BookCycle { record } => {
                info!(slot_id, net_profit = record.net_profit, "cycle booked");
                let leg_label = record.trade_id.to_string();
                self.metrics.cycles_booked_total.with_label_values(&[leg_label.as_str()]).inc();
                let _ = self
                    .store
                    .append_exit_outcome(crate::persistence::ExitOutcomeRow {
                        slot_id,
                        trade_id: record.trade_id.to_string(),
                        cycle: record.cycle,
                        net_profit: record.net_profit,
                        from_recovery: record.from_recovery,
                        exit_time: record.exit_time,
                    })
                    .await;
            }
        }
    }

    /// Run one full tick of the 11-step loop (spec.md §4.3).
    pub async fn run_tick(&mut self) -> Result<()> {
        self.budget.reset(); // 1. begin private-API budget accounting window

        let now = Utc::now();
        self.refresh_price(now).await?; // 2
        self.sync_ohlcv(now).await?; // 3
        self.recompute_profit_targets(); // 4
        self.evaluate_daily_loss_lock(now); // 5

        if !matches!(self.mode, RunMode::Running) {
            self.drain_commands();
            self.persist_snapshot().await?;
            return Ok(());
        }

        self.drain_pending_entries(now).await?; // 6
        self.tick_slots(now).await?; // 7
        self.poll_fills(now).await?; // 8
        self.auto_soft_close_recoveries(now).await?; // 9
        self.update_rebalancer(now).await; // 10

        self.persist_snapshot().await?; // 11
        self.drain_commands();
        Ok(())
    }

    async fn refresh_price(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.budget.spend().ok();
        match timeout(CALL_TIMEOUT, self.gateway.get_price()).await {
            Ok(Ok((price, at))) => {
                self.last_price = price;
                self.last_price_at = Some(at);
                self.consecutive_errors = 0;
            }
            Ok(Err(e)) => self.note_transient_error(&format!("price fetch failed: {e}")),
            Err(_) => self.note_transient_error("price fetch timed out"),
        }

        if let Some(at) = self.last_price_at {
            if (now - at).num_seconds() > self.cfg.stale_price_max_age_sec {
                self.enter_paused("stale price".to_string());
            }
        } else {
            self.enter_paused("no price yet".to_string());
        }
        Ok(())
    }

    async fn sync_ohlcv(&mut self, now: DateTime<Utc>) -> Result<()> {
        for (interval_sec, buf) in [
            (60i64, &mut self.primary_candles),
            (900, &mut self.secondary_candles),
            (3600, &mut self.tertiary_candles),
        ] {
            let since = buf.last().map(|c: &Candle| c.closed_at).unwrap_or(now - Duration::days(1));
            if self.budget.spend().is_err() {
                break;
            }
            match timeout(CALL_TIMEOUT, self.gateway.get_ohlc(interval_sec, since)).await {
                Ok(Ok(candles)) => {
                    for candle in candles {
                        buf.push(candle);
                        let _ = self
                            .store
                            .append_ohlcv_candle(crate::persistence::OhlcvCandleRow {
                                interval_sec,
                                open: candle.open,
                                high: candle.high,
                                low: candle.low,
                                close: candle.close,
                                volume: candle.volume,
                                closed_at: candle.closed_at,
                            })
                            .await;
                    }
                }
                Ok(Err(e)) => warn!(error = %e, interval_sec, "ohlc sync failed"),
                Err(_) => warn!(interval_sec, "ohlc sync timed out"),
            }
        }
        Ok(())
    }

    /// Volatility-adaptive runtime profit target: widen `profit_pct` when
    /// the primary candles have been choppy, narrow it when calm, bounded
    /// to [0.5x, 2x] of the configured `profit_pct`.
    fn recompute_profit_targets(&mut self) {
        let window = self.primary_candles.iter().rev().take(20).collect::<Vec<_>>();
        if window.len() < 5 {
            return;
        }
        let mean_range: f64 = window.iter().map(|c| (c.high - c.low) / c.close.max(1e-9)).sum::<f64>() / window.len() as f64;
        let multiplier = (1.0 + mean_range * 10.0).clamp(0.5, 2.0);
        let runtime_pct = (self.cfg.profit_pct * multiplier).max(0.0);
        for slot in &mut self.slots {
            slot.state.profit_pct_runtime = runtime_pct;
        }
    }

    fn evaluate_daily_loss_lock(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if self.daily_loss.locked_on.is_some_and(|d| d != today) {
            self.daily_loss = DailyLossLockState::default();
            for slot in &mut self.slots {
                slot.state.today_realized_loss = 0.0;
            }
            if matches!(self.mode, RunMode::Paused) && self.pause_reason.as_deref() == Some("daily loss limit reached") {
                self.mode = RunMode::Running;
                self.pause_reason = None;
            }
        }

        let realized: f64 = self.slots.iter().map(|s| s.state.today_realized_loss).sum();
        self.daily_loss.realized_loss_today = realized;
        if realized >= constants::DAILY_LOSS_LIMIT {
            if !self.daily_loss.locked {
                self.metrics.daily_loss_locks_total.inc();
            }
            self.daily_loss.locked = true;
            self.daily_loss.locked_on = Some(today);
            self.enter_paused("daily loss limit reached".to_string());
        } else if self.daily_loss.locked {
            self.daily_loss.locked = false;
        }
    }

    async fn drain_pending_entries(&mut self, now: DateTime<Utc>) -> Result<()> {
        let open_orders: usize = self.slots.iter().map(|s| s.state.orders.len()).sum();
        let headroom = constants::ENTRY_SCHEDULER_HEADROOM_MAX_OPEN_ORDERS.saturating_sub(open_orders);
        let cap = EntryScheduler::adaptive_cap(headroom);
        self.entries_cap_last_tick = cap;
        let mut admitted = 0usize;
        for entry in self.scheduler.drain(cap) {
            if self.budget.spend().is_err() {
                self.scheduler.enqueue(entry);
                continue;
            }
            let req = PlaceOrderRequest {
                side: entry.side,
                role: OrderRole::Entry,
                price: entry.price,
                volume: entry.volume,
                post_only: true,
            };
            match timeout(CALL_TIMEOUT, self.gateway.place_order(req)).await {
                Ok(Ok(txid)) => {
                    if let Some(slot) = self.slots.iter_mut().find(|s| s.id == entry.slot_id) {
                        slot.state.apply_order_txid(entry.local_id, &txid);
                    }
                    admitted += 1;
                }
                Ok(Err(e)) => warn!(error = %e, entry.local_id, "entry placement failed"),
                Err(_) => warn!(entry.local_id, "entry placement timed out"),
            }
        }
        self.entries_admitted_last_tick = admitted;
        let _ = now;
        Ok(())
    }

    /// Per-slot: PriceTick, TimerTick, bootstrap-if-empty, auto-repair
    /// (spec.md §4.3 step 7).
    async fn tick_slots(&mut self, now: DateTime<Utc>) -> Result<()> {
        let price = self.last_price;
        let order_size_usd = self.cfg.order_size_usd;
        let cfg = self.cfg.clone();

        let slot_ids: Vec<u64> = self.slots.iter().map(|s| s.id).collect();
        for slot_id in slot_ids {
            let idx = self.slots.iter().position(|s| s.id == slot_id).unwrap();

            if price > 0.0 {
                let (next, actions) = transition(
                    &self.slots[idx].state,
                    &Event::PriceTick { price, at: now },
                    &cfg,
                    order_size_usd,
                    None,
                );
                self.slots[idx].state = next;
                self.dispatch_actions(slot_id, actions).await;
            }

            let (next, actions) = transition(&self.slots[idx].state, &Event::TimerTick { at: now }, &cfg, order_size_usd, None);
            self.slots[idx].state = next;
            self.dispatch_actions(slot_id, actions).await;

            if self.slots[idx].state.orders.is_empty() && self.slots[idx].state.recovery_orders.is_empty() {
                self.bootstrap_slot(slot_id, now).await;
            }

            let violations = invariants::evaluate(&self.slots[idx].state, &cfg, order_size_usd, None);
            if !violations.is_empty() {
                self.metrics.invariant_halts_total.inc();
                self.enter_halted(format!("invariant violated: {violations:?}"));
            }
        }
        Ok(())
    }

    async fn bootstrap_slot(&mut self, slot_id: u64, now: DateTime<Utc>) {
        if self.last_price <= 0.0 {
            return;
        }
        for leg in [TradeLeg::A, TradeLeg::B] {
            let Some(slot) = self.slots.iter_mut().find(|s| s.id == slot_id) else { continue };
            if !slot.state.leg_allowed(leg) {
                continue;
            }
            let price = crate::reducer::refresh_entry_price(self.last_price, leg.entry_side(), leg, &self.cfg, 0);
            let volume = crate::reducer::round_to(self.cfg.order_size_usd / self.last_price, self.cfg.volume_decimals);
            if volume < self.cfg.min_volume || self.cfg.order_size_usd < self.cfg.min_cost_usd {
                continue;
            }
            let local_id = slot.state.allocate_order_id();
            slot.state.orders.push(crate::model::OrderState {
                local_id,
                side: leg.entry_side(),
                role: Role::Entry,
                price,
                volume,
                trade_id: leg,
                cycle: slot.state.cycle_counter(leg),
                txid: String::new(),
                placed_at: now,
                entry_price: 0.0,
                entry_fee: 0.0,
                entry_filled_at: None,
                regime_at_entry: None,
            });
            self.scheduler.enqueue(PendingEntry { slot_id, local_id, side: leg.entry_side(), price, volume, trade_id: leg });
        }
    }

    async fn dispatch_actions(&mut self, slot_id: u64, actions: Vec<Action>) {
        for action in actions {
            self.dispatch_action(slot_id, action).await;
        }
    }

    /// Poll tracked txids, synthesize Fill/Cancel events, enforce
    /// exactly-once via `seen_fill_txids` (spec.md §4.3 step 8).
    async fn poll_fills(&mut self, now: DateTime<Utc>) -> Result<()> {
        let mut txids = Vec::new();
        for slot in &self.slots {
            for order in &slot.state.orders {
                if order.has_txid() {
                    txids.push(order.txid.clone());
                }
            }
        }
        if txids.is_empty() || self.budget.spend().is_err() {
            return Ok(());
        }

        let since = self.last_price_at.unwrap_or(now) - Duration::days(constants::TRADE_HISTORY_LOOKBACK_DAYS);
        let history = match timeout(CALL_TIMEOUT, self.gateway.get_trade_history(since)).await {
            Ok(Ok(h)) => h,
            Ok(Err(e)) => {
                warn!(error = %e, "trade history poll failed");
                return Ok(());
            }
            Err(_) => {
                warn!("trade history poll timed out");
                return Ok(());
            }
        };

        let cfg = self.cfg.clone();
        let order_size_usd = cfg.order_size_usd;
        for fill in history {
            if self.seen_fill_txids.contains(&fill.txid) {
                continue;
            }
            let hit = self.slots.iter().enumerate().find_map(|(i, s)| {
                s.state.orders.iter().find(|o| o.txid == fill.txid).map(|o| (i, o.local_id))
            });
            let Some((idx, local_id)) = hit else { continue };
            self.seen_fill_txids.insert(fill.txid.clone());
            self.metrics.fills_total.inc();
            let event = Event::FillEvent { local_id, fill_price: fill.fill_price, fee: fill.fee, at: fill.filled_at };
            let (next, actions) = transition(&self.slots[idx].state, &event, &cfg, order_size_usd, None);
            self.slots[idx].state = next;
            let slot_id = self.slots[idx].id;
            self.dispatch_actions(slot_id, actions).await;
        }
        Ok(())
    }

    /// Auto soft-close the farthest recoveries when open-order utilization
    /// crosses `RECOVERY_SOFT_CLOSE_UTILIZATION` (spec.md §4.3 step 9).
    async fn auto_soft_close_recoveries(&mut self, now: DateTime<Utc>) -> Result<()> {
        for slot in &mut self.slots {
            if slot.state.recovery_orders.is_empty() {
                continue;
            }
            let utilization = slot.state.recovery_orders.len() as f64 / self.cfg.max_recovery_slots.max(1) as f64;
            if utilization <= constants::RECOVERY_SOFT_CLOSE_UTILIZATION {
                continue;
            }
            let market = slot.state.market_price;
            let Some(victim) = slot
                .state
                .recovery_orders
                .iter()
                .max_by(|a, b| a.distance_from(market).partial_cmp(&b.distance_from(market)).unwrap())
                .cloned()
            else {
                continue;
            };
            let event = Event::RecoveryCancelEvent { recovery_id: victim.recovery_id, at: now };
            let (next, _actions) = transition(&slot.state, &event, &self.cfg, self.cfg.order_size_usd, None);
            slot.state = next;
            info!(slot_id = slot.id, recovery_id = victim.recovery_id, "soft-closed over-utilized recovery");
        }
        Ok(())
    }

    /// Update rebalancer: HMM `update()` then the PD controller (spec.md
    /// §4.3 step 10).
    async fn update_rebalancer(&mut self, now: DateTime<Utc>) {
        let before_train_ts =
            (self.hmm.primary.last_train_ts, self.hmm.secondary.last_train_ts, self.hmm.tertiary.last_train_ts);
        let snapshot = self.hmm.update(
            &self.primary_candles,
            &self.secondary_candles,
            &self.tertiary_candles,
            constants::HMM_CONSENSUS_WEIGHT_PRIMARY,
            now,
            now.timestamp() as u64,
        );
        let after_train_ts =
            (self.hmm.primary.last_train_ts, self.hmm.secondary.last_train_ts, self.hmm.tertiary.last_train_ts);
        let retrains = [
            before_train_ts.0 != after_train_ts.0,
            before_train_ts.1 != after_train_ts.1,
            before_train_ts.2 != after_train_ts.2,
        ]
        .into_iter()
        .filter(|changed| *changed)
        .count();
        if retrains > 0 {
            self.metrics.hmm_retrains_total.inc_by(retrains as u64);
        }

        let balance = match timeout(CALL_TIMEOUT, self.gateway.get_balance()).await {
            Ok(Ok(b)) => b,
            _ => Balance { base: 0.0, quote: 0.0 },
        };
        let total_portfolio_value = balance.quote + balance.base * self.last_price;
        let idle_usd = balance.quote;
        let capacity_band = if total_portfolio_value <= 0.0 { CapacityBand::Stop } else { CapacityBand::Normal };

        let output = rebalancer::update(
            &mut self.rebalancer_state,
            self.last_price,
            snapshot.consensus.bias_signal,
            idle_usd,
            total_portfolio_value,
            capacity_band,
            now,
        );

        self.last_idle_usd = idle_usd;
        self.last_total_portfolio_value = total_portfolio_value;
        self.last_rebalance = Some(output);
        self.last_hmm = Some(snapshot);
    }

    async fn persist_snapshot(&mut self) -> Result<()> {
        let snapshot = Snapshot {
            mode: self.mode,
            pause_reason: self.pause_reason.clone(),
            next_slot_id: self.next_slot_id,
            next_event_id: 1,
            seen_fill_txids: self.seen_fill_txids.iter().cloned().collect(),
            slots: self.slots.iter().map(|s| s.state.clone()).collect(),
            rebalancer: self.rebalancer_state.clone(),
            hmm: self.hmm.clone(),
            daily_loss: self.daily_loss,
            ohlcv_cursors: Default::default(),
        };
        self.store.save_snapshot(&snapshot).await.context("save snapshot")?;
        Ok(())
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.command_rx.try_recv() {
            self.handle_command(command);
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Pause => self.enter_paused("operator pause".to_string()),
            Command::Resume => {
                self.mode = RunMode::Running;
                self.pause_reason = None;
            }
            Command::AddSlot => {
                self.add_slot(self.cfg.order_size_usd);
            }
            Command::RemoveSlot { slot_id } => self.slots.retain(|s| s.id != slot_id),
            Command::RemoveSlots { slot_ids } => self.slots.retain(|s| !slot_ids.contains(&s.id)),
            Command::SetEntryPct { leg, pct } => match leg {
                Some(TradeLeg::A) => self.cfg.entry_pct_override.a = Some(pct),
                Some(TradeLeg::B) => self.cfg.entry_pct_override.b = Some(pct),
                None => self.cfg.entry_pct = pct,
            },
            Command::SetProfitPct { pct } => self.cfg.profit_pct = pct,
            Command::SoftClose { slot_id } => {
                if let Some(slot) = self.slots.iter_mut().find(|s| s.id == slot_id) {
                    slot.state.long_only = true;
                    slot.state.short_only = true;
                }
            }
            Command::SoftCloseNext => {
                if let Some(slot) = self.slots.first_mut() {
                    slot.state.long_only = true;
                    slot.state.short_only = true;
                }
            }
            Command::CancelStaleRecoveries => {
                for slot in &mut self.slots {
                    slot.state.recovery_orders.clear();
                }
            }
            Command::ReconcileDrift => {
                info!("manual reconcile_drift requested; next bootstrap cycle will reconcile");
            }
            Command::AuditPnl => {
                let total: f64 = self.slots.iter().map(|s| s.state.total_profit).sum();
                info!(total_profit = total, "audit_pnl");
            }
        }
    }

    fn note_transient_error(&mut self, message: &str) {
        warn!(message, "transient error");
        self.consecutive_errors += 1;
        if self.consecutive_errors >= constants::MAX_CONSECUTIVE_ERRORS {
            self.enter_paused(format!("too many consecutive errors: {message}"));
        }
    }

    fn enter_paused(&mut self, reason: String) {
        if !matches!(self.mode, RunMode::Halted) {
            self.mode = RunMode::Paused;
            self.pause_reason = Some(reason);
        }
    }

    /// HALTED is sticky (spec.md §4.3.3): once set, only a restart with a
    /// transient-reason snapshot (or an operator resume) clears it.
    fn enter_halted(&mut self, reason: String) {
        self.mode = RunMode::Halted;
        self.pause_reason = Some(reason);
    }

    pub fn publish_status(&self) -> StatusPayload {
        let slots = self
            .slots
            .iter()
            .map(|s| crate::status::SlotStatus { slot_id: s.id, alias: s.alias.clone(), state: s.state.clone() })
            .collect();

        let band = if self.last_total_portfolio_value <= 0.0 { "stop" } else { "normal" };
        let idle_ratio = if self.last_total_portfolio_value > 0.0 {
            self.last_idle_usd / self.last_total_portfolio_value
        } else {
            0.0
        };
        let rebalance = self.last_rebalance;

        StatusPayload {
            mode: self.mode,
            pause_reason: self.pause_reason.clone(),
            slots,
            capacity_fill_health: crate::status::CapacityFillHealth {
                idle_usd: self.last_idle_usd,
                total_portfolio_value: self.last_total_portfolio_value,
                idle_ratio,
                band,
            },
            rebalancer: crate::status::RebalancerStatus {
                signal: rebalance.map(|o| o.signal).unwrap_or(0.0),
                idle_ratio: rebalance.map(|o| o.idle_ratio).unwrap_or(0.0),
                error: rebalance.map(|o| o.error).unwrap_or(0.0),
                skew: rebalance.map(|o| o.skew).unwrap_or(self.rebalancer_state.prev_skew),
                favored_leg_size_mult: rebalance.map(|o| o.favored_leg_size_mult).unwrap_or(1.0),
            },
            trend: crate::status::TrendStatus {
                trend_score: rebalance.map(|o| o.trend_score).unwrap_or(0.0),
                dynamic_idle_target: self.rebalancer_state.trend.target_ema.value,
            },
            daily_loss_limit: crate::status::DailyLossLimitStatus {
                limit: constants::DAILY_LOSS_LIMIT,
                realized_loss_today: self.daily_loss.realized_loss_today,
                locked: self.daily_loss.locked,
            },
            entry_scheduler: crate::status::EntrySchedulerStatus {
                pending_entries: self.scheduler.pending.len(),
                admitted_this_tick: self.entries_admitted_last_tick,
                cap_this_tick: self.entries_cap_last_tick,
            },
            hmm_regime: regime_status_of(&self.hmm, self.last_hmm.as_ref().map(|s| s.primary)),
            hmm_secondary: regime_status_of(&self.hmm, self.last_hmm.as_ref().map(|s| s.secondary)),
            hmm_tertiary: regime_status_of(&self.hmm, self.last_hmm.as_ref().map(|s| s.tertiary)),
            hmm_data_pipeline: crate::status::DataPipelineStatus {
                primary_candles: self.primary_candles.len(),
                secondary_candles: self.secondary_candles.len(),
                tertiary_candles: self.tertiary_candles.len(),
                last_retrain_age_sec: self.hmm.primary.last_train_ts.map(|t| (Utc::now() - t).num_seconds()),
            },
            consensus: self
                .last_hmm
                .as_ref()
                .map(|s| crate::status::ConsensusStatus {
                    mode: s.consensus.mode,
                    label: s.consensus.label,
                    consensus_probabilities: s.consensus.probabilities,
                    effective_confidence: s.consensus.effective_confidence,
                    bias_signal: s.consensus.bias_signal,
                })
                .unwrap_or(crate::status::ConsensusStatus {
                    mode: crate::hmm::ConsensusMode::Full,
                    label: crate::hmm::Regime::Ranging,
                    consensus_probabilities: [0.0, 1.0, 0.0],
                    effective_confidence: 0.0,
                    bias_signal: 0.0,
                }),
            generated_at: Utc::now(),
        }
    }
}

fn regime_status_of(hmm: &HmmLayer, reading: Option<crate::hmm::RegimeReading>) -> crate::status::RegimeStatus {
    let _ = hmm;
    match reading {
        Some(r) => crate::status::RegimeStatus {
            regime: r.regime,
            probabilities: r.probs,
            confidence: r.confidence,
            effective_confidence: r.effective_confidence,
            bias_signal: r.bias_signal,
        },
        None => crate::status::RegimeStatus {
            regime: crate::hmm::Regime::Ranging,
            probabilities: [0.0, 1.0, 0.0],
            confidence: 0.0,
            effective_confidence: 0.0,
            bias_signal: 0.0,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::SimulatedGateway;
    use crate::persistence::InMemoryPersistenceStore;

    fn orchestrator() -> Orchestrator<SimulatedGateway, InMemoryPersistenceStore> {
        let gateway = Arc::new(SimulatedGateway::new(0.10, Balance { base: 100.0, quote: 1000.0 }, Utc::now()));
        let store = Arc::new(InMemoryPersistenceStore::new());
        Orchestrator::new(gateway, store, EngineConfig::default())
    }

    #[tokio::test]
    async fn bootstrap_with_no_snapshot_enters_running() {
        let mut orch = orchestrator();
        orch.bootstrap().await.unwrap();
        assert!(matches!(orch.mode, RunMode::Running));
    }

    #[tokio::test]
    async fn empty_slot_gets_bootstrapped_with_both_leg_entries() {
        let mut orch = orchestrator();
        orch.bootstrap().await.unwrap();
        orch.add_slot(25.0);
        orch.run_tick().await.unwrap();
        let slot = &orch.slots[0];
        assert!(slot.state.orders.iter().any(|o| o.trade_id == TradeLeg::A));
        assert!(slot.state.orders.iter().any(|o| o.trade_id == TradeLeg::B));
    }

    #[tokio::test]
    async fn pause_command_takes_effect_next_tick() {
        let mut orch = orchestrator();
        orch.bootstrap().await.unwrap();
        orch.handle_command(Command::Pause);
        assert!(matches!(orch.mode, RunMode::Paused));
        orch.handle_command(Command::Resume);
        assert!(matches!(orch.mode, RunMode::Running));
    }

    #[test]
    fn transient_halt_reasons_are_recognized() {
        assert!(is_transient_halt_reason("signal 15"));
        assert!(is_transient_halt_reason("process exit"));
        assert!(!is_transient_halt_reason("invariant violated: [..]"));
    }

    /// Boundary scenario 5 (auto-clear half): a lock engaged on one UTC day
    /// clears the moment `evaluate_daily_loss_lock` runs against the next
    /// day, even if a slot's `today_realized_loss` hasn't been zeroed by
    /// anything else yet.
    #[test]
    fn daily_loss_lock_auto_clears_on_utc_day_rollover() {
        let mut orch = orchestrator();
        orch.add_slot(25.0);
        let today = Utc::now();
        orch.slots[0].state.today_realized_loss = 60.0;
        orch.evaluate_daily_loss_lock(today);
        assert!(orch.daily_loss.locked);
        assert!(matches!(orch.mode, RunMode::Paused));

        let tomorrow = today + Duration::days(1);
        orch.evaluate_daily_loss_lock(tomorrow);
        assert!(!orch.daily_loss.locked);
        assert_eq!(orch.slots[0].state.today_realized_loss, 0.0);
        assert!(matches!(orch.mode, RunMode::Running));
    }

    /// A HALT from an unrelated cause (e.g. an invariant violation) must
    /// survive a day rollover even if the daily-loss lock happened to be
    /// set too — only the daily-loss PAUSED state auto-clears.
    #[test]
    fn daily_loss_rollover_does_not_clobber_an_unrelated_halt() {
        let mut orch = orchestrator();
        orch.add_slot(25.0);
        let today = Utc::now();
        orch.slots[0].state.today_realized_loss = 60.0;
        orch.evaluate_daily_loss_lock(today);
        assert!(matches!(orch.mode, RunMode::Paused));

        orch.enter_halted("invariant violated: [..]".to_string());
        assert!(matches!(orch.mode, RunMode::Halted));

        let tomorrow = today + Duration::days(1);
        orch.evaluate_daily_loss_lock(tomorrow);
        assert!(!orch.daily_loss.locked);
        assert!(matches!(orch.mode, RunMode::Halted));
    }
}
