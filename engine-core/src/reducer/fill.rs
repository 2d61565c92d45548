use chrono::{DateTime, Utc};

use crate::config::{EngineConfig, LegSizes};
use crate::error::ReducerError;
use crate::model::{Action, OrderState, PairState, Role, TradeLeg};

use super::cycle::{book_cycle, BookCycleInput};
use super::pricing::{exit_price, refresh_entry_price, round_to};

/// `FillEvent` handling (spec.md §4.1.4): an entry fill allocates its
/// counter-exit; an exit fill books the cycle and attempts a follow-up
/// entry.
pub fn handle_fill_event(
    state: &mut PairState,
    cfg: &EngineConfig,
    local_id: u64,
    fill_price: f64,
    fee: f64,
    at: DateTime<Utc>,
    order_size_usd: f64,
    order_sizes: Option<&LegSizes>,
) -> Result<Vec<Action>, ReducerError> {
    let idx = state
        .orders
        .iter()
        .position(|o| o.local_id == local_id)
        .ok_or(ReducerError::UnknownLocalId(local_id))?;
    let order = state.orders.remove(idx);
    state.now = at;

    match order.role {
        Role::Entry => Ok(handle_entry_fill(state, cfg, order, fill_price, fee, at)),
        Role::Exit => handle_exit_fill(state, cfg, order, fill_price, fee, at, order_size_usd, order_sizes),
    }
}

fn handle_entry_fill(
    state: &mut PairState,
    cfg: &EngineConfig,
    order: OrderState,
    fill_price: f64,
    fee: f64,
    at: DateTime<Utc>,
) -> Vec<Action> {
    state.total_fees += fee;
    let leg = order.trade_id;
    let exit_side = leg.exit_side();
    let px = exit_price(fill_price, state.market_price, exit_side, leg, cfg, state.profit_pct_runtime);

    let new_id = state.allocate_order_id();
    state.orders.push(OrderState {
        local_id: new_id,
        side: exit_side,
        role: Role::Exit,
        price: px,
        volume: order.volume,
        trade_id: leg,
        cycle: order.cycle,
        txid: String::new(),
        placed_at: at,
        entry_price: fill_price,
        entry_fee: fee,
        entry_filled_at: Some(at),
        regime_at_entry: order.regime_at_entry,
    });

    vec![Action::PlaceOrder {
        local_id: new_id,
        side: exit_side,
        price: px,
        volume: order.volume,
        trade_id: leg,
        is_entry: false,
    }]
}

fn handle_exit_fill(
    state: &mut PairState,
    cfg: &EngineConfig,
    order: OrderState,
    fill_price: f64,
    fee: f64,
    at: DateTime<Utc>,
    order_size_usd: f64,
    order_sizes: Option<&LegSizes>,
) -> Result<Vec<Action>, ReducerError> {
    let leg = order.trade_id;
    let entry_time = order.entry_filled_at.unwrap_or(order.placed_at);

    let record = book_cycle(
        state,
        cfg,
        BookCycleInput {
            trade_id: leg,
            cycle: order.cycle,
            entry_price: order.entry_price,
            exit_price: fill_price,
            volume: order.volume,
            entry_fee: order.entry_fee,
            exit_fee: fee,
            entry_time,
            exit_time: at,
            from_recovery: false,
            regime_at_entry: order.regime_at_entry,
        },
    );
    state.set_cycle_counter(leg, order.cycle + 1);

    let mut actions = vec![Action::BookCycle { record: Box::new(record) }];
    actions.extend(try_place_followup_entry(state, cfg, leg, order_size_usd, order_sizes));
    Ok(actions)
}

/// Attempt a follow-up entry for `leg` right after its cycle closes, subject
/// to the fallback-mode leg gate and the leg's cooldown clock (spec.md
/// §4.1.4, §4.1.7). Silently declines below `min_volume`/`min_cost_usd` —
/// the orchestrator's bootstrap-pending bypass covers the persistent
/// under-funded case (spec.md §4.2).
fn try_place_followup_entry(
    state: &mut PairState,
    cfg: &EngineConfig,
    leg: TradeLeg,
    order_size_usd: f64,
    order_sizes: Option<&LegSizes>,
) -> Vec<Action> {
    if !state.leg_allowed(leg) {
        return Vec::new();
    }
    if let Some(cooldown_until) = state.leg_state(leg).cooldown_until {
        if state.now < cooldown_until {
            return Vec::new();
        }
    }
    if state.market_price <= 0.0 {
        return Vec::new();
    }

    let usd = order_sizes
        .map(|s| s.for_leg(leg, order_size_usd))
        .unwrap_or(order_size_usd);
    let volume = round_to(usd / state.market_price, cfg.volume_decimals);
    if volume < cfg.min_volume || usd < cfg.min_cost_usd {
        return Vec::new();
    }

    let side = leg.entry_side();
    let consecutive_losses = state.leg_state(leg).consecutive_losses;
    let price = refresh_entry_price(state.market_price, side, leg, cfg, consecutive_losses);
    let cycle = state.cycle_counter(leg);
    let local_id = state.allocate_order_id();
    state.orders.push(OrderState {
        local_id,
        side,
        role: Role::Entry,
        price,
        volume,
        trade_id: leg,
        cycle,
        txid: String::new(),
        placed_at: state.now,
        entry_price: 0.0,
        entry_fee: 0.0,
        entry_filled_at: None,
        regime_at_entry: None,
    });

    vec![Action::PlaceOrder {
        local_id,
        side,
        price,
        volume,
        trade_id: leg,
        is_entry: true,
    }]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Side;

    fn entry_order(leg: TradeLeg, side: Side) -> OrderState {
        OrderState {
            local_id: 1,
            side,
            role: Role::Entry,
            price: 0.10,
            volume: 10.0,
            trade_id: leg,
            cycle: 1,
            txid: "tx1".to_string(),
            placed_at: Utc::now(),
            entry_price: 0.0,
            entry_fee: 0.0,
            entry_filled_at: None,
            regime_at_entry: None,
        }
    }

    #[test]
    fn entry_fill_allocates_counter_exit() {
        let cfg = EngineConfig::default();
        let mut state = PairState::new(Utc::now(), 1.0);
        state.market_price = 0.10;
        state.orders.push(entry_order(TradeLeg::A, Side::Sell));

        let actions = handle_fill_event(&mut state, &cfg, 1, 0.10, 0.01, Utc::now(), 25.0, None).unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(state.orders.len(), 1);
        assert_eq!(state.orders[0].role, Role::Exit);
        assert_eq!(state.orders[0].side, Side::Buy);
    }

    #[test]
    fn exit_fill_books_cycle_and_places_followup() {
        let cfg = EngineConfig::default();
        let mut state = PairState::new(Utc::now(), 1.0);
        state.market_price = 0.099;
        let mut exit = entry_order(TradeLeg::A, Side::Buy);
        exit.role = Role::Exit;
        exit.entry_price = 0.10;
        exit.entry_filled_at = Some(Utc::now());
        state.orders.push(exit);

        let actions = handle_fill_event(&mut state, &cfg, 1, 0.099, 0.01, Utc::now(), 25.0, None).unwrap();
        assert!(matches!(actions[0], Action::BookCycle { .. }));
        assert_eq!(state.cycle_a, 2);
        assert_eq!(state.total_round_trips, 1);
        assert!(actions.iter().any(|a| matches!(a, Action::PlaceOrder { is_entry: true, .. })));
    }

    #[test]
    fn followup_suppressed_during_cooldown() {
        let cfg = EngineConfig::default();
        let mut state = PairState::new(Utc::now(), 1.0);
        state.market_price = 0.099;
        state.leg_a.cooldown_until = Some(Utc::now() + chrono::Duration::seconds(60));
        let mut exit = entry_order(TradeLeg::A, Side::Buy);
        exit.role = Role::Exit;
        exit.entry_price = 0.10;
        state.orders.push(exit);

        let actions = handle_fill_event(&mut state, &cfg, 1, 0.099, 0.0, Utc::now(), 25.0, None).unwrap();
        assert!(!actions.iter().any(|a| matches!(a, Action::PlaceOrder { is_entry: true, .. })));
    }
}
