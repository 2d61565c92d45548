use chrono::{DateTime, Utc};

use crate::config::EngineConfig;
use crate::error::ReducerError;
use crate::model::{Action, PairState, RecoveryOrder};

use super::cycle::{book_cycle, bump_reentry_cooldown, BookCycleInput};

/// Move an active exit into the recovery set (spec.md §4.1.8
/// `OrphanOrder`). Advances the leg's cycle counter and, if capacity is
/// exceeded, evicts the farthest-from-market recoveries first.
pub fn orphan_order(
    state: &mut PairState,
    cfg: &EngineConfig,
    local_id: u64,
    reason: &str,
) -> Result<Vec<Action>, ReducerError> {
    let idx = state
        .orders
        .iter()
        .position(|o| o.local_id == local_id)
        .ok_or(ReducerError::UnknownLocalId(local_id))?;
    let order = state.orders.remove(idx);
    let leg = order.trade_id;
    state.set_cycle_counter(leg, order.cycle + 1);

    let recovery_id = state.allocate_recovery_id();
    let recovery = RecoveryOrder {
        recovery_id,
        side: order.side,
        price: order.price,
        volume: order.volume,
        trade_id: leg,
        cycle: order.cycle,
        entry_price: order.entry_price,
        orphaned_at: state.now,
        entry_fee: order.entry_fee,
        entry_filled_at: order.entry_filled_at,
        txid: order.txid.clone(),
        reason: reason.to_string(),
        regime_at_entry: order.regime_at_entry,
    };
    state.recovery_orders.push(recovery);
    bump_reentry_cooldown(state, cfg, leg);

    let mut actions = vec![Action::OrphanOrder {
        local_id,
        recovery_id,
        reason: reason.to_string(),
    }];

    actions.extend(evict_over_capacity(state, cfg));
    Ok(actions)
}

/// Enforce `|recovery_orders| ≤ max_recovery_slots` (spec.md §3 invariant 6)
/// by evicting the farthest-from-market recovery, then oldest, then lowest
/// id, until back within capacity (spec.md §4.1.8).
fn evict_over_capacity(state: &mut PairState, cfg: &EngineConfig) -> Vec<Action> {
    let mut actions = Vec::new();
    while state.recovery_orders.len() > cfg.max_recovery_slots {
        let market = state.market_price;
        let victim_idx = eviction_victim_index(&state.recovery_orders, market);
        let victim = state.recovery_orders.remove(victim_idx);

        let exit_price = if market > 0.0 { market } else { victim.entry_price };
        let entry_time = victim.entry_filled_at.unwrap_or(victim.orphaned_at);
        let record = book_cycle(
            state,
            cfg,
            BookCycleInput {
                trade_id: victim.trade_id,
                cycle: victim.cycle,
                entry_price: victim.entry_price,
                exit_price,
                volume: victim.volume,
                entry_fee: victim.entry_fee,
                exit_fee: 0.0,
                entry_time,
                exit_time: state.now,
                from_recovery: true,
                regime_at_entry: victim.regime_at_entry,
            },
        );
        actions.push(Action::BookCycle { record: Box::new(record) });
        actions.push(Action::CancelOrder {
            local_id: victim.recovery_id,
            txid: victim.txid.clone(),
            reason: "recovery_cap_evict_priority".to_string(),
        });
    }
    actions
}

/// Eviction priority: greatest distance-from-market, then oldest
/// `orphaned_at`, then lowest id (spec.md §4.1.8).
fn eviction_victim_index(recoveries: &[RecoveryOrder], market: f64) -> usize {
    let mut best = 0usize;
    for i in 1..recoveries.len() {
        if is_higher_eviction_priority(&recoveries[i], &recoveries[best], market) {
            best = i;
        }
    }
    best
}

fn is_higher_eviction_priority(a: &RecoveryOrder, b: &RecoveryOrder, market: f64) -> bool {
    let da = a.distance_from(market);
    let db = b.distance_from(market);
    if da != db {
        return da > db;
    }
    if a.orphaned_at != b.orphaned_at {
        return a.orphaned_at < b.orphaned_at;
    }
    a.recovery_id < b.recovery_id
}

/// A recovery's counter-parent fill: book its cycle and roll loss counters,
/// then drop it (spec.md §4.1.5).
pub fn handle_recovery_fill(
    state: &mut PairState,
    cfg: &EngineConfig,
    recovery_id: u64,
    fill_price: f64,
    fee: f64,
    at: DateTime<Utc>,
) -> Result<Vec<Action>, ReducerError> {
    let idx = state
        .recovery_orders
        .iter()
        .position(|r| r.recovery_id == recovery_id)
        .ok_or(ReducerError::UnknownRecoveryId(recovery_id))?;
    let recovery = state.recovery_orders.remove(idx);
    let entry_time = recovery.entry_filled_at.unwrap_or(recovery.orphaned_at);

    let record = book_cycle(
        state,
        cfg,
        BookCycleInput {
            trade_id: recovery.trade_id,
            cycle: recovery.cycle,
            entry_price: recovery.entry_price,
            exit_price: fill_price,
            volume: recovery.volume,
            entry_fee: recovery.entry_fee,
            exit_fee: fee,
            entry_time,
            exit_time: at,
            from_recovery: true,
            regime_at_entry: recovery.regime_at_entry,
        },
    );
    Ok(vec![Action::BookCycle { record: Box::new(record) }])
}

/// Cancel a recovery without booking anything (spec.md §4.1.5).
pub fn handle_recovery_cancel(
    state: &mut PairState,
    recovery_id: u64,
) -> Result<Vec<Action>, ReducerError> {
    let idx = state
        .recovery_orders
        .iter()
        .position(|r| r.recovery_id == recovery_id)
        .ok_or(ReducerError::UnknownRecoveryId(recovery_id))?;
    state.recovery_orders.remove(idx);
    Ok(Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Side, TradeLeg};
    use chrono::Duration;

    fn mk_recovery(id: u64, price: f64, orphaned_at: DateTime<Utc>) -> RecoveryOrder {
        RecoveryOrder {
            recovery_id: id,
            side: Side::Buy,
            price,
            volume: 1.0,
            trade_id: TradeLeg::A,
            cycle: 1,
            entry_price: price,
            orphaned_at,
            entry_fee: 0.0,
            entry_filled_at: None,
            txid: format!("tx{id}"),
            reason: "s1_timeout".to_string(),
            regime_at_entry: None,
        }
    }

    #[test]
    fn boundary_scenario_3_evicts_farthest_from_market() {
        let cfg = EngineConfig {
            max_recovery_slots: 2,
            ..EngineConfig::default()
        };
        let now = Utc::now();
        let mut state = PairState::new(now, 1.0);
        state.market_price = 0.10;
        state.recovery_orders.push(mk_recovery(1, 0.09, now - Duration::seconds(30)));
        state.recovery_orders.push(mk_recovery(2, 0.11, now - Duration::seconds(20)));
        state.recovery_orders.push(mk_recovery(3, 0.115, now - Duration::seconds(10)));

        let actions = evict_over_capacity(&mut state, &cfg);
        assert_eq!(state.recovery_orders.len(), 2);
        assert!(!state.recovery_orders.iter().any(|r| r.recovery_id == 3));

        let cancelled = actions.iter().find_map(|a| match a {
            Action::CancelOrder { local_id, reason, .. } => Some((*local_id, reason.clone())),
            _ => None,
        });
        assert_eq!(cancelled, Some((3, "recovery_cap_evict_priority".to_string())));
    }
}
