use chrono::DateTime;
use chrono::Utc;

use crate::config::EngineConfig;
use crate::error::ReducerError;
use crate::model::{Action, OrderState, PairState, Phase, Role, Side};

use super::recovery::orphan_order;

/// `TimerTick` handling (spec.md §4.1.3): the stale-exit orphan rules. Idle
/// while `sticky_mode_enabled` is set — the operator has parked the slot and
/// nothing but an explicit command should move its orders.
pub fn handle_timer_tick(
    state: &mut PairState,
    cfg: &EngineConfig,
    at: DateTime<Utc>,
) -> Result<Vec<Action>, ReducerError> {
    state.now = at;
    if cfg.sticky_mode_enabled {
        return Ok(Vec::new());
    }

    match state.phase() {
        Phase::S1a | Phase::S1b => orphan_stale_single_exit(state, cfg, at),
        Phase::S2 => orphan_stale_s2_exit(state, cfg, at),
        Phase::S0 => Ok(Vec::new()),
    }
}

/// S1: a single exit order outstanding. Orphan it once it has sat past
/// `s1_orphan_after_sec` *and* the market has moved away from it (spec.md
/// §4.1.3) — a stale exit that the market is drifting back toward is left
/// alone.
fn orphan_stale_single_exit(
    state: &mut PairState,
    cfg: &EngineConfig,
    at: DateTime<Utc>,
) -> Result<Vec<Action>, ReducerError> {
    let exit = match state.orders.iter().find(|o| o.role == Role::Exit) {
        Some(o) => o.clone(),
        None => return Ok(Vec::new()),
    };

    if exit.exit_age_sec(at) < cfg.s1_orphan_after_sec {
        return Ok(Vec::new());
    }
    if state.market_price <= 0.0 || !moved_away(&exit, state.market_price) {
        return Ok(Vec::new());
    }

    orphan_order(state, cfg, exit.local_id, "s1_timeout")
}

/// S2: both legs hedged with no entries. Once the hedge has stood for
/// `s2_orphan_after_sec`, orphan whichever exit sits farther from the
/// current market so the nearer one keeps its chance to fill naturally
/// (spec.md §4.1.3).
fn orphan_stale_s2_exit(
    state: &mut PairState,
    cfg: &EngineConfig,
    at: DateTime<Utc>,
) -> Result<Vec<Action>, ReducerError> {
    let entered_at = match state.s2_entered_at {
        Some(t) => t,
        None => at,
    };
    if (at - entered_at).num_seconds() < cfg.s2_orphan_after_sec {
        return Ok(Vec::new());
    }
    if state.market_price <= 0.0 {
        return Ok(Vec::new());
    }

    let mut exits: Vec<OrderState> = state
        .orders
        .iter()
        .filter(|o| o.role == Role::Exit)
        .cloned()
        .collect();
    if exits.len() != 2 {
        return Ok(Vec::new());
    }
    let market = state.market_price;
    exits.sort_by(|a, b| {
        let da = (a.price - market).abs() / market;
        let db = (b.price - market).abs() / market;
        db.partial_cmp(&da).unwrap()
    });
    let victim = exits[0].clone();
    orphan_order(state, cfg, victim.local_id, "s2_timeout")
}

fn moved_away(exit: &OrderState, market: f64) -> bool {
    match exit.side {
        Side::Sell => market < exit.price,
        Side::Buy => market > exit.price,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TradeLeg;
    use chrono::Duration;

    fn exit_order(side: Side, price: f64, filled_at: DateTime<Utc>) -> OrderState {
        OrderState {
            local_id: 1,
            side,
            role: Role::Exit,
            price,
            volume: 10.0,
            trade_id: TradeLeg::A,
            cycle: 1,
            txid: "tx1".to_string(),
            placed_at: filled_at,
            entry_price: price * 0.99,
            entry_fee: 0.0,
            entry_filled_at: Some(filled_at),
            regime_at_entry: None,
        }
    }

    #[test]
    fn s1_orphans_after_timeout_when_market_moved_away() {
        let cfg = EngineConfig {
            s1_orphan_after_sec: 60,
            max_recovery_slots: 4,
            ..EngineConfig::default()
        };
        let now = Utc::now();
        let mut state = PairState::new(now, 1.0);
        state.market_price = 0.09;
        state
            .orders
            .push(exit_order(Side::Sell, 0.10, now - Duration::seconds(120)));

        let actions = handle_timer_tick(&mut state, &cfg, now).unwrap();
        assert!(!actions.is_empty());
        assert_eq!(state.orders.len(), 0);
        assert_eq!(state.recovery_orders.len(), 1);
    }

    #[test]
    fn s1_leaves_exit_when_market_has_not_moved_away() {
        let cfg = EngineConfig {
            s1_orphan_after_sec: 60,
            ..EngineConfig::default()
        };
        let now = Utc::now();
        let mut state = PairState::new(now, 1.0);
        state.market_price = 0.11;
        state
            .orders
            .push(exit_order(Side::Sell, 0.10, now - Duration::seconds(120)));

        let actions = handle_timer_tick(&mut state, &cfg, now).unwrap();
        assert!(actions.is_empty());
        assert_eq!(state.orders.len(), 1);
    }

    #[test]
    fn sticky_mode_suppresses_orphaning() {
        let cfg = EngineConfig {
            s1_orphan_after_sec: 60,
            sticky_mode_enabled: true,
            ..EngineConfig::default()
        };
        let now = Utc::now();
        let mut state = PairState::new(now, 1.0);
        state.market_price = 0.09;
        state
            .orders
            .push(exit_order(Side::Sell, 0.10, now - Duration::seconds(120)));

        let actions = handle_timer_tick(&mut state, &cfg, now).unwrap();
        assert!(actions.is_empty());
    }
}
