//! Invariant checker (spec.md §4.2, §8 property 1).
//!
//! Pure: takes a state snapshot and returns the violations found, never
//! mutates anything. The orchestrator calls [`evaluate`] after every
//! reducer result; a non-empty return means HALTED.

use crate::config::{EngineConfig, LegSizes};
use crate::model::{PairState, Phase, Role, TradeLeg};

/// Structural checks that can never be bypassed: invariants 1, 3, 4, 5, 6
/// from spec.md §3.
fn check_structural(state: &PairState, cfg: &EngineConfig) -> Vec<String> {
    let mut violations = Vec::new();

    let mut seen_local_ids = std::collections::HashSet::new();
    for order in &state.orders {
        if !seen_local_ids.insert(order.local_id) {
            violations.push(format!("duplicate local_id {}", order.local_id));
        }
        if order.volume <= 0.0 {
            violations.push(format!("order {} has non-positive volume {}", order.local_id, order.volume));
        }
        if order.role == Role::Exit && order.entry_price <= 0.0 {
            violations.push(format!("exit order {} has entry_price <= 0", order.local_id));
        }
    }

    let mut seen_recovery_ids = std::collections::HashSet::new();
    for recovery in &state.recovery_orders {
        if !seen_recovery_ids.insert(recovery.recovery_id) {
            violations.push(format!("duplicate recovery_id {}", recovery.recovery_id));
        }
        if recovery.volume <= 0.0 {
            violations.push(format!("recovery {} has non-positive volume {}", recovery.recovery_id, recovery.volume));
        }
    }

    let phase_is_s2 = matches!(state.phase(), Phase::S2);
    if state.s2_entered_at.is_some() != phase_is_s2 {
        violations.push("s2_entered_at inconsistent with phase".to_string());
    }

    if state.cycle_a < 1 {
        violations.push(format!("cycle_a counter {} below 1", state.cycle_a));
    }
    if state.cycle_b < 1 {
        violations.push(format!("cycle_b counter {} below 1", state.cycle_b));
    }

    if state.recovery_orders.len() > cfg.max_recovery_slots {
        violations.push(format!(
            "recovery_orders len {} exceeds max_recovery_slots {}",
            state.recovery_orders.len(),
            cfg.max_recovery_slots
        ));
    }

    violations
}

/// S0 liveness: every non-suppressed leg should carry an active entry.
/// Bypassable by the two §4.2 clauses — a bare structural read can't tell a
/// stalled slot from one that's still waiting on funding or startup.
fn check_liveness(state: &PairState) -> Vec<String> {
    if !matches!(state.phase(), Phase::S0) {
        return Vec::new();
    }
    let mut violations = Vec::new();
    for leg in [TradeLeg::A, TradeLeg::B] {
        if state.leg_allowed(leg) {
            let has_entry = state
                .orders
                .iter()
                .any(|o| o.trade_id == leg && o.role == Role::Entry);
            if !has_entry {
                violations.push(format!("s0_missing_entry:{leg}"));
            }
        }
    }
    violations
}

/// Bypass (a): the target order for a missing leg can't clear the
/// exchange's minimum size — there is nothing useful the reducer could do
/// about it, so it's not a fault.
fn min_size_wait(
    state: &PairState,
    cfg: &EngineConfig,
    order_size_usd: f64,
    order_sizes: Option<&LegSizes>,
) -> bool {
    if !matches!(state.phase(), Phase::S0) || state.market_price <= 0.0 {
        return false;
    }
    for leg in [TradeLeg::A, TradeLeg::B] {
        if !state.leg_allowed(leg) {
            continue;
        }
        let has_entry = state
            .orders
            .iter()
            .any(|o| o.trade_id == leg && o.role == Role::Entry);
        if has_entry {
            continue;
        }
        let usd = order_sizes
            .map(|s| s.for_leg(leg, order_size_usd))
            .unwrap_or(order_size_usd);
        let volume = usd / state.market_price;
        if volume < cfg.min_volume || usd < cfg.min_cost_usd {
            return true;
        }
    }
    false
}

/// Bypass (b): fresh slot, zero exits, at most one entry placed — a
/// transient shape on the way to full S0, not a stall.
fn bootstrap_pending(state: &PairState) -> bool {
    matches!(state.phase(), Phase::S0)
        && !state.orders.iter().any(|o| o.role == Role::Exit)
        && state.orders.iter().filter(|o| o.role == Role::Entry).count() <= 1
}

/// Full evaluation: structural violations always surface; the liveness
/// check is suppressed when either bypass predicate holds.
pub fn evaluate(
    state: &PairState,
    cfg: &EngineConfig,
    order_size_usd: f64,
    order_sizes: Option<&LegSizes>,
) -> Vec<String> {
    let mut violations = check_structural(state, cfg);

    let liveness = check_liveness(state);
    if !liveness.is_empty()
        && !bootstrap_pending(state)
        && !min_size_wait(state, cfg, order_size_usd, order_sizes)
    {
        violations.extend(liveness);
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{OrderState, Side};
    use chrono::Utc;

    fn entry(local_id: u64, leg: TradeLeg) -> OrderState {
        OrderState {
            local_id,
            side: leg.entry_side(),
            role: Role::Entry,
            price: 0.10,
            volume: 10.0,
            trade_id: leg,
            cycle: 1,
            txid: String::new(),
            placed_at: Utc::now(),
            entry_price: 0.0,
            entry_fee: 0.0,
            entry_filled_at: None,
            regime_at_entry: None,
        }
    }

    #[test]
    fn clean_bootstrap_state_has_no_violations() {
        let cfg = EngineConfig::default();
        let mut state = PairState::new(Utc::now(), 1.0);
        state.market_price = 0.10;
        state.orders.push(entry(1, TradeLeg::A));
        let violations = evaluate(&state, &cfg, 25.0, None);
        assert!(violations.is_empty(), "{violations:?}");
    }

    #[test]
    fn missing_entry_flagged_without_bypass() {
        let cfg = EngineConfig::default();
        let mut state = PairState::new(Utc::now(), 1.0);
        state.market_price = 0.10;
        state.orders.push(entry(1, TradeLeg::A));
        state.orders.push(entry(2, TradeLeg::A));
        // Two entries on A, none on B: not bootstrap_pending (count > 1),
        // not min-size-starved (default sizing clears the min).
        let violations = evaluate(&state, &cfg, 25.0, None);
        assert!(violations.iter().any(|v| v.contains("s0_missing_entry:B")));
    }

    #[test]
    fn min_size_wait_bypasses_missing_entry() {
        let cfg = EngineConfig {
            min_cost_usd: 100.0,
            ..EngineConfig::default()
        };
        let mut state = PairState::new(Utc::now(), 1.0);
        state.market_price = 0.10;
        state.orders.push(entry(1, TradeLeg::A));
        state.orders.push(entry(2, TradeLeg::A));
        let violations = evaluate(&state, &cfg, 25.0, None);
        assert!(violations.is_empty());
    }

    #[test]
    fn duplicate_local_id_is_never_bypassed() {
        let cfg = EngineConfig::default();
        let mut state = PairState::new(Utc::now(), 1.0);
        state.orders.push(entry(1, TradeLeg::A));
        state.orders.push(entry(1, TradeLeg::B));
        let violations = evaluate(&state, &cfg, 25.0, None);
        assert!(violations.iter().any(|v| v.contains("duplicate local_id")));
    }

    #[test]
    fn exit_with_zero_entry_price_is_flagged() {
        let cfg = EngineConfig::default();
        let mut state = PairState::new(Utc::now(), 1.0);
        let mut exit = entry(1, TradeLeg::A);
        exit.role = Role::Exit;
        exit.side = Side::Buy;
        state.orders.push(exit);
        let violations = evaluate(&state, &cfg, 25.0, None);
        assert!(violations.iter().any(|v| v.contains("entry_price")));
    }
}
