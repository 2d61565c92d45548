//! The pure reducer (spec.md §4, §9): `transition` is the only way
//! `PairState` changes. No I/O, no wall-clock reads — every timestamp comes
//! from the `Event` itself, so replaying the same `(state, event)` pair is
//! always idempotent.

mod cycle;
mod fill;
mod price_tick;
mod pricing;
mod recovery;
mod timer_tick;

pub use cycle::{book_cycle, BookCycleInput};
pub use pricing::{exit_price, refresh_entry_price, round_to};
pub use recovery::{handle_recovery_cancel, handle_recovery_fill, orphan_order};

use tracing::warn;

use crate::config::{EngineConfig, LegSizes};
use crate::model::{Event, PairState, Phase};

/// Apply one event to `state`, returning the next state and the actions the
/// orchestrator must carry out against the exchange and the store.
///
/// A malformed event (referencing an order or recovery id the state doesn't
/// hold) can only arise from orchestrator misuse — a double-dispatched fill,
/// a replayed event against a state that has already moved on. The reducer
/// stays total by logging and producing no actions rather than panicking;
/// the caller is expected to reconcile against the exchange on its own
/// schedule regardless.
pub fn transition(
    state: &PairState,
    event: &Event,
    cfg: &EngineConfig,
    order_size_usd: f64,
    order_sizes: Option<&LegSizes>,
) -> (PairState, Vec<crate::model::Action>) {
    let mut next = state.clone();

    let actions = match event {
        Event::PriceTick { price, at } => price_tick::handle_price_tick(&mut next, cfg, *price, *at),
        Event::TimerTick { at } => timer_tick::handle_timer_tick(&mut next, cfg, *at)
            .unwrap_or_else(|e| { warn!(error = %e, "timer tick reducer error"); Vec::new() }),
        Event::FillEvent { local_id, fill_price, fee, at } => fill::handle_fill_event(
            &mut next, cfg, *local_id, *fill_price, *fee, *at, order_size_usd, order_sizes,
        )
        .unwrap_or_else(|e| { warn!(error = %e, local_id, "fill reducer error"); Vec::new() }),
        Event::RecoveryFillEvent { recovery_id, fill_price, fee, at } => {
            recovery::handle_recovery_fill(&mut next, cfg, *recovery_id, *fill_price, *fee, *at)
                .unwrap_or_else(|e| { warn!(error = %e, recovery_id, "recovery fill reducer error"); Vec::new() })
        }
        Event::RecoveryCancelEvent { recovery_id, .. } => {
            recovery::handle_recovery_cancel(&mut next, *recovery_id)
                .unwrap_or_else(|e| { warn!(error = %e, recovery_id, "recovery cancel reducer error"); Vec::new() })
        }
    };

    sync_s2_entered_at(&mut next);
    (next, actions)
}

/// `s2_entered_at` tracks how long the slot has been continuously in S2; it
/// is set the instant the phase becomes S2 and cleared the instant it
/// leaves, regardless of which handler caused the transition (spec.md
/// §4.1.3).
fn sync_s2_entered_at(state: &mut PairState) {
    match state.phase() {
        Phase::S2 => {
            if state.s2_entered_at.is_none() {
                state.s2_entered_at = Some(state.now);
            }
        }
        _ => state.s2_entered_at = None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Action, OrderState, Role, Side, TradeLeg};
    use chrono::Utc;

    #[test]
    fn s2_entered_at_set_on_transition_into_s2() {
        let cfg = EngineConfig::default();
        let now = Utc::now();
        let mut state = PairState::new(now, 1.0);
        state.market_price = 0.10;
        state.orders.push(OrderState {
            local_id: 1,
            side: Side::Buy,
            role: Role::Exit,
            price: 0.099,
            volume: 10.0,
            trade_id: TradeLeg::A,
            cycle: 1,
            txid: "tx1".to_string(),
            placed_at: now,
            entry_price: 0.10,
            entry_fee: 0.0,
            entry_filled_at: Some(now),
            regime_at_entry: None,
        });
        state.orders.push(OrderState {
            local_id: 2,
            side: Side::Sell,
            role: Role::Entry,
            price: 0.101,
            volume: 10.0,
            trade_id: TradeLeg::B,
            cycle: 1,
            txid: "tx2".to_string(),
            placed_at: now,
            entry_price: 0.0,
            entry_fee: 0.0,
            entry_filled_at: None,
            regime_at_entry: None,
        });

        let event = Event::FillEvent { local_id: 2, fill_price: 0.101, fee: 0.0, at: now };
        let (next, actions) = transition(&state, &event, &cfg, 25.0, None);
        assert!(matches!(next.phase(), Phase::S2));
        assert_eq!(next.s2_entered_at, Some(now));
        assert!(actions.iter().any(|a| matches!(a, Action::PlaceOrder { is_entry: false, .. })));
    }

    #[test]
    fn unknown_local_id_yields_no_actions_not_panic() {
        let cfg = EngineConfig::default();
        let state = PairState::new(Utc::now(), 1.0);
        let event = Event::FillEvent { local_id: 999, fill_price: 0.1, fee: 0.0, at: Utc::now() };
        let (_next, actions) = transition(&state, &event, &cfg, 25.0, None);
        assert!(actions.is_empty());
    }
}
