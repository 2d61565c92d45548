//! Integration coverage for the seed scenarios that don't already have an
//! inline unit test next to their implementation. Boundary scenario 1
//! (sell-entry/buy-exit pricing) lives in `reducer::pricing`; scenario 3
//! (recovery-cap eviction) lives in `reducer::recovery`; scenario 4
//! (consensus blend) lives in `hmm::consensus`. This file covers the
//! remaining three: the S2 stale-hedge orphan, the daily-loss lock across
//! slots, and the HALTED-by-transient-signal restart path.

use std::sync::Arc;

use chrono::{Duration, Utc};

use pairloop_core::config::EngineConfig;
use pairloop_core::gateway::{Balance, SimulatedGateway};
use pairloop_core::model::{Action, Event, OrderState, Phase, Role, Side, TradeLeg};
use pairloop_core::persistence::{DailyLossLockState, InMemoryPersistenceStore, PersistenceStore, RunMode, Snapshot};
use pairloop_core::reducer::transition;
use pairloop_core::Orchestrator;

fn exit(local_id: u64, side: Side, price: f64, trade_id: TradeLeg, filled_at: chrono::DateTime<Utc>) -> OrderState {
    OrderState {
        local_id,
        side,
        role: Role::Exit,
        price,
        volume: 10.0,
        trade_id,
        cycle: 1,
        txid: format!("tx{local_id}"),
        placed_at: filled_at,
        entry_price: price * 0.99,
        entry_fee: 0.0,
        entry_filled_at: Some(filled_at),
        regime_at_entry: None,
    }
}

/// Boundary scenario 2: a hedged S2 pair that has sat past
/// `s2_orphan_after_sec` orphans whichever exit is farther from market,
/// leaving the nearer one standing a chance to fill naturally.
#[test]
fn boundary_scenario_2_s2_orphans_farthest_exit_after_timeout() {
    let cfg = EngineConfig {
        s2_orphan_after_sec: 1800,
        max_recovery_slots: 4,
        ..EngineConfig::default()
    };
    let now = Utc::now();
    let entered_at = now - Duration::seconds(1801);

    let mut state = pairloop_core::model::PairState::new(entered_at, 1.0);
    state.market_price = 0.1000;
    state
        .orders
        .push(exit(1, Side::Buy, 0.1100, TradeLeg::B, entered_at));
    state
        .orders
        .push(exit(2, Side::Sell, 0.0950, TradeLeg::A, entered_at));
    assert_eq!(state.phase(), Phase::S2);
    state.s2_entered_at = Some(entered_at);

    let (next, actions) = transition(&state, &Event::TimerTick { at: now }, &cfg, 25.0, None);

    let orphaned = actions.iter().find_map(|a| match a {
        Action::OrphanOrder { local_id, reason, .. } => Some((*local_id, reason.clone())),
        _ => None,
    });
    assert_eq!(orphaned, Some((1, "s2_timeout".to_string())));
    assert!(next.orders.iter().any(|o| o.local_id == 2));
    assert!(!next.orders.iter().any(|o| o.local_id == 1));
    assert_eq!(next.recovery_orders.len(), 1);
    assert_eq!(next.s2_entered_at, None);
}

fn orchestrator() -> Orchestrator<SimulatedGateway, InMemoryPersistenceStore> {
    let gateway = Arc::new(SimulatedGateway::new(0.10, Balance { base: 100.0, quote: 1000.0 }, Utc::now()));
    let store = Arc::new(InMemoryPersistenceStore::new());
    Orchestrator::new(gateway, store, EngineConfig::default())
}

/// Boundary scenario 5 (engage half): two slots realize losses that
/// together cross `DAILY_LOSS_LIMIT` within the same UTC day, locking the
/// loop into PAUSED. The auto-clear-on-day-rollover half is covered by
/// `evaluate_daily_loss_lock`'s own unit test in `orchestrator::mod`, since
/// exercising it here would require injecting a clock `run_tick` doesn't
/// take.
#[tokio::test]
async fn boundary_scenario_5_daily_loss_lock_engages_across_two_slots() {
    let mut orch = orchestrator();
    orch.bootstrap().await.unwrap();
    orch.add_slot(25.0);
    orch.add_slot(25.0);

    orch.slots_mut()[0].state.today_realized_loss = 30.0;
    orch.run_tick().await.unwrap();
    assert!(matches!(orch.mode(), RunMode::Running));

    orch.slots_mut()[1].state.today_realized_loss = 25.0;
    orch.run_tick().await.unwrap();
    assert!(matches!(orch.mode(), RunMode::Paused));
}

/// Boundary scenario 6: a HALTED snapshot with a transient pause reason
/// ("signal 15" — the process was simply terminated, not an invariant
/// violation) comes back through bootstrap as INIT, then proceeds straight
/// to RUNNING.
#[tokio::test]
async fn boundary_scenario_6_restart_from_transient_halt_reaches_running() {
    let store = Arc::new(InMemoryPersistenceStore::new());
    store
        .save_snapshot(&Snapshot {
            mode: RunMode::Halted,
            pause_reason: Some("signal 15".to_string()),
            daily_loss: DailyLossLockState::default(),
            ..Snapshot::default()
        })
        .await
        .unwrap();

    let gateway = Arc::new(SimulatedGateway::new(0.10, Balance { base: 100.0, quote: 1000.0 }, Utc::now()));
    let mut orch = Orchestrator::new(gateway, store, EngineConfig::default());
    orch.bootstrap().await.unwrap();

    assert!(matches!(orch.mode(), RunMode::Running));
}
