use chrono::{DateTime, Duration, Utc};

use crate::config::EngineConfig;
use crate::model::{CycleRecord, PairState, TradeLeg};

/// Per-leg P&L legs of the cycle-booking formula (spec.md §4.1.6):
///
/// - A (short): `gross = (entry − exit) · volume`, `quote_fee = entry_fee`.
/// - B (long):  `gross = (exit − entry) · volume`, `quote_fee = exit_fee`.
pub struct BookCycleInput {
    pub trade_id: TradeLeg,
    pub cycle: u64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub volume: f64,
    pub entry_fee: f64,
    pub exit_fee: f64,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub from_recovery: bool,
    pub regime_at_entry: Option<i32>,
}

/// Book a completed cycle: compute P&L, append the append-only
/// `CycleRecord`, update running totals, and roll loss counters/cooldowns
/// (spec.md §4.1.6, §4.1.7).
pub fn book_cycle(state: &mut PairState, cfg: &EngineConfig, input: BookCycleInput) -> CycleRecord {
    let (gross, quote_fee) = match input.trade_id {
        TradeLeg::A => (
            (input.entry_price - input.exit_price) * input.volume,
            input.entry_fee,
        ),
        TradeLeg::B => (
            (input.exit_price - input.entry_price) * input.volume,
            input.exit_fee,
        ),
    };
    let fees = input.entry_fee + input.exit_fee;
    let net = gross - fees;
    let settled_usd = gross - quote_fee;

    let record = CycleRecord {
        trade_id: input.trade_id,
        cycle: input.cycle,
        entry_price: input.entry_price,
        exit_price: input.exit_price,
        volume: input.volume,
        gross_profit: gross,
        fees,
        net_profit: net,
        entry_fee: input.entry_fee,
        exit_fee: input.exit_fee,
        quote_fee,
        settled_usd,
        entry_time: input.entry_time,
        exit_time: input.exit_time,
        from_recovery: input.from_recovery,
        regime_at_entry: input.regime_at_entry,
    };

    state.total_profit += net;
    state.total_settled_usd += settled_usd;
    state.total_fees += fees;
    state.total_round_trips += 1;
    state.today_realized_loss += (-net).max(0.0);
    state.cycles.push(record.clone());

    roll_loss_counters(state, cfg, input.trade_id, net);
    bump_reentry_cooldown(state, cfg, input.trade_id);

    record
}

/// Consecutive-loss streak and loss-cooldown clock (spec.md §4.1.7, first
/// half).
fn roll_loss_counters(state: &mut PairState, cfg: &EngineConfig, leg: TradeLeg, net: f64) {
    let now = state.now;
    let leg_state = state.leg_state_mut(leg);
    if net < 0.0 {
        leg_state.consecutive_losses += 1;
    } else {
        leg_state.consecutive_losses = 0;
    }
    if leg_state.consecutive_losses >= cfg.loss_cooldown_start {
        let candidate = now + Duration::seconds(cfg.loss_cooldown_sec);
        leg_state.cooldown_until = Some(match leg_state.cooldown_until {
            Some(existing) => existing.max(candidate),
            None => candidate,
        });
    }
}

/// Every orphan and cycle close extends `cooldown_until[leg]` by
/// `reentry_base_cooldown_sec`, independent of P&L (spec.md §4.1.7, second
/// half).
pub fn bump_reentry_cooldown(state: &mut PairState, cfg: &EngineConfig, leg: TradeLeg) {
    if cfg.reentry_base_cooldown_sec <= 0 {
        return;
    }
    let now = state.now;
    let leg_state = state.leg_state_mut(leg);
    let base = leg_state.cooldown_until.unwrap_or(now).max(now);
    leg_state.cooldown_until = Some(base + Duration::seconds(cfg.reentry_base_cooldown_sec));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn leg_a_gross_is_entry_minus_exit() {
        let cfg = EngineConfig::default();
        let mut state = PairState::new(Utc::now(), 1.0);
        let rec = book_cycle(
            &mut state,
            &cfg,
            BookCycleInput {
                trade_id: TradeLeg::A,
                cycle: 1,
                entry_price: 1.10,
                exit_price: 1.00,
                volume: 10.0,
                entry_fee: 0.01,
                exit_fee: 0.01,
                entry_time: Utc::now(),
                exit_time: Utc::now(),
                from_recovery: false,
                regime_at_entry: None,
            },
        );
        assert!((rec.gross_profit - 1.0).abs() < 1e-9);
        assert!((rec.net_profit - 0.98).abs() < 1e-9);
        assert_eq!(rec.quote_fee, 0.01);
    }

    #[test]
    fn leg_b_gross_is_exit_minus_entry() {
        let cfg = EngineConfig::default();
        let mut state = PairState::new(Utc::now(), 1.0);
        let rec = book_cycle(
            &mut state,
            &cfg,
            BookCycleInput {
                trade_id: TradeLeg::B,
                cycle: 1,
                entry_price: 1.00,
                exit_price: 1.10,
                volume: 10.0,
                entry_fee: 0.01,
                exit_fee: 0.01,
                entry_time: Utc::now(),
                exit_time: Utc::now(),
                from_recovery: false,
                regime_at_entry: None,
            },
        );
        assert!((rec.gross_profit - 1.0).abs() < 1e-9);
        assert_eq!(rec.quote_fee, 0.01);
    }

    #[test]
    fn losing_cycle_sets_cooldown_after_threshold() {
        let cfg = EngineConfig {
            loss_cooldown_start: 1,
            loss_cooldown_sec: 300,
            reentry_base_cooldown_sec: 0,
            ..EngineConfig::default()
        };
        let mut state = PairState::new(Utc::now(), 1.0);
        book_cycle(
            &mut state,
            &cfg,
            BookCycleInput {
                trade_id: TradeLeg::A,
                cycle: 1,
                entry_price: 1.00,
                exit_price: 1.10,
                volume: 1.0,
                entry_fee: 0.0,
                exit_fee: 0.0,
                entry_time: Utc::now(),
                exit_time: Utc::now(),
                from_recovery: false,
                regime_at_entry: None,
            },
        );
        assert_eq!(state.leg_a.consecutive_losses, 1);
        assert!(state.leg_a.cooldown_until.is_some());
    }
}
