use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::constants;
use super::ema::{dt_seconds, Ema};

/// Dual-EMA trend score and its dynamic-idle-target hysteresis state
/// (spec.md §4.5), persisted across rebalancer ticks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TrendState {
    pub fast_ema: Ema,
    pub slow_ema: Ema,
    #[serde(default)]
    pub sample_count: u64,
    #[serde(default)]
    pub last_update_at: Option<DateTime<Utc>>,
    /// Smoothing EMA applied to the clamped target itself.
    pub target_ema: Ema,
    #[serde(default)]
    pub hold_until: Option<DateTime<Utc>>,
}

/// `trend_score = (fast_ema − slow_ema) / slow_ema`, with cold-start and
/// data-gap reinitialization (spec.md §4.5).
pub fn update_trend_score(state: &mut TrendState, price: f64, at: DateTime<Utc>) -> f64 {
    let dt = dt_seconds(state.last_update_at, at);

    let data_gap = dt > 2.0 * constants::TREND_SLOW_HALFLIFE_SEC;
    let cold_start = !state.fast_ema.initialized && state.sample_count < constants::TREND_MIN_SAMPLES;

    if data_gap || cold_start {
        state.fast_ema.reset(price);
        state.slow_ema.reset(price);
        state.sample_count = state.sample_count.saturating_add(1);
        state.last_update_at = Some(at);
        return 0.0;
    }

    state.fast_ema.update(price, dt, constants::TREND_FAST_HALFLIFE_SEC);
    state.slow_ema.update(price, dt, constants::TREND_SLOW_HALFLIFE_SEC);
    state.sample_count = state.sample_count.saturating_add(1);
    state.last_update_at = Some(at);

    if state.slow_ema.value == 0.0 {
        0.0
    } else {
        (state.fast_ema.value - state.slow_ema.value) / state.slow_ema.value
    }
}

/// Three-stage hysteresis over the signal-driven idle target: dead-zone,
/// time-hold, smoothing EMA (spec.md §4.5). `signal` is the blended
/// trend/HMM signal computed by the PD controller, not the raw trend score.
///
/// The smoothing EMA's halflife isn't named in spec.md §4.5; tying it to
/// `TREND_HYSTERESIS_SEC` keeps the smoothing window and the hold window
/// the same order of magnitude (documented as an open-question resolution).
pub fn dynamic_idle_target(state: &mut TrendState, signal: f64, at: DateTime<Utc>) -> f64 {
    let raw = if signal.abs() < constants::TREND_DEAD_ZONE {
        constants::TREND_IDLE_BASE
    } else {
        (constants::TREND_IDLE_BASE - constants::TREND_IDLE_SENSITIVITY * signal)
            .clamp(constants::TREND_IDLE_FLOOR, constants::TREND_IDLE_CEILING)
    };

    let held = state.hold_until.is_some_and(|until| at < until);
    if held {
        return state.target_ema.value;
    }

    if state.target_ema.initialized && (raw - state.target_ema.value).abs() > constants::TREND_JUMP_ARM_THRESHOLD {
        state.hold_until = Some(at + chrono::Duration::seconds(constants::TREND_HYSTERESIS_SEC));
    }

    state.target_ema.update(raw, 1.0, constants::TREND_HYSTERESIS_SEC);
    state.target_ema.value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cold_start_seeds_both_emas_and_returns_zero() {
        let mut state = TrendState::default();
        let score = update_trend_score(&mut state, 100.0, Utc::now());
        assert_eq!(score, 0.0);
        assert!(state.fast_ema.initialized);
        assert!(state.slow_ema.initialized);
    }

    #[test]
    fn data_gap_reinitializes_emas() {
        let mut state = TrendState {
            sample_count: constants::TREND_MIN_SAMPLES + 1,
            ..TrendState::default()
        };
        state.fast_ema.reset(50.0);
        state.slow_ema.reset(40.0);
        let now = Utc::now();
        state.last_update_at = Some(now);
        let later = now + chrono::Duration::seconds((3.0 * constants::TREND_SLOW_HALFLIFE_SEC) as i64);
        let score = update_trend_score(&mut state, 100.0, later);
        assert_eq!(score, 0.0);
        assert_eq!(state.fast_ema.value, 100.0);
    }

    #[test]
    fn dead_zone_holds_target_at_base() {
        let mut state = TrendState::default();
        let target = dynamic_idle_target(&mut state, 0.001, Utc::now());
        assert!((target - constants::TREND_IDLE_BASE).abs() < 1e-9);
    }

    #[test]
    fn large_jump_arms_hold_window() {
        let mut state = TrendState::default();
        let now = Utc::now();
        dynamic_idle_target(&mut state, 0.0, now);
        dynamic_idle_target(&mut state, 1.0, now);
        assert!(state.hold_until.is_some());
    }
}
