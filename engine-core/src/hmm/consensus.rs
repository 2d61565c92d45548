use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::constants;
use super::detector::{Regime, RegimeReading};

/// Which agreement case produced the consensus label (spec.md §4.6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsensusMode {
    Full,
    OneMinuteCooling,
    FifteenMinuteNeutralOrConflict,
}

/// Blended primary/secondary reading (spec.md §4.6.1, "critical
/// correctness fix": the label comes from agreement between detectors,
/// never from `sign(bias)`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsensusReading {
    pub mode: ConsensusMode,
    pub label: Regime,
    pub probabilities: [f64; 3],
    pub effective_confidence: f64,
    /// Policy-gated signal: zero whenever `label` is `Ranging`, or when
    /// `effective_confidence` is below threshold.
    pub bias_signal: f64,
    /// Raw directional differential retained for diagnostics even when
    /// `bias_signal` is gated to zero (spec.md §4.6.1 "bias is retained
    /// separately for directional strength").
    pub raw_bias: f64,
}

/// Blend two detectors' readings by weight (`w1 + w15` need not be
/// pre-normalized; this function normalizes) and derive the consensus
/// label from their agreement, not from the blended probabilities' sign
/// (spec.md §4.6.1).
pub fn consensus(primary: &RegimeReading, secondary: &RegimeReading, w1: f64, w15: f64) -> ConsensusReading {
    let total = (w1 + w15).max(1e-9);
    let (w1, w15) = (w1 / total, w15 / total);

    let mut probabilities = [0.0; 3];
    for i in 0..3 {
        probabilities[i] = primary.probs[i] * w1 + secondary.probs[i] * w15;
    }
    let raw_bias = constants::HMM_BIAS_GAIN * (probabilities[2] - probabilities[0]);

    let (mode, label) = if primary.regime == secondary.regime {
        (ConsensusMode::Full, primary.regime)
    } else if primary.regime == Regime::Ranging && secondary.regime != Regime::Ranging {
        (ConsensusMode::OneMinuteCooling, secondary.regime)
    } else {
        (ConsensusMode::FifteenMinuteNeutralOrConflict, Regime::Ranging)
    };

    let effective_confidence = match mode {
        ConsensusMode::FifteenMinuteNeutralOrConflict => 0.0,
        _ => primary.effective_confidence.min(secondary.effective_confidence),
    };

    // Bias is only meaningful for a directional consensus label; a
    // Ranging label reports zero even when the underlying differential is
    // nonzero (spec.md boundary scenario 4).
    let bias_signal = if matches!(label, Regime::Ranging) || effective_confidence < constants::HMM_CONFIDENCE_THRESHOLD {
        0.0
    } else {
        raw_bias
    };

    ConsensusReading { mode, label, probabilities, effective_confidence, bias_signal, raw_bias }
}

/// Tertiary-cadence transition confirmation (spec.md §4.6.2): a regime
/// change starts a record; each subsequent tertiary candle increments its
/// counter until `ACCUM_CONFIRMATION_CANDLES` is reached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TertiaryTransition {
    pub from: Regime,
    pub to: Regime,
    pub confirmation_count: u32,
    pub confirmed: bool,
    pub changed_at: DateTime<Utc>,
}

impl TertiaryTransition {
    pub fn transition_age_sec(&self, now: DateTime<Utc>) -> i64 {
        (now - self.changed_at).num_seconds().max(0)
    }
}

/// Advance (or start) the tertiary transition record for a new observed
/// regime (spec.md §4.6.2).
pub fn on_tertiary_update(
    current: &mut Option<TertiaryTransition>,
    prev_regime: Regime,
    new_regime: Regime,
    at: DateTime<Utc>,
) {
    match current {
        Some(t) if t.to == new_regime => {
            t.confirmation_count = t.confirmation_count.saturating_add(1);
            t.confirmed = t.confirmation_count >= constants::ACCUM_CONFIRMATION_CANDLES && t.to != t.from;
        }
        _ => {
            if new_regime != prev_regime {
                *current = Some(TertiaryTransition {
                    from: prev_regime,
                    to: new_regime,
                    confirmation_count: 1,
                    confirmed: 1 >= constants::ACCUM_CONFIRMATION_CANDLES,
                    changed_at: at,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(regime: Regime, probs: [f64; 3], confidence: f64) -> RegimeReading {
        RegimeReading {
            regime,
            probs,
            confidence,
            effective_confidence: confidence,
            bias_signal: 0.0,
        }
    }

    #[test]
    fn boundary_scenario_4_agreement_ranging_bias_gated_to_zero() {
        let primary = reading(Regime::Ranging, [0.03, 0.988, 0.011], 0.988);
        let secondary = reading(Regime::Ranging, [0.019, 0.981, 0.00], 0.981);
        let out = consensus(&primary, &secondary, 0.3, 0.7);
        assert_eq!(out.mode, ConsensusMode::Full);
        assert_eq!(out.label, Regime::Ranging);
        assert!((out.probabilities[0] - 0.0223).abs() < 1e-3);
        assert!((out.probabilities[1] - 0.983).abs() < 1e-3);
        assert!((out.probabilities[2] - 0.0033).abs() < 1e-3);
        assert_eq!(out.bias_signal, 0.0);
        assert!(out.raw_bias < 0.0);
    }

    #[test]
    fn one_minute_cooling_takes_secondary_label() {
        let primary = reading(Regime::Ranging, [0.1, 0.8, 0.1], 0.8);
        let secondary = reading(Regime::Bullish, [0.05, 0.1, 0.85], 0.85);
        let out = consensus(&primary, &secondary, 0.5, 0.5);
        assert_eq!(out.mode, ConsensusMode::OneMinuteCooling);
        assert_eq!(out.label, Regime::Bullish);
    }

    #[test]
    fn conflicting_directional_labels_force_ranging_zero_confidence() {
        let primary = reading(Regime::Bullish, [0.1, 0.1, 0.8], 0.8);
        let secondary = reading(Regime::Bearish, [0.8, 0.1, 0.1], 0.8);
        let out = consensus(&primary, &secondary, 0.5, 0.5);
        assert_eq!(out.mode, ConsensusMode::FifteenMinuteNeutralOrConflict);
        assert_eq!(out.label, Regime::Ranging);
        assert_eq!(out.effective_confidence, 0.0);
        assert_eq!(out.bias_signal, 0.0);
    }

    #[test]
    fn tertiary_transition_confirms_after_threshold() {
        let mut current = None;
        let now = Utc::now();
        on_tertiary_update(&mut current, Regime::Ranging, Regime::Bullish, now);
        assert!(!current.as_ref().unwrap().confirmed);
        on_tertiary_update(&mut current, Regime::Ranging, Regime::Bullish, now + chrono::Duration::hours(1));
        on_tertiary_update(&mut current, Regime::Ranging, Regime::Bullish, now + chrono::Duration::hours(2));
        assert!(current.unwrap().confirmed);
    }
}
