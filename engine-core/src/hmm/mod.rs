//! Advisory Hidden Markov regime layer (spec.md §4.6). Entirely read-only
//! with respect to the reducer: its outputs bias sizing and the
//! rebalancer's set-point, never a `PairState` transition.

mod consensus;
mod detector;
mod features;
mod gaussian;

pub use consensus::{consensus, on_tertiary_update, ConsensusMode, ConsensusReading, TertiaryTransition};
pub use detector::{DetectorState, QualityTier, Regime, RegimeReading};
pub use features::{extract_features, Candle, FeatureVector};
pub use gaussian::GaussianHmm;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The three independent detectors and their blended consensus (spec.md
/// §4.6: "Up to three independent detectors (primary base-interval,
/// secondary 15m-style, tertiary 1h-style)"), persisted whole in the
/// snapshot (spec.md §6.4).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct HmmLayer {
    pub primary: DetectorState,
    pub secondary: DetectorState,
    pub tertiary: DetectorState,
    #[serde(default)]
    pub tertiary_transition: Option<TertiaryTransition>,
    #[serde(default)]
    pub last_tertiary_regime: Option<Regime>,
    pub enabled: bool,
}

/// Everything the rebalancer and the status payload need from one update
/// pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HmmSnapshot {
    pub primary: RegimeReading,
    pub secondary: RegimeReading,
    pub tertiary: RegimeReading,
    pub consensus: ConsensusReading,
}

impl HmmLayer {
    pub fn new(enabled: bool) -> Self {
        Self { enabled, ..Self::default() }
    }

    /// Retrain any detector whose retrain interval has elapsed and has
    /// enough history, then run inference on all three and blend the
    /// primary/secondary consensus (spec.md §4.6, §4.6.1, §4.6.2).
    /// Falls back to the fully degraded snapshot when disabled (spec.md
    /// §4.6.3).
    pub fn update(
        &mut self,
        primary_candles: &[Candle],
        secondary_candles: &[Candle],
        tertiary_candles: &[Candle],
        consensus_weight_primary: f64,
        now: DateTime<Utc>,
        seed: u64,
    ) -> HmmSnapshot {
        if !self.enabled {
            let degraded = RegimeReading::degraded();
            return HmmSnapshot {
                primary: degraded,
                secondary: degraded,
                tertiary: degraded,
                consensus: consensus(&degraded, &degraded, consensus_weight_primary, 1.0 - consensus_weight_primary),
            };
        }

        let primary_features = extract_features(primary_candles);
        let secondary_features = extract_features(secondary_candles);
        let tertiary_features = extract_features(tertiary_candles);

        if self.primary.needs_retrain(now) {
            self.primary.train(&primary_features, now, seed);
        }
        if self.secondary.needs_retrain(now) {
            self.secondary.train(&secondary_features, now, seed.wrapping_add(1));
        }
        if self.tertiary.needs_retrain(now) {
            self.tertiary.train(&tertiary_features, now, seed.wrapping_add(2));
        }

        let primary_reading = self.primary.infer(&primary_features);
        let secondary_reading = self.secondary.infer(&secondary_features);
        let tertiary_reading = self.tertiary.infer(&tertiary_features);

        let prev_tertiary = self.last_tertiary_regime.unwrap_or(tertiary_reading.regime);
        on_tertiary_update(&mut self.tertiary_transition, prev_tertiary, tertiary_reading.regime, now);
        self.last_tertiary_regime = Some(tertiary_reading.regime);

        let consensus_reading = consensus(
            &primary_reading,
            &secondary_reading,
            consensus_weight_primary,
            1.0 - consensus_weight_primary,
        );

        HmmSnapshot {
            primary: primary_reading,
            secondary: secondary_reading,
            tertiary: tertiary_reading,
            consensus: consensus_reading,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_layer_is_fully_degraded() {
        let mut layer = HmmLayer::new(false);
        let snapshot = layer.update(&[], &[], &[], 0.3, Utc::now(), 1);
        assert_eq!(snapshot.consensus.label, Regime::Ranging);
        assert_eq!(snapshot.consensus.bias_signal, 0.0);
    }
}
