use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::constants;
use super::features::FeatureVector;
use super::gaussian::GaussianHmm;

/// Three-way market regime label (spec.md §4.6 "Label mapping").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Regime {
    Bearish = 0,
    Ranging = 1,
    Bullish = 2,
}

impl Regime {
    fn from_label_index(i: usize) -> Self {
        match i {
            0 => Regime::Bearish,
            2 => Regime::Bullish,
            _ => Regime::Ranging,
        }
    }
}

/// Training-depth confidence multiplier (spec.md §4.6 "Quality tier &
/// confidence modifier"). Bucket edges aren't pinned by the spec beyond the
/// four named tiers; these tie depth to the training-sample targets
/// already in `config::constants`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityTier {
    Shallow,
    Baseline,
    Deep,
    Full,
}

impl QualityTier {
    pub fn modifier(self) -> f64 {
        match self {
            QualityTier::Shallow => 0.70,
            QualityTier::Baseline => 0.85,
            QualityTier::Deep => 0.95,
            QualityTier::Full => 1.00,
        }
    }

    fn classify(samples: usize) -> Self {
        if samples < constants::HMM_MIN_TRAIN_SAMPLES * 3 / 2 {
            QualityTier::Shallow
        } else if samples < constants::HMM_TRAINING_CANDLES / 2 {
            QualityTier::Baseline
        } else if samples < constants::HMM_TRAINING_CANDLES {
            QualityTier::Deep
        } else {
            QualityTier::Full
        }
    }
}

/// A single detector's inference output (spec.md §4.6 "Inference").
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegimeReading {
    pub regime: Regime,
    /// `[P(bearish), P(ranging), P(bullish)]`, remapped into label order.
    pub probs: [f64; 3],
    pub confidence: f64,
    pub effective_confidence: f64,
    pub bias_signal: f64,
}

impl RegimeReading {
    /// Degraded reading: HMM disabled, untrained, or failed (spec.md
    /// §4.6.3 "Degradation guarantees").
    pub fn degraded() -> Self {
        Self {
            regime: Regime::Ranging,
            probs: [0.0, 1.0, 0.0],
            confidence: 0.0,
            effective_confidence: 0.0,
            bias_signal: 0.0,
        }
    }
}

/// One independent regime detector's persisted state (spec.md §4.6, one
/// instance per cadence: primary/secondary/tertiary).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectorState {
    pub model: Option<GaussianHmm>,
    /// `label_order[raw_state] = label index (0/1/2)`, fixed at training
    /// time by sorting states on their EMA-spread-% mean.
    pub label_order: Option<[usize; 3]>,
    pub last_train_ts: Option<DateTime<Utc>>,
    pub trained: bool,
    pub training_depth: usize,
    pub quality_tier: Option<QualityTier>,
}

impl Default for DetectorState {
    fn default() -> Self {
        Self {
            model: None,
            label_order: None,
            last_train_ts: None,
            trained: false,
            training_depth: 0,
            quality_tier: None,
        }
    }
}

impl DetectorState {
    pub fn needs_retrain(&self, now: DateTime<Utc>) -> bool {
        match self.last_train_ts {
            None => true,
            Some(t) => (now - t).num_seconds() >= constants::HMM_RETRAIN_INTERVAL_SEC,
        }
    }

    /// Train (or retrain) on the freshest `HMM_TRAINING_CANDLES` feature
    /// rows (spec.md §4.6 "Training"). No-ops if below
    /// `HMM_MIN_TRAIN_SAMPLES` — the detector stays/returns degraded.
    pub fn train(&mut self, features: &[FeatureVector], now: DateTime<Utc>, seed: u64) {
        if features.len() < constants::HMM_MIN_TRAIN_SAMPLES {
            return;
        }
        let window_start = features.len().saturating_sub(constants::HMM_TRAINING_CANDLES);
        let window = &features[window_start..];

        let model = GaussianHmm::train(window, 3, 30, seed);

        let mut order: Vec<usize> = (0..3).collect();
        order.sort_by(|&a, &b| model.means[a][1].partial_cmp(&model.means[b][1]).unwrap());
        let mut label_order = [0usize; 3];
        for (label, &raw_state) in order.iter().enumerate() {
            label_order[raw_state] = label;
        }

        self.training_depth = window.len();
        self.quality_tier = Some(QualityTier::classify(window.len()));
        self.model = Some(model);
        self.label_order = Some(label_order);
        self.last_train_ts = Some(now);
        self.trained = true;
    }

    /// Forward-backward over the last `HMM_INFERENCE_WINDOW` observations,
    /// argmax for the regime, confidence as the winning posterior mass
    /// (spec.md §4.6 "Inference").
    pub fn infer(&self, recent_features: &[FeatureVector]) -> RegimeReading {
        let (model, label_order) = match (&self.model, self.label_order) {
            (Some(m), Some(o)) if self.trained => (m, o),
            _ => return RegimeReading::degraded(),
        };
        if recent_features.is_empty() {
            return RegimeReading::degraded();
        }

        let start = recent_features.len().saturating_sub(constants::HMM_INFERENCE_WINDOW);
        let window = &recent_features[start..];
        let posterior = model.forward_backward(window);
        let last = match posterior.last() {
            Some(row) => row,
            None => return RegimeReading::degraded(),
        };

        let mut probs = [0.0; 3];
        for (raw_state, &p) in last.iter().enumerate() {
            probs[label_order[raw_state]] += p;
        }

        let (argmax_raw, &confidence) = last
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap();
        let regime = Regime::from_label_index(label_order[argmax_raw]);

        let modifier = self.quality_tier.map(QualityTier::modifier).unwrap_or(0.70);
        let effective_confidence = (confidence * modifier).clamp(0.0, 1.0);

        let mut bias_signal = constants::HMM_BIAS_GAIN * (probs[2] - probs[0]);
        if confidence < constants::HMM_CONFIDENCE_THRESHOLD {
            bias_signal = 0.0;
        }

        RegimeReading { regime, probs, confidence, effective_confidence, bias_signal }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degraded_reading_is_neutral() {
        let reading = RegimeReading::degraded();
        assert_eq!(reading.regime, Regime::Ranging);
        assert_eq!(reading.bias_signal, 0.0);
        assert_eq!(reading.confidence, 0.0);
    }

    #[test]
    fn untrained_detector_infers_degraded() {
        let detector = DetectorState::default();
        let reading = detector.infer(&[[0.0, 0.0, 0.0, 1.0]]);
        assert_eq!(reading.regime, Regime::Ranging);
    }

    #[test]
    fn quality_tier_modifier_ordering() {
        assert!(QualityTier::Shallow.modifier() < QualityTier::Baseline.modifier());
        assert!(QualityTier::Baseline.modifier() < QualityTier::Deep.modifier());
        assert!(QualityTier::Deep.modifier() < QualityTier::Full.modifier());
    }
}
