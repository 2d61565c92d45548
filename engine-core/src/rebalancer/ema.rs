use chrono::{DateTime, Utc};

/// Halflife-based exponential moving average, ticked with an explicit
/// `dt_sec` rather than a fixed period — the rebalancer and trend detector
/// both run on wall-clock cadences that can drift or skip under load
/// (spec.md §4.4, §4.5).
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Ema {
    pub value: f64,
    #[serde(default)]
    pub initialized: bool,
}

impl Default for Ema {
    fn default() -> Self {
        Self { value: 0.0, initialized: false }
    }
}

impl Ema {
    pub fn reset(&mut self, value: f64) {
        self.value = value;
        self.initialized = true;
    }

    /// `alpha = 1 - exp(-ln2 · dt / halflife)`; first sample seeds the
    /// value rather than blending against zero.
    pub fn update(&mut self, sample: f64, dt_sec: f64, halflife_sec: f64) {
        if !self.initialized || halflife_sec <= 0.0 {
            self.reset(sample);
            return;
        }
        let alpha = 1.0 - (-std::f64::consts::LN_2 * dt_sec / halflife_sec).exp();
        self.value += alpha * (sample - self.value);
    }
}

/// Seconds elapsed since `last`, clamped to ≥ 0 (a stale/rewound clock
/// should never produce a negative dt).
pub fn dt_seconds(last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    match last {
        Some(t) => (now - t).num_milliseconds().max(0) as f64 / 1000.0,
        None => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_update_seeds_value() {
        let mut ema = Ema::default();
        ema.update(10.0, 60.0, 300.0);
        assert_eq!(ema.value, 10.0);
    }

    #[test]
    fn converges_toward_sample_over_many_halflives() {
        let mut ema = Ema::default();
        ema.reset(0.0);
        for _ in 0..20 {
            ema.update(100.0, 300.0, 300.0);
        }
        assert!((ema.value - 100.0).abs() < 1e-6);
    }
}
