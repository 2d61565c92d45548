//! Engine configuration.
//!
//! `EngineConfig` is immutable for the lifetime of a run (spec.md §3). It is
//! loaded from TOML with `serde`, with `#[serde(default = ...)]` on every
//! field that has a sane operational default so older config files keep
//! loading.

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::model::TradeLeg;

/// Orchestrator-wide tunables that are not part of the pure reducer contract
/// but still govern loop cadence, budgets and thresholds (spec.md §4.3,
/// §4.4, §4.6, §5).
pub mod constants {
    pub const POLL_INTERVAL_SECONDS: u64 = 5;
    pub const REBALANCE_INTERVAL_SEC: i64 = 60;
    pub const STALE_PRICE_MAX_AGE_SEC: i64 = 30;
    pub const MAX_CONSECUTIVE_ERRORS: u32 = 5;
    pub const DAILY_LOSS_LIMIT: f64 = 50.0;

    /// Rebalancer PD gains and bounds (spec.md §4.4).
    pub const KP: f64 = 1.5;
    pub const KD: f64 = 0.4;
    pub const MAX_SKEW: f64 = 0.35;
    pub const MAX_SLEW: f64 = 0.05;
    pub const NEUTRAL_BAND: f64 = 0.02;
    pub const SIGN_FLIP_WINDOW_SEC: i64 = 3600;
    pub const SIGN_FLIP_THRESHOLD: u32 = 4;
    pub const MAX_SIZE_MULT: f64 = 1.75;
    pub const SENSITIVITY: f64 = 1.2;
    /// Halflives for the PD controller's error/velocity smoothing EMAs;
    /// spec.md §4.4 leaves these "configurable" without naming values.
    pub const SMOOTHED_ERROR_HALFLIFE_SEC: f64 = 300.0;
    pub const SMOOTHED_VELOCITY_HALFLIFE_SEC: f64 = 180.0;

    /// Trend score / dynamic idle target (spec.md §4.5).
    pub const HMM_BLEND_WITH_TREND: f64 = 0.6;
    pub const TREND_IDLE_SENSITIVITY: f64 = 0.25;
    pub const TREND_IDLE_FLOOR: f64 = 0.10;
    pub const TREND_IDLE_CEILING: f64 = 0.60;
    pub const TREND_IDLE_BASE: f64 = 0.30;
    pub const TREND_DEAD_ZONE: f64 = 0.05;
    pub const TREND_HYSTERESIS_SEC: i64 = 900;
    pub const TREND_JUMP_ARM_THRESHOLD: f64 = 0.02;
    pub const TREND_MIN_SAMPLES: u64 = 20;
    pub const TREND_FAST_HALFLIFE_SEC: f64 = 600.0;
    pub const TREND_SLOW_HALFLIFE_SEC: f64 = 7200.0;

    /// HMM subsystem (spec.md §4.6).
    /// Primary/secondary consensus blend weight (spec.md boundary scenario
    /// 4 uses 0.3/0.7 for primary/secondary).
    pub const HMM_CONSENSUS_WEIGHT_PRIMARY: f64 = 0.3;
    pub const HMM_TRAINING_CANDLES: usize = 500;
    pub const HMM_RETRAIN_INTERVAL_SEC: i64 = 6 * 3600;
    pub const HMM_MIN_TRAIN_SAMPLES: usize = 120;
    pub const HMM_INFERENCE_WINDOW: usize = 30;
    pub const HMM_BIAS_GAIN: f64 = 0.20;
    pub const HMM_CONFIDENCE_THRESHOLD: f64 = 0.55;
    pub const ACCUM_CONFIRMATION_CANDLES: u32 = 3;

    /// Exchange/orchestrator budgets.
    pub const PRIVATE_API_BUDGET_PER_LOOP: u32 = 20;
    pub const TRADE_HISTORY_LOOKBACK_DAYS: i64 = 7;
    pub const RECOVERY_SOFT_CLOSE_UTILIZATION: f64 = 0.85;

    /// Entry-velocity scheduler (spec.md §4.3.2): cap tightens as open-order
    /// headroom shrinks; `ENTRY_SCHEDULER_DEFAULT_CAP` is the ceiling once
    /// headroom is ample.
    pub const ENTRY_SCHEDULER_DEFAULT_CAP: usize = 5;
    pub const ENTRY_SCHEDULER_HEADROOM_MAX_OPEN_ORDERS: usize = 40;
}

/// Per-leg override for entry percentage or order size, keyed by `TradeLeg`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct LegOverride<T> {
    pub a: Option<T>,
    pub b: Option<T>,
}

impl<T: Copy> LegOverride<T> {
    pub fn for_leg(&self, leg: TradeLeg) -> Option<T> {
        match leg {
            TradeLeg::A => self.a,
            TradeLeg::B => self.b,
        }
    }
}

/// Immutable per-run configuration (spec.md §3 `EngineConfig`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    pub entry_pct: f64,
    #[serde(default)]
    pub entry_pct_override: LegOverride<f64>,
    pub profit_pct: f64,
    pub refresh_pct: f64,
    pub order_size_usd: f64,
    pub price_decimals: u32,
    pub volume_decimals: u32,
    pub min_volume: f64,
    pub min_cost_usd: f64,
    pub maker_fee_pct: f64,
    pub stale_price_max_age_sec: i64,
    pub s1_orphan_after_sec: i64,
    pub s2_orphan_after_sec: i64,
    pub loss_backoff_start: u32,
    pub loss_cooldown_start: u32,
    pub loss_cooldown_sec: i64,
    pub reentry_base_cooldown_sec: i64,
    pub backoff_factor: f64,
    pub backoff_max_multiplier: f64,
    pub max_consecutive_refreshes: u32,
    pub refresh_cooldown_sec: i64,
    pub max_recovery_slots: usize,
    #[serde(default)]
    pub sticky_mode_enabled: bool,
}

impl EngineConfig {
    /// `entry_pct` for a leg, honoring the optional per-leg override
    /// (spec.md §3, `EngineConfig`: "entry_pct (with optional per-leg
    /// overrides)").
    pub fn entry_pct_for_leg(&self, leg: TradeLeg) -> f64 {
        self.entry_pct_override.for_leg(leg).unwrap_or(self.entry_pct)
    }

    /// Backoff multiplier applied to the effective entry percentage on
    /// refresh (spec.md §4.1.2): grows by `backoff_factor` per consecutive
    /// loss past `loss_backoff_start`, capped at `backoff_max_multiplier`.
    pub fn backoff_multiplier(&self, consecutive_losses: u32) -> f64 {
        if consecutive_losses <= self.loss_backoff_start {
            return 1.0;
        }
        let steps = (consecutive_losses - self.loss_backoff_start) as f64;
        (1.0 + steps * (self.backoff_factor - 1.0).max(0.0)).min(self.backoff_max_multiplier)
    }

    /// Load from a TOML file, falling back to field defaults for anything
    /// the file omits (every field above is `#[serde(default)]`-free only
    /// because `EngineConfig` itself has no optional fields without one;
    /// `toml::from_str` against a partial document still fails loudly,
    /// which is the point — a missing required tunable should not silently
    /// run with a guessed value).
    pub fn load(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("reading config file {}", path.as_ref().display()))?;
        let cfg: Self = toml::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.as_ref().display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Sanity-check cross-field constraints TOML deserialization can't
    /// express on its own.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.entry_pct <= 0.0 || self.entry_pct >= 1.0 {
            anyhow::bail!("entry_pct must be in (0, 1), got {}", self.entry_pct);
        }
        if self.profit_pct <= 0.0 {
            anyhow::bail!("profit_pct must be positive, got {}", self.profit_pct);
        }
        if self.order_size_usd <= 0.0 {
            anyhow::bail!("order_size_usd must be positive, got {}", self.order_size_usd);
        }
        if self.backoff_max_multiplier < 1.0 {
            anyhow::bail!("backoff_max_multiplier must be >= 1.0, got {}", self.backoff_max_multiplier);
        }
        if self.max_recovery_slots == 0 {
            anyhow::bail!("max_recovery_slots must be at least 1");
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            entry_pct: 0.2,
            entry_pct_override: LegOverride::default(),
            profit_pct: 1.0,
            refresh_pct: 0.5,
            order_size_usd: 25.0,
            price_decimals: 6,
            volume_decimals: 2,
            min_volume: 1.0,
            min_cost_usd: 5.0,
            maker_fee_pct: 0.1,
            stale_price_max_age_sec: constants::STALE_PRICE_MAX_AGE_SEC,
            s1_orphan_after_sec: 3600,
            s2_orphan_after_sec: 1800,
            loss_backoff_start: 2,
            loss_cooldown_start: 3,
            loss_cooldown_sec: 900,
            reentry_base_cooldown_sec: 5,
            backoff_factor: 1.5,
            backoff_max_multiplier: 4.0,
            max_consecutive_refreshes: 3,
            refresh_cooldown_sec: 120,
            max_recovery_slots: 4,
            sticky_mode_enabled: false,
        }
    }
}

/// Optional per-leg sizing override passed into the reducer
/// (spec.md §4.1: "order_sizes optionally overrides per-leg sizing").
#[derive(Debug, Clone, Copy, Default)]
pub struct LegSizes {
    pub a_usd: Option<f64>,
    pub b_usd: Option<f64>,
}

impl LegSizes {
    pub fn for_leg(&self, leg: TradeLeg, default_usd: f64) -> f64 {
        match leg {
            TradeLeg::A => self.a_usd.unwrap_or(default_usd),
            TradeLeg::B => self.b_usd.unwrap_or(default_usd),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_pct_override_falls_back_to_base() {
        let mut cfg = EngineConfig::default();
        assert_eq!(cfg.entry_pct_for_leg(TradeLeg::A), cfg.entry_pct);
        cfg.entry_pct_override.a = Some(0.3);
        assert_eq!(cfg.entry_pct_for_leg(TradeLeg::A), 0.3);
        assert_eq!(cfg.entry_pct_for_leg(TradeLeg::B), cfg.entry_pct);
    }

    #[test]
    fn backoff_multiplier_caps_at_max() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.backoff_multiplier(0), 1.0);
        assert_eq!(cfg.backoff_multiplier(cfg.loss_backoff_start), 1.0);
        let m = cfg.backoff_multiplier(50);
        assert_eq!(m, cfg.backoff_max_multiplier);
    }

    #[test]
    fn validate_rejects_out_of_range_entry_pct() {
        let mut cfg = EngineConfig::default();
        cfg.entry_pct = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_parses_toml_and_rejects_invalid_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        let toml = toml::to_string(&EngineConfig::default()).unwrap();
        std::fs::write(&path, toml).unwrap();
        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded, EngineConfig::default());

        std::fs::write(&path, "entry_pct = 2.0\n").unwrap();
        assert!(EngineConfig::load(&path).is_err());
    }
}
