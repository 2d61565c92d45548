//! Prometheus counters surfaced alongside the status payload: a registry
//! plus a handful of grouped counters, scaled down to what this automaton
//! actually has a use for.

use std::sync::Arc;

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Central registry plus every counter the orchestrator touches. Cheaply
/// cloneable (every field is `Arc`-backed or `Clone` itself, matching how
/// `prometheus` metric handles are meant to be shared).
#[derive(Clone)]
pub struct EngineMetrics {
    registry: Arc<Registry>,
    pub cycles_booked_total: IntCounterVec,
    pub fills_total: IntCounter,
    pub daily_loss_locks_total: IntCounter,
    pub hmm_retrains_total: IntCounter,
    pub invariant_halts_total: IntCounter,
}

impl EngineMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let cycles_booked_total = IntCounterVec::new(
            Opts::new("cycles_booked_total", "Completed A+B cycles, by leg").namespace("pairloop"),
            &["leg"],
        )?;
        registry.register(Box::new(cycles_booked_total.clone()))?;

        let fills_total = IntCounter::with_opts(
            Opts::new("fills_total", "Fills applied through the reducer").namespace("pairloop"),
        )?;
        registry.register(Box::new(fills_total.clone()))?;

        let daily_loss_locks_total = IntCounter::with_opts(
            Opts::new("daily_loss_locks_total", "Times the daily loss lock engaged").namespace("pairloop"),
        )?;
        registry.register(Box::new(daily_loss_locks_total.clone()))?;

        let hmm_retrains_total = IntCounter::with_opts(
            Opts::new("hmm_retrains_total", "HMM layer retrains across all timeframes").namespace("pairloop"),
        )?;
        registry.register(Box::new(hmm_retrains_total.clone()))?;

        let invariant_halts_total = IntCounter::with_opts(
            Opts::new("invariant_halts_total", "Times an invariant violation forced a HALT").namespace("pairloop"),
        )?;
        registry.register(Box::new(invariant_halts_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            cycles_booked_total,
            fills_total,
            daily_loss_locks_total,
            hmm_retrains_total,
            invariant_halts_total,
        })
    }

    /// Render every registered metric family in Prometheus text exposition
    /// format, for a `GET /metrics` handler.
    pub fn encode(&self) -> String {
        let families = self.registry.gather();
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&families, &mut buf)
            .expect("prometheus text encoding is infallible for well-formed families");
        String::from_utf8(buf).expect("prometheus text encoder always emits valid utf8")
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new().expect("static metric definitions never fail to register")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_reflects_counter_increments() {
        let metrics = EngineMetrics::default();
        metrics.fills_total.inc();
        metrics.cycles_booked_total.with_label_values(&["A"]).inc();
        let rendered = metrics.encode();
        assert!(rendered.contains("pairloop_fills_total 1"));
        assert!(rendered.contains("pairloop_cycles_booked_total"));
    }
}
