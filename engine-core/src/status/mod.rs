//! ControlSurface (spec.md §6.3): the JSON status payload plus the operator
//! command set, exposed over a minimal `axum` HTTP surface. This is
//! deliberately outside the reducer's pure core — it is the thinnest
//! surface needed to exercise commands in tests, not a dashboard.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::hmm::{ConsensusMode, Regime};
use crate::metrics::EngineMetrics;
use crate::model::{PairState, TradeLeg};
use crate::persistence::RunMode;

#[derive(Debug, Clone, Serialize)]
pub struct SlotStatus {
    pub slot_id: u64,
    pub alias: String,
    pub state: PairState,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CapacityFillHealth {
    pub idle_usd: f64,
    pub total_portfolio_value: f64,
    pub idle_ratio: f64,
    pub band: &'static str,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RebalancerStatus {
    pub signal: f64,
    pub idle_ratio: f64,
    pub error: f64,
    pub skew: f64,
    pub favored_leg_size_mult: f64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct TrendStatus {
    pub trend_score: f64,
    pub dynamic_idle_target: f64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct DailyLossLimitStatus {
    pub limit: f64,
    pub realized_loss_today: f64,
    pub locked: bool,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct EntrySchedulerStatus {
    pub pending_entries: usize,
    pub admitted_this_tick: usize,
    pub cap_this_tick: usize,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RegimeStatus {
    pub regime: Regime,
    pub probabilities: [f64; 3],
    pub confidence: f64,
    pub effective_confidence: f64,
    pub bias_signal: f64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct DataPipelineStatus {
    pub primary_candles: usize,
    pub secondary_candles: usize,
    pub tertiary_candles: usize,
    pub last_retrain_age_sec: Option<i64>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ConsensusStatus {
    pub mode: ConsensusMode,
    pub label: Regime,
    pub consensus_probabilities: [f64; 3],
    pub effective_confidence: f64,
    pub bias_signal: f64,
}

/// Stable top-level payload (spec.md §6.3). Every field name here is a
/// contract — rename only together with a documented version bump.
#[derive(Debug, Clone, Serialize)]
pub struct StatusPayload {
    pub mode: RunMode,
    pub pause_reason: Option<String>,
    pub slots: Vec<SlotStatus>,
    pub capacity_fill_health: CapacityFillHealth,
    pub rebalancer: RebalancerStatus,
    pub trend: TrendStatus,
    pub daily_loss_limit: DailyLossLimitStatus,
    pub entry_scheduler: EntrySchedulerStatus,
    pub hmm_regime: RegimeStatus,
    pub hmm_secondary: RegimeStatus,
    pub hmm_tertiary: RegimeStatus,
    pub hmm_data_pipeline: DataPipelineStatus,
    pub consensus: ConsensusStatus,
    pub generated_at: DateTime<Utc>,
}

/// Operator command set (spec.md §6.3). Tagged by `command` so the HTTP
/// body reads as `{"command": "pause"}` / `{"command": "set_entry_pct",
/// "pct": 0.25}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Pause,
    Resume,
    AddSlot,
    RemoveSlot { slot_id: u64 },
    RemoveSlots { slot_ids: Vec<u64> },
    SetEntryPct { leg: Option<TradeLeg>, pct: f64 },
    SetProfitPct { pct: f64 },
    SoftClose { slot_id: u64 },
    SoftCloseNext,
    CancelStaleRecoveries,
    ReconcileDrift,
    AuditPnl,
}

/// Shared state behind the HTTP routes: a read view of the latest status
/// snapshot and a channel the orchestrator drains each tick (spec.md §4.3
/// step "persist snapshot/poll commands").
#[derive(Clone)]
pub struct ControlSurfaceState {
    pub status: Arc<RwLock<Option<StatusPayload>>>,
    pub commands: mpsc::UnboundedSender<Command>,
    pub metrics: Arc<EngineMetrics>,
}

impl ControlSurfaceState {
    pub fn new(metrics: Arc<EngineMetrics>) -> (Self, mpsc::UnboundedReceiver<Command>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { status: Arc::new(RwLock::new(None)), commands: tx, metrics }, rx)
    }

    pub fn publish(&self, payload: StatusPayload) {
        *self.status.write() = Some(payload);
    }
}

pub fn router(state: ControlSurfaceState) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route("/command", post(post_command))
        .route("/metrics", get(get_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn get_metrics(State(state): State<ControlSurfaceState>) -> impl IntoResponse {
    state.metrics.encode()
}

async fn get_status(State(state): State<ControlSurfaceState>) -> impl IntoResponse {
    match state.status.read().clone() {
        Some(payload) => Json(payload).into_response(),
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

async fn post_command(State(state): State<ControlSurfaceState>, Json(command): Json<Command>) -> impl IntoResponse {
    info!(?command, "control surface command received");
    match state.commands.send(command) {
        Ok(()) => StatusCode::ACCEPTED,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}
