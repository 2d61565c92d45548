//! Domain error types.
//!
//! Pure, in-process failures (reducer/invariant/persistence-format) get a
//! `thiserror` enum so callers can match on variant. I/O-adjacent failures at
//! the orchestrator boundary stay `anyhow::Error`.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ReducerError {
    #[error("unknown local order id {0}")]
    UnknownLocalId(u64),
    #[error("unknown recovery id {0}")]
    UnknownRecoveryId(u64),
    #[error("invariant violated and not bypassed: {0:?}")]
    InvariantViolated(Vec<String>),
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("exchange call timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("exchange rejected request: {0}")]
    Rejected(String),
    #[error("private API budget exhausted for this loop")]
    BudgetExhausted,
    #[error("transport error: {0}")]
    Transport(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("missing snapshot key {0}")]
    MissingKey(String),
}
