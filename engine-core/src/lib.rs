//! `pairloop_core`: the pure reducer, the runtime orchestrator that drives
//! it against a live exchange, and the supporting HMM/rebalancer/persistence
//! subsystems (SPEC_FULL.md). Binaries live in the separate `pairloop-bins`
//! crate; this crate has no `main` and no process-level I/O beyond the
//! `ExchangeGateway`/`PersistenceStore` trait boundaries it defines.

pub mod config;
pub mod error;
pub mod gateway;
pub mod hmm;
pub mod invariants;
pub mod metrics;
pub mod model;
pub mod orchestrator;
pub mod persistence;
pub mod rebalancer;
pub mod reducer;
pub mod status;

pub use config::EngineConfig;
pub use error::{GatewayError, PersistenceError, ReducerError};
pub use orchestrator::Orchestrator;
