//! Common CLI/logging setup shared by every binary in this crate.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// CLI arguments shared by the `pairloop` runtime binary.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct CommonArgs {
    /// Path to the `EngineConfig` TOML file.
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: String,

    /// Number of slots to seed on a cold start with no prior snapshot.
    #[arg(short, long, default_value_t = 1)]
    pub slots: u64,

    /// SQLite path for the persistence store; `:memory:` for an ephemeral run.
    #[arg(long, default_value = ":memory:")]
    pub db_path: String,

    /// Starting mid price for the simulated gateway.
    #[arg(long, default_value_t = 100.0)]
    pub starting_price: f64,

    /// Address the control-surface HTTP API listens on.
    #[arg(long, default_value = "127.0.0.1:8088")]
    pub listen_addr: String,

    /// Log level, forwarded to `EnvFilter` unless `RUST_LOG` is set.
    #[arg(short, long, default_value = "info")]
    pub log_level: String,
}

/// Initialize `tracing` with an `EnvFilter`, honoring `RUST_LOG` first.
pub fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
    Ok(())
}
