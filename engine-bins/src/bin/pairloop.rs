//! `pairloop`: runs the orchestrator against a simulated exchange, serving
//! the control surface over HTTP.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use pairloop_bins::common::{init_logging, CommonArgs};
use pairloop_core::config::EngineConfig;
use pairloop_core::gateway::{Balance, SimulatedGateway};
use pairloop_core::persistence::{InMemoryPersistenceStore, PersistenceStore, SqlitePersistenceStore};
use pairloop_core::status::router;
use pairloop_core::Orchestrator;
use tokio::net::TcpListener;
use tokio::time::{interval, Duration};
use tracing::{error, info, warn};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = CommonArgs::parse();
    init_logging(&args.log_level)?;

    let cfg = match EngineConfig::load(&args.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            warn!(%err, path = %args.config, "failed to load config, falling back to defaults");
            EngineConfig::default()
        }
    };

    let gateway = Arc::new(SimulatedGateway::new(
        args.starting_price,
        Balance { base: 1_000.0, quote: 100_000.0 },
        Utc::now(),
    ));

    let store: Arc<dyn PersistenceStore> = if args.db_path == ":memory:" {
        Arc::new(InMemoryPersistenceStore::new())
    } else {
        Arc::new(SqlitePersistenceStore::open(&args.db_path)?)
    };

    let mut orchestrator = Orchestrator::new(gateway, store, cfg.clone());
    orchestrator.bootstrap().await?;
    if orchestrator.slot_count() == 0 {
        for _ in 0..args.slots {
            orchestrator.add_slot(cfg.order_size_usd);
        }
        info!(slots = args.slots, "seeded fresh slots on cold start");
    }

    let control = orchestrator.control_surface();
    let listener = TcpListener::bind(&args.listen_addr).await?;
    info!(addr = %args.listen_addr, "control surface listening");
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, router(control)).await {
            error!(%err, "control surface server exited");
        }
    });

    let mut ticker = interval(Duration::from_secs(pairloop_core::config::constants::POLL_INTERVAL_SECONDS));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = orchestrator.run_tick().await {
                    error!(%err, "tick failed");
                }
                orchestrator.control_surface().publish(orchestrator.publish_status());
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received, persisting final state");
                break;
            }
        }
    }

    Ok(())
}
