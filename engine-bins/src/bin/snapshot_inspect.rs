//! `pairloop-snapshot-inspect`: dumps the persisted `Snapshot` from a SQLite
//! store as pretty-printed JSON, for debugging a cold-started process
//! without spinning up the full orchestrator.

use anyhow::{Context, Result};
use clap::Parser;
use pairloop_core::persistence::{PersistenceStore, SqlitePersistenceStore};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the SQLite database file.
    db_path: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    let store = SqlitePersistenceStore::open(&args.db_path)
        .with_context(|| format!("opening {}", args.db_path))?;

    match store.load_snapshot().await? {
        Some(snapshot) => {
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        None => {
            eprintln!("no snapshot stored at {}", args.db_path);
            std::process::exit(1);
        }
    }

    Ok(())
}
