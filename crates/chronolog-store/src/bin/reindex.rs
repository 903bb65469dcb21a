//! Search index rebuild tool.
//!
//! Streams every event (with its related children) out of the relational
//! store and back through the search index. Use after restoring a database
//! backup, changing the index schema, or losing the index directory.
//!
//! ```bash
//! chronolog-reindex --db-path ./data/chronolog.db --index-dir ./data/index
//!
//! # validate without touching the existing index
//! chronolog-reindex --db-path ./data/chronolog.db --index-dir ./data/index --dry
//! ```

use anyhow::Result;
use chronolog_store::{Store, StoreConfig};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Rebuild the chronolog search index from the relational store.
#[derive(Parser, Debug)]
#[command(name = "chronolog-reindex")]
#[command(about = "Rebuild the search index from the event store")]
#[command(version)]
struct Args {
    /// Database file path
    #[arg(long, default_value = "./data/chronolog.db")]
    db_path: PathBuf,

    /// Search index directory
    #[arg(long)]
    index_dir: PathBuf,

    /// Events fetched per batch
    #[arg(long, default_value = "500")]
    batch_size: usize,

    /// Run the full pass without committing anything
    #[arg(long)]
    dry: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("info".parse()?),
        )
        .init();

    let args = Args::parse();

    let store = Store::open(StoreConfig {
        db_path: args.db_path,
        index_dir: Some(args.index_dir),
        ..Default::default()
    })?;

    let documents = store.reindex(args.batch_size, args.dry)?;

    tracing::info!(documents, dry = args.dry, "reindex complete");

    Ok(())
}
