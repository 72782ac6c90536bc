//! Warden CLI - wraps the orphaned-grant reclaimer.
//!
//! The reclaim command always exits 0: problems are reported through the
//! removed-count output and warnings, not through the process status, so
//! cron-style invocations never trip on an empty or missing snapshot.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use warden_core::{reclaim_orphans, ReclaimOptions, Store};

#[derive(Debug, Parser)]
#[command(name = "warden", version, about = "Object permission maintenance")]
struct Cli {
    /// Suppress the removed-count summary line.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Remove grants whose target object no longer exists.
    Reclaim(ReclaimArgs),
}

#[derive(Debug, clap::Args)]
struct ReclaimArgs {
    /// Path to the store snapshot to clean.
    #[arg(long, env = "WARDEN_STORE")]
    store: PathBuf,

    /// Scan in chunks of this many grant rows.
    #[arg(long)]
    batch_size: Option<u64>,

    /// Stop after this many batches.
    #[arg(long)]
    max_batches: Option<u64>,

    /// Skip this many batches first (resume a partial run).
    #[arg(long, default_value_t = 0)]
    skip_batches: u64,

    /// Soft time budget in seconds, checked at batch boundaries.
    #[arg(long)]
    max_duration_secs: Option<u64>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Reclaim(args) => run_reclaim(&args, cli.quiet),
    }
}

fn run_reclaim(args: &ReclaimArgs, quiet: bool) {
    let store = match Store::load(&args.store) {
        Ok(store) => store,
        Err(err) => {
            // Expected during bootstrap, before any snapshot exists.
            warn!(path = %args.store.display(), error = %err, "could not load store; nothing to clean");
            if !quiet {
                println!("Removed 0 object permission entries");
            }
            return;
        }
    };

    let options = ReclaimOptions {
        batch_size: args.batch_size,
        max_batches: args.max_batches,
        skip_batches: args.skip_batches,
        max_duration: args.max_duration_secs.map(Duration::from_secs),
    };
    let removed = reclaim_orphans(&store, &options);

    if removed > 0 {
        if let Err(err) = store.save(&args.store) {
            warn!(path = %args.store.display(), error = %err, "could not save cleaned store");
        }
    }
    if !quiet {
        println!("Removed {removed} object permission entries");
    }
}
