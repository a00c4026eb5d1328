//! Command-line interface for the `tx-risk` binary.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Transaction risk pipeline.
///
/// Runs the ingestion API or the classification worker, or prints
/// statistics about persisted high-priority transactions.
#[derive(Parser, Debug)]
#[command(name = "tx-risk", version, propagate_version = true)]
pub struct Cli {
    /// Configuration file (TOML). Defaults to `config/config.toml` when present.
    #[arg(long, short = 'c', global = true, env = "TXRISK_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the HTTP ingestion API.
    Api,
    /// Consume queued transactions, classify them and persist the risky ones.
    Worker,
    /// Print statistics from the transaction store.
    Stats {
        /// Number of most recent records to list.
        #[arg(long, default_value_t = 10)]
        recent: i64,
    },
}
