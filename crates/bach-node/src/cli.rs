//! CLI argument parsing for bachledger-dag

use clap::Parser;
use std::path::PathBuf;

/// Runs synthetic blocks through BachLedger's parallel executor and checks
/// them against serial execution
#[derive(Parser, Debug, Clone)]
#[command(name = "bachledger-dag")]
#[command(about = "BachLedger parallel block execution")]
#[command(version)]
pub struct Cli {
    /// JSON config file; flags below override it
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Worker threads (0 drains the graph on the main thread)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Execute blocks in plain order without a dependency graph
    #[arg(long)]
    pub no_parallel: bool,

    /// Blocks to execute
    #[arg(long)]
    pub blocks: Option<usize>,

    /// Transactions per block
    #[arg(long)]
    pub txs: Option<usize>,

    /// Funded accounts
    #[arg(long)]
    pub accounts: Option<u64>,

    /// Share of transactions with an unknown footprint (0.0 - 1.0)
    #[arg(long)]
    pub unknown_ratio: Option<f64>,

    /// Seed for block generation
    #[arg(long)]
    pub seed: Option<u64>,

    /// Print the metrics snapshot as compact JSON
    #[arg(long)]
    pub compact: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["bachledger-dag"]);
        assert!(cli.config.is_none());
        assert!(cli.workers.is_none());
        assert!(!cli.no_parallel);
        assert!(cli.txs.is_none());
        assert!(!cli.compact);
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_cli_custom_values() {
        let cli = Cli::parse_from([
            "bachledger-dag",
            "--config", "/etc/bach/dag.json",
            "--workers", "8",
            "--blocks", "2",
            "--txs", "10000",
            "--accounts", "64",
            "--unknown-ratio", "0.05",
            "--seed", "7",
            "--log-level", "debug",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/bach/dag.json")));
        assert_eq!(cli.workers, Some(8));
        assert_eq!(cli.blocks, Some(2));
        assert_eq!(cli.txs, Some(10_000));
        assert_eq!(cli.accounts, Some(64));
        assert_eq!(cli.unknown_ratio, Some(0.05));
        assert_eq!(cli.seed, Some(7));
        assert_eq!(cli.log_level, "debug");
    }

    #[test]
    fn test_no_parallel_flag() {
        let cli = Cli::parse_from(["bachledger-dag", "--no-parallel"]);
        assert!(cli.no_parallel);
    }
}
