//! Configuration types for bach-node

use crate::cli::Cli;
use bach_core::ExecutorConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Node configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Block executor settings
    #[serde(default)]
    pub executor: ExecutorConfig,
    /// Synthetic workload settings
    #[serde(default)]
    pub workload: WorkloadConfig,
}

/// Synthetic workload configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadConfig {
    /// Blocks to execute
    #[serde(default = "default_blocks")]
    pub blocks: usize,
    /// Transactions per block
    #[serde(default = "default_txs")]
    pub txs: usize,
    /// Funded accounts
    #[serde(default = "default_accounts")]
    pub accounts: u64,
    /// Share of transactions with an unknown footprint
    #[serde(default = "default_unknown_ratio")]
    pub unknown_ratio: f64,
    /// Seed for block generation
    #[serde(default)]
    pub seed: u64,
}

fn default_blocks() -> usize {
    4
}

fn default_txs() -> usize {
    10_000
}

fn default_accounts() -> u64 {
    1_000
}

fn default_unknown_ratio() -> f64 {
    0.01
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            blocks: default_blocks(),
            txs: default_txs(),
            accounts: default_accounts(),
            unknown_ratio: default_unknown_ratio(),
            seed: 0,
        }
    }
}

impl NodeConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        tracing::info!("Loading config from {:?}", path);
        let content = std::fs::read_to_string(path)?;
        let config: NodeConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Override file values with flags given on the command line
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(workers) = cli.workers {
            self.executor.worker_threads = workers;
        }
        if cli.no_parallel {
            self.executor.enable_parallel = false;
        }
        if let Some(blocks) = cli.blocks {
            self.workload.blocks = blocks;
        }
        if let Some(txs) = cli.txs {
            self.workload.txs = txs;
        }
        if let Some(accounts) = cli.accounts {
            self.workload.accounts = accounts;
        }
        if let Some(ratio) = cli.unknown_ratio {
            self.workload.unknown_ratio = ratio;
        }
        if let Some(seed) = cli.seed {
            self.workload.seed = seed;
        }
    }

    /// Check values the executor cannot catch itself
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.workload.unknown_ratio),
            "unknown_ratio must be within [0, 1], got {}",
            self.workload.unknown_ratio
        );
        anyhow::ensure!(self.workload.accounts > 0, "accounts must be positive");
        self.executor.validate()?;
        Ok(())
    }
}
