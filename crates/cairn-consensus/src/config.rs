use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timing and worker parameters of the consensus milestone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Minimal time between two blocks
    pub block_time_ms: u64,
    /// Time the proposer gets to assemble a block after a round starts
    pub block_prepare_time_ms: u64,
    /// Base timeout of every stage
    pub stage_timeout_ms: u64,
    /// Added to the stage timeout for every round
    pub stage_timeout_increase_ms: u64,
    /// Clock drift tolerated between nodes
    pub time_drift_ms: u64,
    /// Upper bound for a single signature job
    pub crypto_timeout_ms: u64,
    /// Concurrent signature jobs
    pub crypto_workers: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        ConsensusConfig {
            block_time_ms: 8000,
            block_prepare_time_ms: 4000,
            stage_timeout_ms: 2000,
            stage_timeout_increase_ms: 2000,
            time_drift_ms: 500,
            crypto_timeout_ms: 5000,
            crypto_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
        }
    }
}

impl ConsensusConfig {
    pub fn crypto_timeout(&self) -> Duration {
        Duration::from_millis(self.crypto_timeout_ms)
    }

    /// Stage timeout for a round: `stage_timeout + round * stage_timeout_increase`
    pub fn stage_timeout(&self, round: u32) -> Duration {
        Duration::from_millis(
            self.stage_timeout_ms
                .saturating_add(u64::from(round).saturating_mul(self.stage_timeout_increase_ms)),
        )
    }
}
