use cairn_core::{Block, BlockHeader, Commit, Hash};
use serde::{Deserialize, Serialize};

use crate::error::ConsensusError;

/// Outcome of executing a block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockProcessorResult {
    pub success: bool,
    /// State root after applying the block
    pub state_root: Option<Hash>,
    pub gas_used: u64,
}

impl BlockProcessorResult {
    pub fn succeeded(state_root: Hash, gas_used: u64) -> Self {
        BlockProcessorResult {
            success: true,
            state_root: Some(state_root),
            gas_used,
        }
    }

    pub fn failed() -> Self {
        BlockProcessorResult {
            success: false,
            state_root: None,
            gas_used: 0,
        }
    }
}

/// Block execution and persistence, owned by the node
pub trait BlockProcessor: Send + Sync {
    /// Header of the last committed block
    fn last_block(&self) -> BlockHeader;

    /// Assemble a block on top of the last committed one
    fn prepare_block(
        &self,
        proposer_index: u32,
        round: u32,
        timestamp: u64,
    ) -> Result<Block, ConsensusError>;

    /// Execute a block without committing it
    fn process(&self, block: &Block) -> BlockProcessorResult;

    /// Persist a finalized block. Failure is fatal to consensus.
    fn commit(&self, commit: &Commit, result: &BlockProcessorResult) -> Result<(), ConsensusError>;
}

/// A block candidate that can be executed and committed: either a round
/// state holding a proposal or a commit received from a peer.
pub trait ProcessableUnit: Send + Sync {
    fn height(&self) -> u64;

    fn round(&self) -> u32;

    fn block(&self) -> Option<Block>;

    fn processor_result(&self) -> Option<BlockProcessorResult>;

    /// Record the execution result. Only the first call has an effect.
    fn set_processor_result(&self, result: BlockProcessorResult);

    /// The commit certificate for the unit's block
    fn commit(&self) -> Result<Commit, ConsensusError>;
}
