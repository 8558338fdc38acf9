use cairn_core::{Block, Commit};
use parking_lot::Mutex;

use crate::block_processor::{BlockProcessorResult, ProcessableUnit};
use crate::error::ConsensusError;

/// A finalized commit received from a peer, carried through block
/// execution and persistence.
#[derive(Debug)]
pub struct CommitState {
    commit: Commit,
    processor_result: Mutex<Option<BlockProcessorResult>>,
}

impl CommitState {
    pub fn new(commit: Commit) -> Self {
        CommitState {
            commit,
            processor_result: Mutex::new(None),
        }
    }
}

impl ProcessableUnit for CommitState {
    fn height(&self) -> u64 {
        self.commit.height()
    }

    fn round(&self) -> u32 {
        self.commit.proof.round
    }

    fn block(&self) -> Option<Block> {
        Some(self.commit.block.clone())
    }

    fn processor_result(&self) -> Option<BlockProcessorResult> {
        self.processor_result.lock().clone()
    }

    fn set_processor_result(&self, result: BlockProcessorResult) {
        self.processor_result.lock().get_or_insert(result);
    }

    fn commit(&self) -> Result<Commit, ConsensusError> {
        Ok(self.commit.clone())
    }
}
