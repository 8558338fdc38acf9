use cairn_core::CoreError;
use cairn_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("Insufficient signatures: have {have}, need {need}")]
    InsufficientSignatures { have: usize, need: usize },

    #[error("Round {0} is too high")]
    RoundLimitExceeded(u32),

    #[error("Proposal missing for {height}/{round}")]
    ProposalMissing { height: u64, round: u32 },

    #[error("Block processor error: {0}")]
    BlockProcessor(String),

    #[error("Consensus service stopped")]
    ServiceStopped,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}
