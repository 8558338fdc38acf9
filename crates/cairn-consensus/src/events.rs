use cairn_core::Hash;

use crate::state::StateData;

/// Milestones of the consensus state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsensusEvent {
    Bootstrapped,
    RoundStarted,
    ProposalAccepted,
    PrevotedProposal,
    PrevotedAny,
    PrevotedNull,
    PrecommitedAny,
    PrecommitedProposal,
    BlockCommitted { height: u64, block_hash: Hash },
}

pub trait ConsensusEventSink: Send + Sync {
    fn on_consensus_event(&self, event: &ConsensusEvent, state: &StateData);
}
