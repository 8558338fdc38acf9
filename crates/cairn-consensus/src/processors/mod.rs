//! Validation pipelines for inbound consensus messages.
//!
//! Proposal, prevote and precommit processing share one shape: bounds,
//! timestamp plausibility, signature, duplicate check, then apply to the
//! round state and wake the control loop. Everything after the bounds check
//! runs under the shared commit lock.

mod commit;
mod precommit;
mod prevote;
mod proposal;

use std::sync::Arc;

use cairn_core::{verify, CoreError, Sig};
use tokio::sync::watch;

use crate::aggregator::Aggregator;
use crate::block_processor::BlockProcessor;
use crate::broadcaster::Broadcaster;
use crate::commit_lock::CommitLock;
use crate::config::ConsensusConfig;
use crate::handle::CommandSender;
use crate::round_state_repository::RoundStateRepository;
use crate::state::StateData;
use crate::timestamp;
use crate::validator_set::ValidatorSet;
use crate::worker_pool::CryptoPool;

pub use commit::CommitProcessor;
pub use precommit::PrecommitProcessor;
pub use prevote::PrevoteProcessor;
pub use proposal::ProposalProcessor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorResult {
    Accepted,
    /// Stale, duplicate or for another height. No fault of the sender.
    Skipped,
    /// Bad signature, implausible round or wrong proposer
    Invalid,
}

/// Everything a processor reads or writes
pub(crate) struct ProcessorContext {
    pub(crate) config: ConsensusConfig,
    pub(crate) validator_set: Arc<dyn ValidatorSet>,
    pub(crate) block_processor: Arc<dyn BlockProcessor>,
    pub(crate) broadcaster: Arc<dyn Broadcaster>,
    pub(crate) repository: Arc<RoundStateRepository>,
    pub(crate) commit_lock: CommitLock,
    pub(crate) state: watch::Receiver<StateData>,
    pub(crate) commands: CommandSender,
    pub(crate) pool: CryptoPool,
    pub(crate) aggregator: Aggregator,
}

impl ProcessorContext {
    /// Same height as consensus and not an earlier round
    fn has_valid_height_or_round(&self, height: u64, round: u32) -> bool {
        let state = self.state.borrow();
        height == state.height && round >= state.round
    }

    /// Height is the epoch token: re-checked after every await
    fn is_current_height(&self, height: u64) -> bool {
        self.state.borrow().height == height
    }

    fn is_round_in_bounds(&self, round: u32) -> bool {
        timestamp::is_round_in_bounds(
            &self.config,
            &self.block_processor.last_block(),
            round,
            timestamp::now_ms(),
        )
    }

    async fn has_valid_vote_signature(
        &self,
        validator_index: u32,
        payload: Result<Vec<u8>, CoreError>,
        signature: Sig,
    ) -> bool {
        let Some(validator) = self.validator_set.validator(validator_index) else {
            return false;
        };
        let Ok(payload) = payload else {
            return false;
        };

        let public_key = validator.public_key;
        self.pool
            .verify(move || verify(&public_key, &payload, &signature).is_ok())
            .await
    }
}

#[derive(Clone)]
pub struct Processors {
    pub proposal: ProposalProcessor,
    pub prevote: PrevoteProcessor,
    pub precommit: PrecommitProcessor,
    pub commit: CommitProcessor,
}

impl Processors {
    pub(crate) fn new(context: Arc<ProcessorContext>) -> Self {
        Processors {
            proposal: ProposalProcessor::new(context.clone()),
            prevote: PrevoteProcessor::new(context.clone()),
            precommit: PrecommitProcessor::new(context.clone()),
            commit: CommitProcessor::new(context),
        }
    }
}
