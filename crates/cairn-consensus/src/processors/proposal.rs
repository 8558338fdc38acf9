use std::sync::Arc;

use cairn_core::{Proposal, SignatureMessageData};
use tracing::debug;

use super::{ProcessorContext, ProcessorResult};
use crate::validator_set::ValidatorSet;

#[derive(Clone)]
pub struct ProposalProcessor {
    context: Arc<ProcessorContext>,
}

impl ProposalProcessor {
    pub(crate) fn new(context: Arc<ProcessorContext>) -> Self {
        ProposalProcessor { context }
    }

    pub async fn process(&self, proposal: Proposal, broadcast: bool) -> ProcessorResult {
        let ctx = &self.context;
        let _guard = ctx.commit_lock.shared().await;

        if !ctx.has_valid_height_or_round(proposal.height, proposal.round) {
            return ProcessorResult::Skipped;
        }

        if !ctx.is_round_in_bounds(proposal.round) {
            return ProcessorResult::Invalid;
        }

        if proposal.block.height() != proposal.height || !self.has_valid_proposer(&proposal) {
            return ProcessorResult::Invalid;
        }

        if !self.has_valid_signature(&proposal).await {
            return ProcessorResult::Invalid;
        }

        if !ctx.is_current_height(proposal.height) {
            return ProcessorResult::Skipped;
        }

        let round_state = ctx
            .repository
            .get_round_state(proposal.height, proposal.round);
        if !round_state.add_proposal(proposal.clone()) {
            return ProcessorResult::Skipped;
        }

        debug!(
            height = proposal.height,
            round = proposal.round,
            block = %proposal.block_hash().short(),
            "Proposal accepted"
        );

        if broadcast {
            ctx.broadcaster.broadcast_proposal(&proposal);
        }

        ctx.commands.handle(round_state);

        ProcessorResult::Accepted
    }

    /// A re-proposed block must name an earlier round, and a lock proof, if
    /// present, must be +2/3 prevotes for the block in that round.
    pub async fn has_valid_lock_proof(&self, proposal: &Proposal) -> bool {
        let Some(valid_round) = proposal.valid_round else {
            return true;
        };

        if valid_round >= proposal.round {
            debug!(
                "Received proposal {}/{} has valid round {} >= round {}",
                proposal.height, proposal.round, valid_round, proposal.round
            );
            return false;
        }

        let Some(lock_proof) = &proposal.lock_proof else {
            debug!(
                "Received proposal {}/{} with missing lock proof",
                proposal.height, proposal.round
            );
            return true;
        };

        let data = match SignatureMessageData::prevote(
            proposal.height,
            valid_round,
            Some(proposal.block_hash()),
        )
        .signing_bytes()
        {
            Ok(data) => data,
            Err(_) => return false,
        };

        let verified = self
            .context
            .aggregator
            .verify(lock_proof, data, proposal.height)
            .await;
        if !verified {
            debug!(
                "Received proposal {}/{} with invalid lock proof",
                proposal.height, proposal.round
            );
        }
        verified
    }

    fn has_valid_proposer(&self, proposal: &Proposal) -> bool {
        proposal.validator_index
            == self
                .context
                .validator_set
                .proposer_index(proposal.height, proposal.round)
    }

    async fn has_valid_signature(&self, proposal: &Proposal) -> bool {
        let Some(validator) = self.context.validator_set.validator(proposal.validator_index) else {
            return false;
        };

        let proposal = proposal.clone();
        self.context
            .pool
            .verify(move || proposal.verify_signature(&validator.public_key).is_ok())
            .await
    }
}
