use std::sync::Arc;

use cairn_core::Commit;
use tokio::sync::oneshot;

use super::{ProcessorContext, ProcessorResult};
use crate::commit_state::CommitState;
use crate::handle::ConsensusCommand;

/// Applies commits received from peers. The commit is verified here and
/// then executed by the control loop, so no commit lock is held while
/// waiting for the loop.
#[derive(Clone)]
pub struct CommitProcessor {
    context: Arc<ProcessorContext>,
}

impl CommitProcessor {
    pub(crate) fn new(context: Arc<ProcessorContext>) -> Self {
        CommitProcessor { context }
    }

    pub async fn process(&self, commit: Commit) -> ProcessorResult {
        if !self.context.is_current_height(commit.height()) {
            return ProcessorResult::Skipped;
        }

        if !self.has_valid_signature(&commit).await {
            return ProcessorResult::Invalid;
        }

        let (tx, rx) = oneshot::channel();
        let command = ConsensusCommand::CommitState(CommitState::new(commit), tx);
        if self.context.commands.send(command).is_err() {
            return ProcessorResult::Skipped;
        }

        rx.await.unwrap_or(ProcessorResult::Skipped)
    }

    /// +2/3 of the round validators precommitted the block in the proof round
    pub async fn has_valid_signature(&self, commit: &Commit) -> bool {
        let Ok(data) = commit.signature_data().signing_bytes() else {
            return false;
        };
        self.context
            .aggregator
            .verify(&commit.proof.signature, data, commit.height())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::fixture;
    use super::*;
    use crate::block_processor::{BlockProcessor, BlockProcessorResult, ProcessableUnit};
    use crate::validator_set::ValidatorSet;
    use cairn_core::{Precommit, Proposal};

    #[tokio::test]
    async fn test_commit_is_verified_then_handed_to_consensus() {
        let mut f = fixture();
        let block = f.context.block_processor.prepare_block(1, 0, 1).unwrap();
        let proposal = Proposal::new_signed(0, None, block.clone(), None, 1, &f.keys[1].secret).unwrap();

        // Build a certificate with a throwaway round state
        let rs = crate::round_state::RoundState::new(
            1,
            0,
            f.context.validator_set.round_validators(1),
            1,
        );
        rs.add_proposal(proposal);
        for i in 0..3u32 {
            rs.add_precommit(
                Precommit::new_signed(1, 0, Some(block.hash()), i, &f.keys[i as usize].secret)
                    .unwrap(),
            );
        }
        let commit = rs.commit().unwrap();

        let processor = f.processors.commit.clone();
        let task = tokio::spawn(async move { processor.process(commit).await });

        match f.commands.recv().await {
            Some(ConsensusCommand::CommitState(state, reply)) => {
                assert_eq!(state.height(), 1);
                state.set_processor_result(BlockProcessorResult::succeeded(Default::default(), 0));
                reply.send(ProcessorResult::Accepted).unwrap();
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert_eq!(task.await.unwrap(), ProcessorResult::Accepted);
    }

    #[tokio::test]
    async fn test_commit_with_forged_certificate_is_invalid() {
        let f = fixture();
        let block = f.context.block_processor.prepare_block(1, 0, 1).unwrap();
        let rs = crate::round_state::RoundState::new(
            1,
            0,
            f.context.validator_set.round_validators(1),
            1,
        );
        rs.add_proposal(Proposal::new_signed(0, None, block.clone(), None, 1, &f.keys[1].secret).unwrap());
        for i in 0..3u32 {
            rs.add_precommit(
                Precommit::new_signed(1, 0, Some(block.hash()), i, &f.keys[i as usize].secret)
                    .unwrap(),
            );
        }
        let mut commit = rs.commit().unwrap();
        // Claim the certificate is from another round
        commit.proof.round = 1;

        assert_eq!(f.processors.commit.process(commit).await, ProcessorResult::Invalid);
    }

    #[tokio::test]
    async fn test_commit_for_other_height_is_skipped() {
        let f = fixture();
        let mut block = f.context.block_processor.prepare_block(1, 0, 1).unwrap();
        block.header.height = 7;
        let commit = Commit {
            block,
            proof: cairn_core::CommitProof {
                round: 0,
                signature: cairn_core::AggregatedSignature {
                    signature: vec![],
                    validators: vec![false; 4],
                },
            },
        };

        assert_eq!(f.processors.commit.process(commit).await, ProcessorResult::Skipped);
    }
}
