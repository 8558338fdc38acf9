use std::sync::Arc;

use cairn_core::Precommit;
use tracing::trace;

use super::{ProcessorContext, ProcessorResult};

#[derive(Clone)]
pub struct PrecommitProcessor {
    context: Arc<ProcessorContext>,
}

impl PrecommitProcessor {
    pub(crate) fn new(context: Arc<ProcessorContext>) -> Self {
        PrecommitProcessor { context }
    }

    pub async fn process(&self, precommit: Precommit, broadcast: bool) -> ProcessorResult {
        let ctx = &self.context;
        let _guard = ctx.commit_lock.shared().await;

        if !ctx.has_valid_height_or_round(precommit.height, precommit.round) {
            return ProcessorResult::Skipped;
        }

        if !ctx.is_round_in_bounds(precommit.round) {
            return ProcessorResult::Invalid;
        }

        if !self.has_valid_signature(&precommit).await {
            return ProcessorResult::Invalid;
        }

        if !ctx.is_current_height(precommit.height) {
            return ProcessorResult::Skipped;
        }

        let round_state = ctx
            .repository
            .get_round_state(precommit.height, precommit.round);
        if !round_state.add_precommit(precommit.clone()) {
            return ProcessorResult::Skipped;
        }

        trace!(
            height = precommit.height,
            round = precommit.round,
            validator = precommit.validator_index,
            "Precommit accepted"
        );

        if broadcast {
            ctx.broadcaster.broadcast_precommit(&precommit);
        }

        ctx.commands.handle(round_state);

        ProcessorResult::Accepted
    }

    async fn has_valid_signature(&self, precommit: &Precommit) -> bool {
        self.context
            .has_valid_vote_signature(
                precommit.validator_index,
                precommit.signature_data().signing_bytes(),
                precommit.signature,
            )
            .await
    }
}
