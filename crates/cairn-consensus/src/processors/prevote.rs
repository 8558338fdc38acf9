use std::sync::Arc;

use cairn_core::Prevote;
use tracing::trace;

use super::{ProcessorContext, ProcessorResult};

#[derive(Clone)]
pub struct PrevoteProcessor {
    context: Arc<ProcessorContext>,
}

impl PrevoteProcessor {
    pub(crate) fn new(context: Arc<ProcessorContext>) -> Self {
        PrevoteProcessor { context }
    }

    pub async fn process(&self, prevote: Prevote, broadcast: bool) -> ProcessorResult {
        let ctx = &self.context;
        let _guard = ctx.commit_lock.shared().await;

        if !ctx.has_valid_height_or_round(prevote.height, prevote.round) {
            return ProcessorResult::Skipped;
        }

        if !ctx.is_round_in_bounds(prevote.round) {
            return ProcessorResult::Invalid;
        }

        if !self.has_valid_signature(&prevote).await {
            return ProcessorResult::Invalid;
        }

        if !ctx.is_current_height(prevote.height) {
            return ProcessorResult::Skipped;
        }

        let round_state = ctx.repository.get_round_state(prevote.height, prevote.round);
        if !round_state.add_prevote(prevote.clone()) {
            return ProcessorResult::Skipped;
        }

        trace!(
            height = prevote.height,
            round = prevote.round,
            validator = prevote.validator_index,
            "Prevote accepted"
        );

        if broadcast {
            ctx.broadcaster.broadcast_prevote(&prevote);
        }

        ctx.commands.handle(round_state);

        ProcessorResult::Accepted
    }

    async fn has_valid_signature(&self, prevote: &Prevote) -> bool {
        self.context
            .has_valid_vote_signature(
                prevote.validator_index,
                prevote.signature_data().signing_bytes(),
                prevote.signature,
            )
            .await
    }
}
