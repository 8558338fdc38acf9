use cairn_core::{Precommit, Prevote, Proposal};

/// Outbound gossip. Delivery is best effort.
pub trait Broadcaster: Send + Sync {
    fn broadcast_proposal(&self, proposal: &Proposal);

    fn broadcast_prevote(&self, prevote: &Prevote);

    fn broadcast_precommit(&self, precommit: &Precommit);
}

/// Broadcaster for single-node setups
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBroadcaster;

impl Broadcaster for NoopBroadcaster {
    fn broadcast_proposal(&self, _proposal: &Proposal) {}

    fn broadcast_prevote(&self, _prevote: &Prevote) {}

    fn broadcast_precommit(&self, _precommit: &Precommit) {}
}
