use std::sync::Arc;

use cairn_consensus::{Broadcaster, ConsensusHandle, ProcessorResult};
use cairn_core::{Commit, Precommit, Prevote, Proposal};
use parking_lot::RwLock;
use tracing::debug;

/// In-process gossip between consensus instances.
///
/// Every message is handed to the peers' processors on its own task, so a
/// slow peer never holds up the sender.
#[derive(Default)]
pub struct LocalNetwork {
    peers: RwLock<Vec<(usize, ConsensusHandle)>>,
}

impl LocalNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn join(&self, id: usize, handle: ConsensusHandle) {
        let mut peers = self.peers.write();
        peers.retain(|(peer, _)| *peer != id);
        peers.push((id, handle));
    }

    pub fn leave(&self, id: usize) {
        self.peers.write().retain(|(peer, _)| *peer != id);
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }

    fn others(&self, from: usize) -> Vec<ConsensusHandle> {
        self.peers
            .read()
            .iter()
            .filter(|(peer, _)| *peer != from)
            .map(|(_, handle)| handle.clone())
            .collect()
    }

    /// Hand a finalized block to peers that may have missed its votes
    pub fn relay_commit(&self, from: usize, commit: &Commit) {
        for peer in self.others(from) {
            let commit = commit.clone();
            tokio::spawn(async move {
                let height = commit.height();
                let result = peer.commit_processor().process(commit).await;
                if result == ProcessorResult::Accepted {
                    debug!(height, "Peer caught up through relayed commit");
                }
            });
        }
    }

    pub fn endpoint(self: &Arc<Self>, id: usize) -> Arc<NetworkBroadcaster> {
        Arc::new(NetworkBroadcaster {
            network: Arc::clone(self),
            id,
        })
    }
}

/// A node's outbound side of the [`LocalNetwork`]
pub struct NetworkBroadcaster {
    network: Arc<LocalNetwork>,
    id: usize,
}

impl Broadcaster for NetworkBroadcaster {
    fn broadcast_proposal(&self, proposal: &Proposal) {
        for peer in self.network.others(self.id) {
            let proposal = proposal.clone();
            tokio::spawn(async move {
                peer.proposal_processor().process(proposal, false).await;
            });
        }
    }

    fn broadcast_prevote(&self, prevote: &Prevote) {
        for peer in self.network.others(self.id) {
            let prevote = prevote.clone();
            tokio::spawn(async move {
                peer.prevote_processor().process(prevote, false).await;
            });
        }
    }

    fn broadcast_precommit(&self, precommit: &Precommit) {
        for peer in self.network.others(self.id) {
            let precommit = precommit.clone();
            tokio::spawn(async move {
                peer.precommit_processor().process(precommit, false).await;
            });
        }
    }
}
