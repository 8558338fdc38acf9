use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use cairn_consensus::{
    Collaborators, Consensus, ConsensusConfig, ConsensusError, ConsensusEvent, ConsensusEventSink,
    ConsensusHandle, LocalValidators, StateData, StaticValidatorSet,
};
use cairn_core::{is_majority, Block, KeyPair, PublicKey};
use cairn_storage::{ConsensusStore, FileStorage, Storage};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::chain::LocalChain;
use crate::config::NodeConfig;
use crate::network::LocalNetwork;

/// What a node needs to know to join consensus
#[derive(Clone)]
pub struct NodeSetup {
    pub id: usize,
    pub genesis: Block,
    pub validators: Vec<PublicKey>,
    pub keys: Vec<KeyPair>,
    pub consensus: ConsensusConfig,
}

/// Relays commits to peers and traces consensus milestones
struct NodeEvents<S: Storage> {
    id: usize,
    chain: Arc<LocalChain<S>>,
    network: Arc<LocalNetwork>,
}

impl<S: Storage> ConsensusEventSink for NodeEvents<S> {
    fn on_consensus_event(&self, event: &ConsensusEvent, state: &StateData) {
        match event {
            ConsensusEvent::BlockCommitted { height, .. } => match self.chain.commit_at(*height) {
                Ok(Some(commit)) => {
                    debug!(
                        node = self.id,
                        height,
                        state_root = %self.chain.state_root().short(),
                        "Relaying commit"
                    );
                    self.network.relay_commit(self.id, &commit);
                }
                Ok(None) => warn!(node = self.id, height, "Committed block missing from chain"),
                Err(e) => warn!(node = self.id, height, "Failed to read commit: {}", e),
            },
            _ => debug!(
                node = self.id,
                height = state.height,
                round = state.round,
                step = %state.step,
                "{:?}",
                event
            ),
        }
    }
}

/// A running consensus participant
pub struct Node<S: Storage + 'static> {
    id: usize,
    chain: Arc<LocalChain<S>>,
    handle: ConsensusHandle,
    task: JoinHandle<Result<(), ConsensusError>>,
    network: Arc<LocalNetwork>,
}

impl<S: Storage + 'static> Node<S> {
    /// Open the chain, spawn consensus and join the network
    pub fn start(
        setup: NodeSetup,
        chain_storage: S,
        consensus_storage: S,
        network: Arc<LocalNetwork>,
    ) -> Result<Self> {
        let NodeSetup {
            id,
            genesis,
            validators,
            keys,
            consensus,
        } = setup;

        if !is_majority(keys.len(), validators.len()) && network.is_empty() {
            warn!(
                "Node {} holds {} of {} validator keys and has no peers yet",
                id,
                keys.len(),
                validators.len()
            );
        }

        let chain = Arc::new(LocalChain::open(chain_storage, genesis)?);
        let collaborators = Collaborators {
            validator_set: Arc::new(StaticValidatorSet::new(validators)),
            block_processor: chain.clone(),
            broadcaster: network.endpoint(id),
            local_validators: LocalValidators::new(keys),
            event_sink: Some(Arc::new(NodeEvents {
                id,
                chain: chain.clone(),
                network: network.clone(),
            })),
        };

        let (consensus, handle) =
            Consensus::new(consensus, collaborators, ConsensusStore::new(consensus_storage));
        network.join(id, handle.clone());
        let task = consensus.spawn();

        info!("Node {} started at height {}", id, chain.height() + 1);

        Ok(Node {
            id,
            chain,
            handle,
            task,
            network,
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn chain(&self) -> &Arc<LocalChain<S>> {
        &self.chain
    }

    /// Wait until the chain holds `height` committed blocks
    pub async fn wait_for_height(&self, height: u64, limit: Duration) -> Result<()> {
        let mut state = self.handle.subscribe();
        tokio::time::timeout(limit, async {
            loop {
                if self.chain.height() >= height {
                    return Ok(());
                }
                if state.changed().await.is_err() {
                    return Err(anyhow::anyhow!("node {} stopped", self.id));
                }
            }
        })
        .await
        .with_context(|| {
            format!(
                "node {} did not reach height {} (at {})",
                self.id,
                height,
                self.chain.height()
            )
        })?
    }

    /// Leave the network, persist consensus state and stop
    pub async fn shutdown(self) -> Result<()> {
        self.network.leave(self.id);
        self.handle.dispose().await?;
        self.task.await??;
        info!("Node {} stopped at height {}", self.id, self.chain.height());
        Ok(())
    }
}

/// Run a single node from its configuration until interrupted
pub async fn run(config: NodeConfig) -> Result<()> {
    let validators = config.validator_public_keys()?;
    let keys = config.local_keypairs()?;
    if validators.is_empty() {
        anyhow::bail!("configuration lists no validators");
    }

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating {}", config.data_dir.display()))?;
    let chain_storage = FileStorage::open(config.data_dir.join("chain.db"))?;
    let consensus_storage = FileStorage::open(config.data_dir.join("consensus.db"))?;

    let setup = NodeSetup {
        id: 0,
        genesis: Block::genesis(config.chain_id, config.genesis_timestamp),
        validators,
        keys,
        consensus: config.consensus,
    };

    info!("Starting Cairn node with {} local validators", setup.keys.len());
    let mut node = Node::start(setup, chain_storage, consensus_storage, LocalNetwork::new())?;

    tokio::select! {
        signal = tokio::signal::ctrl_c() => signal?,
        result = &mut node.task => {
            return result?.map_err(|e| anyhow::anyhow!("consensus failed: {}", e));
        }
    }

    info!("Shutting down");
    node.shutdown().await
}
