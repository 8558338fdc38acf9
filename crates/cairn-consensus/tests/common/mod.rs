//! Shared harness: an in-memory chain, a gossip hub connecting consensus
//! instances, and an event recorder.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use cairn_consensus::{
    BlockProcessor, BlockProcessorResult, Broadcaster, Collaborators, Consensus, ConsensusConfig,
    ConsensusError, ConsensusEvent, ConsensusEventSink, ConsensusHandle, LocalValidators,
    StateData, StaticValidatorSet,
};
use cairn_core::{Block, BlockHeader, Commit, KeyPair, Precommit, Prevote, Proposal};
use cairn_storage::{ConsensusStore, Storage};
use parking_lot::Mutex;
use tokio::task::JoinHandle;

pub fn test_config() -> ConsensusConfig {
    ConsensusConfig {
        block_time_ms: 50,
        block_prepare_time_ms: 50,
        stage_timeout_ms: 300,
        stage_timeout_increase_ms: 100,
        time_drift_ms: 500,
        crypto_timeout_ms: 5000,
        crypto_workers: 2,
    }
}

pub fn validator_keys(count: u8) -> Vec<KeyPair> {
    (1..=count).map(KeyPair::from_seed).collect()
}

pub fn validator_set(keys: &[KeyPair]) -> Arc<StaticValidatorSet> {
    Arc::new(StaticValidatorSet::new(keys.iter().map(|k| k.public).collect()))
}

/// Committed blocks in memory. Commits can be relayed to peers so that a
/// node which missed votes still follows the chain.
pub struct MemoryChain {
    blocks: Mutex<Vec<Commit>>,
    genesis: Block,
    relay: Mutex<Option<(Arc<Hub>, usize)>>,
}

impl MemoryChain {
    pub fn new(genesis: Block) -> Self {
        MemoryChain {
            blocks: Mutex::new(Vec::new()),
            genesis,
            relay: Mutex::new(None),
        }
    }

    pub fn relay_to(&self, hub: Arc<Hub>, from: usize) {
        *self.relay.lock() = Some((hub, from));
    }

    pub fn commits(&self) -> Vec<Commit> {
        self.blocks.lock().clone()
    }

    pub fn height(&self) -> u64 {
        self.last_block().height
    }
}

impl BlockProcessor for MemoryChain {
    fn last_block(&self) -> BlockHeader {
        self.blocks
            .lock()
            .last()
            .map(|commit| commit.block.header.clone())
            .unwrap_or_else(|| self.genesis.header.clone())
    }

    fn prepare_block(
        &self,
        proposer_index: u32,
        _round: u32,
        timestamp: u64,
    ) -> Result<Block, ConsensusError> {
        let last = self.last_block();
        let txs = vec![format!("tx-{}", last.height + 1).into_bytes()];
        let header = BlockHeader {
            chain_id: last.chain_id,
            height: last.height + 1,
            prev_hash: last.hash(),
            timestamp,
            tx_root: Block::compute_tx_root(&txs),
            proposer_index,
        };
        Ok(Block::new(header, txs))
    }

    fn process(&self, block: &Block) -> BlockProcessorResult {
        let last = self.last_block();
        if block.header.prev_hash != last.hash() || !block.verify_tx_root() {
            return BlockProcessorResult::failed();
        }
        BlockProcessorResult::succeeded(block.hash(), block.txs.len() as u64)
    }

    fn commit(&self, commit: &Commit, _result: &BlockProcessorResult) -> Result<(), ConsensusError> {
        let mut blocks = self.blocks.lock();
        let expected = blocks
            .last()
            .map(|c| c.height())
            .unwrap_or(self.genesis.height())
            + 1;
        if commit.height() != expected {
            return Err(ConsensusError::BlockProcessor(format!(
                "expected height {}, got {}",
                expected,
                commit.height()
            )));
        }
        blocks.push(commit.clone());

        if let Some((hub, from)) = self.relay.lock().as_ref() {
            for peer in hub.peers(*from) {
                let commit = commit.clone();
                tokio::spawn(async move {
                    peer.commit_processor().process(commit).await;
                });
            }
        }
        Ok(())
    }
}

/// Delivers every broadcast to all other connected nodes
#[derive(Default)]
pub struct Hub {
    nodes: Mutex<Vec<Option<ConsensusHandle>>>,
    isolated: Mutex<HashSet<usize>>,
}

impl Hub {
    pub fn new(size: usize) -> Arc<Self> {
        Arc::new(Hub {
            nodes: Mutex::new(vec![None; size]),
            isolated: Mutex::new(HashSet::new()),
        })
    }

    pub fn connect(&self, index: usize, handle: ConsensusHandle) {
        self.nodes.lock()[index] = Some(handle);
    }

    pub fn disconnect(&self, index: usize) {
        self.nodes.lock()[index] = None;
    }

    /// Drop everything sent by or to `index`
    pub fn isolate(&self, index: usize) {
        self.isolated.lock().insert(index);
    }

    fn peers(&self, from: usize) -> Vec<ConsensusHandle> {
        let isolated = self.isolated.lock();
        if isolated.contains(&from) {
            return Vec::new();
        }
        self.nodes
            .lock()
            .iter()
            .enumerate()
            .filter(|(index, _)| *index != from && !isolated.contains(index))
            .filter_map(|(_, handle)| handle.clone())
            .collect()
    }

    pub fn broadcaster(self: &Arc<Self>, from: usize) -> Arc<HubBroadcaster> {
        Arc::new(HubBroadcaster {
            hub: self.clone(),
            from,
        })
    }
}

pub struct HubBroadcaster {
    hub: Arc<Hub>,
    from: usize,
}

impl Broadcaster for HubBroadcaster {
    fn broadcast_proposal(&self, proposal: &Proposal) {
        for peer in self.hub.peers(self.from) {
            let proposal = proposal.clone();
            tokio::spawn(async move {
                peer.proposal_processor().process(proposal, false).await;
            });
        }
    }

    fn broadcast_prevote(&self, prevote: &Prevote) {
        for peer in self.hub.peers(self.from) {
            let prevote = prevote.clone();
            tokio::spawn(async move {
                peer.prevote_processor().process(prevote, false).await;
            });
        }
    }

    fn broadcast_precommit(&self, precommit: &Precommit) {
        for peer in self.hub.peers(self.from) {
            let precommit = precommit.clone();
            tokio::spawn(async move {
                peer.precommit_processor().process(precommit, false).await;
            });
        }
    }
}

#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<(ConsensusEvent, StateData)>>,
}

impl EventLog {
    pub fn events(&self) -> Vec<ConsensusEvent> {
        self.events.lock().iter().map(|(e, _)| e.clone()).collect()
    }

    pub fn contains(&self, event: &ConsensusEvent) -> bool {
        self.events.lock().iter().any(|(e, _)| e == event)
    }

    pub fn last_state(&self) -> Option<StateData> {
        self.events.lock().last().map(|(_, s)| s.clone())
    }
}

impl ConsensusEventSink for EventLog {
    fn on_consensus_event(&self, event: &ConsensusEvent, state: &StateData) {
        self.events.lock().push((event.clone(), state.clone()));
    }
}

pub struct TestNode {
    pub handle: ConsensusHandle,
    pub chain: Arc<MemoryChain>,
    pub events: Arc<EventLog>,
    pub task: JoinHandle<Result<(), ConsensusError>>,
}

pub fn spawn_node<S: Storage + 'static>(
    keys: &[KeyPair],
    local: Vec<KeyPair>,
    chain: Arc<MemoryChain>,
    broadcaster: Arc<dyn Broadcaster>,
    store: ConsensusStore<S>,
) -> TestNode {
    let events = Arc::new(EventLog::default());
    let collaborators = Collaborators {
        validator_set: validator_set(keys),
        block_processor: chain.clone(),
        broadcaster,
        local_validators: LocalValidators::new(local),
        event_sink: Some(events.clone()),
    };
    let (consensus, handle) = Consensus::new(test_config(), collaborators, store);
    let task = consensus.spawn();

    TestNode {
        handle,
        chain,
        events,
        task,
    }
}

/// Wait until the published state satisfies `done`
pub async fn wait_until<F>(handle: &ConsensusHandle, limit: Duration, mut done: F) -> bool
where
    F: FnMut(&StateData) -> bool,
{
    let mut state = handle.subscribe();
    tokio::time::timeout(limit, async move {
        loop {
            if done(&state.borrow_and_update()) {
                return;
            }
            if state.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    })
    .await
    .is_ok()
}
