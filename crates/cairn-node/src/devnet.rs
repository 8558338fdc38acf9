use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use cairn_consensus::timestamp::now_ms;
use cairn_consensus::ConsensusConfig;
use cairn_core::{Block, Hash, KeyPair};
use cairn_storage::{FileStorage, MemoryStorage, Storage};
use tracing::info;

use crate::network::LocalNetwork;
use crate::node::{Node, NodeSetup};

const DEVNET_CHAIN_ID: u64 = 1337;

/// Devnet parameters
#[derive(Debug, Clone)]
pub struct DevnetOptions {
    pub validators: usize,
    pub heights: u64,
    /// Keep chain and consensus files per node under this directory
    pub data_dir: Option<PathBuf>,
    pub consensus: ConsensusConfig,
}

impl DevnetOptions {
    pub fn new(validators: usize, heights: u64) -> Self {
        DevnetOptions {
            validators,
            heights,
            data_dir: None,
            consensus: ConsensusConfig {
                block_time_ms: 500,
                block_prepare_time_ms: 250,
                stage_timeout_ms: 1000,
                stage_timeout_increase_ms: 500,
                ..Default::default()
            },
        }
    }

    /// Upper bound for the whole run: every height may need a few rounds
    fn time_limit(&self) -> Duration {
        let per_height = self.consensus.block_time_ms
            + self.consensus.block_prepare_time_ms
            + 6 * self.consensus.stage_timeout_ms;
        Duration::from_millis(per_height * self.heights + 10_000)
    }
}

/// Run `validators` nodes in process until each committed `heights` blocks.
/// Returns the agreed block hashes by height.
pub async fn run(options: DevnetOptions) -> Result<Vec<Hash>> {
    if options.validators == 0 {
        anyhow::bail!("a devnet needs at least one validator");
    }
    if options.validators > u8::MAX as usize {
        anyhow::bail!("at most {} validators are supported", u8::MAX);
    }

    match &options.data_dir {
        Some(dir) => {
            let mut stores = Vec::with_capacity(options.validators);
            for id in 0..options.validators {
                let node_dir = dir.join(format!("node-{}", id));
                std::fs::create_dir_all(&node_dir)
                    .with_context(|| format!("creating {}", node_dir.display()))?;
                stores.push((
                    FileStorage::open(node_dir.join("chain.db"))?,
                    FileStorage::open(node_dir.join("consensus.db"))?,
                ));
            }
            run_with(options, stores).await
        }
        None => {
            let stores = (0..options.validators)
                .map(|_| (MemoryStorage::new(), MemoryStorage::new()))
                .collect();
            run_with(options, stores).await
        }
    }
}

async fn run_with<S: Storage + 'static>(options: DevnetOptions, stores: Vec<(S, S)>) -> Result<Vec<Hash>> {
    let keys: Vec<KeyPair> = (1..=options.validators as u8).map(KeyPair::from_seed).collect();
    let validators: Vec<_> = keys.iter().map(|k| k.public).collect();
    let genesis = Block::genesis(DEVNET_CHAIN_ID, now_ms());
    let network = LocalNetwork::new();

    info!(
        "Starting devnet with {} validators, target height {}",
        options.validators, options.heights
    );

    let mut nodes = Vec::with_capacity(keys.len());
    for (id, ((chain_storage, consensus_storage), key)) in
        stores.into_iter().zip(keys.iter()).enumerate()
    {
        let setup = NodeSetup {
            id,
            genesis: genesis.clone(),
            validators: validators.clone(),
            keys: vec![key.clone()],
            consensus: options.consensus.clone(),
        };
        nodes.push(Node::start(setup, chain_storage, consensus_storage, network.clone())?);
    }

    let limit = options.time_limit();
    for node in &nodes {
        node.wait_for_height(options.heights, limit).await?;
    }

    let hashes = agreed_hashes(&nodes, options.heights)?;

    for node in nodes {
        node.shutdown().await?;
    }

    Ok(hashes)
}

/// Block hashes of heights `1..=heights`, checked to be identical on every node
fn agreed_hashes<S: Storage + 'static>(nodes: &[Node<S>], heights: u64) -> Result<Vec<Hash>> {
    let mut hashes = Vec::with_capacity(heights as usize);

    for height in 1..=heights {
        let mut agreed: Option<Hash> = None;
        for node in nodes {
            let commit = node
                .chain()
                .commit_at(height)?
                .with_context(|| format!("node {} has no block at height {}", node.id(), height))?;
            let hash = commit.block_hash();
            match agreed {
                None => agreed = Some(hash),
                Some(expected) if expected != hash => anyhow::bail!(
                    "fork at height {}: {} vs {} on node {}",
                    height,
                    expected,
                    hash,
                    node.id()
                ),
                Some(_) => {}
            }
        }
        if let Some(hash) = agreed {
            hashes.push(hash);
        }
    }

    Ok(hashes)
}
