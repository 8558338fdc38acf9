use cairn_consensus::{BlockProcessor, BlockProcessorResult, ConsensusError};
use cairn_core::{hash_blake3, serialize, Block, BlockHeader, Commit, Hash};
use cairn_storage::{Storage, StorageError};
use parking_lot::Mutex;
use tracing::{debug, info};

/// Key prefixes for storage
mod keys {
    pub const BLOCK: &[u8] = b"blk:";
    pub const HEAD: &[u8] = b"head";
    pub const STATE_ROOT: &[u8] = b"chain:state_root";
}

fn block_key(height: u64) -> Vec<u8> {
    let mut key = keys::BLOCK.to_vec();
    key.extend_from_slice(&height.to_be_bytes());
    key
}

struct Inner<S> {
    storage: S,
    head: BlockHeader,
    state_root: Hash,
}

/// The node's chain: committed blocks with their commit certificates and a
/// running state root folded over block hashes.
pub struct LocalChain<S: Storage> {
    inner: Mutex<Inner<S>>,
}

impl<S: Storage> LocalChain<S> {
    /// Open a chain on `storage`, starting from `genesis` if it is empty
    pub fn open(storage: S, genesis: Block) -> Result<Self, StorageError> {
        let head = match storage.get(keys::HEAD) {
            Some(bytes) => serialize::from_bytes(&bytes).map_err(|e| StorageError::Corrupt {
                key: "head".to_string(),
                reason: e.to_string(),
            })?,
            None => genesis.header,
        };
        let state_root = storage
            .get(keys::STATE_ROOT)
            .and_then(|bytes| Hash::from_slice(&bytes))
            .unwrap_or(Hash::ZERO);

        info!(
            "Opened chain at height {} with head {}",
            head.height,
            head.hash().short()
        );

        Ok(LocalChain {
            inner: Mutex::new(Inner {
                storage,
                head,
                state_root,
            }),
        })
    }

    pub fn height(&self) -> u64 {
        self.inner.lock().head.height
    }

    pub fn state_root(&self) -> Hash {
        self.inner.lock().state_root
    }

    /// Committed block at `height` with its certificate
    pub fn commit_at(&self, height: u64) -> Result<Option<Commit>, StorageError> {
        let inner = self.inner.lock();
        let Some(bytes) = inner.storage.get(&block_key(height)) else {
            return Ok(None);
        };
        Commit::from_bytes(&bytes)
            .map(Some)
            .map_err(|e| StorageError::Corrupt {
                key: format!("block {}", height),
                reason: e.to_string(),
            })
    }
}

impl<S: Storage> BlockProcessor for LocalChain<S> {
    fn last_block(&self) -> BlockHeader {
        self.inner.lock().head.clone()
    }

    fn prepare_block(
        &self,
        proposer_index: u32,
        _round: u32,
        timestamp: u64,
    ) -> Result<Block, ConsensusError> {
        let head = self.last_block();
        let txs = Vec::new();
        let header = BlockHeader {
            chain_id: head.chain_id,
            height: head.height + 1,
            prev_hash: head.hash(),
            timestamp,
            tx_root: Block::compute_tx_root(&txs),
            proposer_index,
        };
        Ok(Block::new(header, txs))
    }

    fn process(&self, block: &Block) -> BlockProcessorResult {
        let inner = self.inner.lock();
        let head = &inner.head;

        let valid = block.header.chain_id == head.chain_id
            && block.height() == head.height + 1
            && block.header.prev_hash == head.hash()
            && block.header.timestamp > head.timestamp
            && block.verify_tx_root();
        if !valid {
            debug!(
                height = block.height(),
                block = %block.hash().short(),
                "Block does not extend the head"
            );
            return BlockProcessorResult::failed();
        }

        let mut preimage = inner.state_root.as_bytes().to_vec();
        preimage.extend_from_slice(block.hash().as_bytes());
        BlockProcessorResult::succeeded(hash_blake3(&preimage), block.txs.len() as u64)
    }

    fn commit(&self, commit: &Commit, result: &BlockProcessorResult) -> Result<(), ConsensusError> {
        let mut inner = self.inner.lock();

        let expected = inner.head.height + 1;
        if commit.height() != expected {
            return Err(ConsensusError::BlockProcessor(format!(
                "commit for height {} but head expects {}",
                commit.height(),
                expected
            )));
        }
        let Some(state_root) = result.state_root.filter(|_| result.success) else {
            return Err(ConsensusError::BlockProcessor(format!(
                "block {} was not executed",
                commit.height()
            )));
        };

        let header = commit.block.header.clone();
        let header_bytes = serialize::to_bytes(&header)?;
        let commit_bytes = commit.to_bytes()?;

        inner.storage.put(&block_key(header.height), &commit_bytes);
        inner.storage.put(keys::HEAD, &header_bytes);
        inner.storage.put(keys::STATE_ROOT, state_root.as_bytes());
        if let Err(e) = inner.storage.commit() {
            inner.storage.rollback();
            return Err(e.into());
        }

        info!(
            "Committed block {} at height {} (round {}, {} signers)",
            header.hash().short(),
            header.height,
            commit.proof.round,
            commit.proof.signature.signer_count()
        );

        inner.head = header;
        inner.state_root = state_root;
        Ok(())
    }
}
