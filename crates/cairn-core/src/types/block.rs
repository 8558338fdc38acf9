use serde::{Deserialize, Serialize};

use crate::crypto::{hash_blake3, merkle_root, Hash};

/// Block header containing metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Chain identifier
    pub chain_id: u64,
    /// Block height (0 for genesis)
    pub height: u64,
    /// Hash of the previous block (zeros for genesis)
    pub prev_hash: Hash,
    /// Unix timestamp in milliseconds
    pub timestamp: u64,
    /// Merkle root of the transaction payloads
    pub tx_root: Hash,
    /// Index of the proposing validator in the round validator set
    pub proposer_index: u32,
}

impl BlockHeader {
    /// Hash of the header fields in declaration order, fixed-width little endian
    pub fn hash(&self) -> Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.chain_id.to_le_bytes());
        hasher.update(&self.height.to_le_bytes());
        hasher.update(self.prev_hash.as_bytes());
        hasher.update(&self.timestamp.to_le_bytes());
        hasher.update(self.tx_root.as_bytes());
        hasher.update(&self.proposer_index.to_le_bytes());
        Hash(*hasher.finalize().as_bytes())
    }
}

/// A block whose transactions are opaque byte payloads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub txs: Vec<Vec<u8>>,
}

impl Block {
    pub fn new(header: BlockHeader, txs: Vec<Vec<u8>>) -> Self {
        Block { header, txs }
    }

    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }

    pub fn compute_tx_root(txs: &[Vec<u8>]) -> Hash {
        let leaves: Vec<Hash> = txs.iter().map(|tx| hash_blake3(tx)).collect();
        merkle_root(&leaves)
    }

    pub fn verify_tx_root(&self) -> bool {
        Self::compute_tx_root(&self.txs) == self.header.tx_root
    }

    pub fn genesis(chain_id: u64, timestamp: u64) -> Self {
        let header = BlockHeader {
            chain_id,
            height: 0,
            prev_hash: Hash::ZERO,
            timestamp,
            tx_root: Hash::ZERO,
            proposer_index: 0,
        };
        Block::new(header, Vec::new())
    }
}
