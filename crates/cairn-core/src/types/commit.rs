use serde::{Deserialize, Serialize};

use crate::crypto::Hash;
use crate::error::CoreError;
use crate::serialize;
use crate::types::block::Block;
use crate::types::message::SignatureMessageData;

/// An aggregate signature and the validator indices that contributed to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedSignature {
    /// Opaque aggregate bytes
    pub signature: Vec<u8>,
    /// One entry per round validator; `true` where the validator signed
    pub validators: Vec<bool>,
}

impl AggregatedSignature {
    pub fn signer_count(&self) -> usize {
        self.validators.iter().filter(|signed| **signed).count()
    }

    /// Indices of contributing validators in ascending order
    pub fn signers(&self) -> impl Iterator<Item = usize> + '_ {
        self.validators
            .iter()
            .enumerate()
            .filter_map(|(index, signed)| signed.then_some(index))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitProof {
    /// Round in which the precommits were cast
    pub round: u32,
    pub signature: AggregatedSignature,
}

/// A finalized block and the quorum certificate over its precommits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub block: Block,
    pub proof: CommitProof,
}

impl Commit {
    pub fn height(&self) -> u64 {
        self.block.height()
    }

    pub fn block_hash(&self) -> Hash {
        self.block.hash()
    }

    /// The precommit payload every signer in the proof signed
    pub fn signature_data(&self) -> SignatureMessageData {
        SignatureMessageData::precommit(self.height(), self.proof.round, Some(self.block_hash()))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CoreError> {
        serialize::to_bytes(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        serialize::from_bytes(bytes)
    }
}
