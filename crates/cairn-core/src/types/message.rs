use serde::{Deserialize, Serialize};

use crate::crypto::{sign, verify, Hash, PublicKey, SecretKey, Sig};
use crate::error::CoreError;
use crate::serialize;
use crate::types::block::Block;
use crate::types::commit::AggregatedSignature;

/// Vote phase tag included in every vote signing payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    Prevote = 1,
    Precommit = 2,
}

/// The payload a validator signs when voting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureMessageData {
    pub kind: MessageType,
    pub height: u64,
    pub round: u32,
    pub block_hash: Option<Hash>,
}

impl SignatureMessageData {
    pub fn prevote(height: u64, round: u32, block_hash: Option<Hash>) -> Self {
        SignatureMessageData {
            kind: MessageType::Prevote,
            height,
            round,
            block_hash,
        }
    }

    pub fn precommit(height: u64, round: u32, block_hash: Option<Hash>) -> Self {
        SignatureMessageData {
            kind: MessageType::Precommit,
            height,
            round,
            block_hash,
        }
    }

    pub fn signing_bytes(&self) -> Result<Vec<u8>, CoreError> {
        serialize::to_bytes(self)
    }
}

/// First-phase vote. `block_hash == None` is a vote for nil.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prevote {
    pub height: u64,
    pub round: u32,
    pub block_hash: Option<Hash>,
    pub validator_index: u32,
    pub signature: Sig,
}

impl Prevote {
    pub fn new_signed(
        height: u64,
        round: u32,
        block_hash: Option<Hash>,
        validator_index: u32,
        secret_key: &SecretKey,
    ) -> Result<Self, CoreError> {
        let payload = SignatureMessageData::prevote(height, round, block_hash).signing_bytes()?;
        Ok(Prevote {
            height,
            round,
            block_hash,
            validator_index,
            signature: sign(secret_key, &payload),
        })
    }

    pub fn signature_data(&self) -> SignatureMessageData {
        SignatureMessageData::prevote(self.height, self.round, self.block_hash)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CoreError> {
        serialize::to_bytes(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        serialize::from_bytes(bytes)
    }
}

/// Second-phase vote. `block_hash == None` is a vote for nil.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Precommit {
    pub height: u64,
    pub round: u32,
    pub block_hash: Option<Hash>,
    pub validator_index: u32,
    pub signature: Sig,
}

impl Precommit {
    pub fn new_signed(
        height: u64,
        round: u32,
        block_hash: Option<Hash>,
        validator_index: u32,
        secret_key: &SecretKey,
    ) -> Result<Self, CoreError> {
        let payload = SignatureMessageData::precommit(height, round, block_hash).signing_bytes()?;
        Ok(Precommit {
            height,
            round,
            block_hash,
            validator_index,
            signature: sign(secret_key, &payload),
        })
    }

    pub fn signature_data(&self) -> SignatureMessageData {
        SignatureMessageData::precommit(self.height, self.round, self.block_hash)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CoreError> {
        serialize::to_bytes(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        serialize::from_bytes(bytes)
    }
}

#[derive(Serialize)]
struct ProposalSigningData<'a> {
    height: u64,
    round: u32,
    valid_round: Option<u32>,
    block: &'a Block,
    lock_proof: &'a Option<AggregatedSignature>,
    validator_index: u32,
}

/// A block proposed by the round's proposer.
///
/// `valid_round` is set when the block is re-proposed from an earlier round,
/// in which case `lock_proof` carries the aggregated prevotes of that round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub height: u64,
    pub round: u32,
    pub valid_round: Option<u32>,
    pub block: Block,
    pub lock_proof: Option<AggregatedSignature>,
    pub validator_index: u32,
    pub signature: Sig,
}

impl Proposal {
    pub fn new_signed(
        round: u32,
        valid_round: Option<u32>,
        block: Block,
        lock_proof: Option<AggregatedSignature>,
        validator_index: u32,
        secret_key: &SecretKey,
    ) -> Result<Self, CoreError> {
        let mut proposal = Proposal {
            height: block.height(),
            round,
            valid_round,
            block,
            lock_proof,
            validator_index,
            signature: Sig::default(),
        };
        proposal.signature = sign(secret_key, &proposal.signing_bytes()?);
        Ok(proposal)
    }

    /// Encoding of every field except the signature
    pub fn signing_bytes(&self) -> Result<Vec<u8>, CoreError> {
        serialize::to_bytes(&ProposalSigningData {
            height: self.height,
            round: self.round,
            valid_round: self.valid_round,
            block: &self.block,
            lock_proof: &self.lock_proof,
            validator_index: self.validator_index,
        })
    }

    pub fn verify_signature(&self, public_key: &PublicKey) -> Result<(), CoreError> {
        verify(public_key, &self.signing_bytes()?, &self.signature)
    }

    pub fn block_hash(&self) -> Hash {
        self.block.hash()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CoreError> {
        serialize::to_bytes(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        serialize::from_bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{hash_blake3, KeyPair};
    use crate::types::block::Block;

    #[test]
    fn test_prevote_signature_covers_phase() {
        let kp = KeyPair::from_seed(1);
        let hash = Some(hash_blake3(b"block"));
        let prevote = Prevote::new_signed(5, 1, hash, 0, &kp.secret).unwrap();

        let prevote_payload = prevote.signature_data().signing_bytes().unwrap();
        verify(&kp.public, &prevote_payload, &prevote.signature).unwrap();

        // The same fields signed as a precommit must not verify as a prevote.
        let precommit_payload = SignatureMessageData::precommit(5, 1, hash)
            .signing_bytes()
            .unwrap();
        assert!(verify(&kp.public, &precommit_payload, &prevote.signature).is_err());
    }

    #[test]
    fn test_nil_precommit_wire_roundtrip() {
        let kp = KeyPair::from_seed(2);
        let precommit = Precommit::new_signed(9, 3, None, 1, &kp.secret).unwrap();
        let decoded = Precommit::from_bytes(&precommit.to_bytes().unwrap()).unwrap();

        assert_eq!(decoded, precommit);
        assert!(decoded.block_hash.is_none());
    }

    #[test]
    fn test_proposal_signature_detects_tampering() {
        let kp = KeyPair::from_seed(3);
        let mut block = Block::genesis(1, 0);
        block.header.height = 4;

        let proposal = Proposal::new_signed(2, None, block, None, 1, &kp.secret).unwrap();
        assert_eq!(proposal.height, 4);
        proposal.verify_signature(&kp.public).unwrap();

        let mut tampered = proposal.clone();
        tampered.valid_round = Some(1);
        assert!(tampered.verify_signature(&kp.public).is_err());
    }
}
