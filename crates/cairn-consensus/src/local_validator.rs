use std::collections::HashMap;
use std::sync::Arc;

use cairn_core::{
    AggregatedSignature, Block, Hash, KeyPair, Precommit, Prevote, Proposal, PublicKey,
};
use tracing::debug;

use crate::error::ConsensusError;

/// A validator whose secret key is held by this node. Cheap to clone, so a
/// copy can be moved onto a crypto worker.
#[derive(Clone)]
pub struct LocalValidator {
    keypair: Arc<KeyPair>,
}

impl LocalValidator {
    pub fn new(keypair: KeyPair) -> Self {
        LocalValidator {
            keypair: Arc::new(keypair),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        self.keypair.public
    }

    pub fn propose(
        &self,
        validator_index: u32,
        round: u32,
        valid_round: Option<u32>,
        block: Block,
        lock_proof: Option<AggregatedSignature>,
    ) -> Result<Proposal, ConsensusError> {
        let proposal = Proposal::new_signed(
            round,
            valid_round,
            block,
            lock_proof,
            validator_index,
            &self.keypair.secret,
        )?;
        debug!(
            "Validator {} signed proposal {}/{}",
            validator_index, proposal.height, round
        );
        Ok(proposal)
    }

    pub fn prevote(
        &self,
        validator_index: u32,
        height: u64,
        round: u32,
        block_hash: Option<Hash>,
    ) -> Result<Prevote, ConsensusError> {
        Ok(Prevote::new_signed(
            height,
            round,
            block_hash,
            validator_index,
            &self.keypair.secret,
        )?)
    }

    pub fn precommit(
        &self,
        validator_index: u32,
        height: u64,
        round: u32,
        block_hash: Option<Hash>,
    ) -> Result<Precommit, ConsensusError> {
        Ok(Precommit::new_signed(
            height,
            round,
            block_hash,
            validator_index,
            &self.keypair.secret,
        )?)
    }
}

/// The local validators of a node, looked up by consensus public key
#[derive(Default)]
pub struct LocalValidators {
    validators: HashMap<PublicKey, LocalValidator>,
}

impl LocalValidators {
    pub fn new(keypairs: Vec<KeyPair>) -> Self {
        let validators = keypairs
            .into_iter()
            .map(|keypair| (keypair.public, LocalValidator::new(keypair)))
            .collect();
        LocalValidators { validators }
    }

    pub fn get(&self, public_key: &PublicKey) -> Option<&LocalValidator> {
        self.validators.get(public_key)
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_core::{hash_blake3, verify};

    #[test]
    fn test_votes_verify_under_validator_key() {
        let kp = KeyPair::from_seed(1);
        let validator = LocalValidator::new(kp.clone());
        let hash = Some(hash_blake3(b"block"));

        let prevote = validator.prevote(2, 10, 1, hash).unwrap();
        let payload = prevote.signature_data().signing_bytes().unwrap();
        verify(&kp.public, &payload, &prevote.signature).unwrap();
        assert_eq!(prevote.validator_index, 2);

        let precommit = validator.precommit(2, 10, 1, None).unwrap();
        let payload = precommit.signature_data().signing_bytes().unwrap();
        verify(&kp.public, &payload, &precommit.signature).unwrap();
    }

    #[test]
    fn test_lookup_by_public_key() {
        let keys: Vec<_> = (1..=3).map(KeyPair::from_seed).collect();
        let local = LocalValidators::new(keys[..2].to_vec());

        assert_eq!(local.len(), 2);
        assert!(local.get(&keys[0].public).is_some());
        assert!(local.get(&keys[2].public).is_none());
    }

    #[test]
    fn test_proposal_signed_by_proposer() {
        let kp = KeyPair::from_seed(4);
        let validator = LocalValidator::new(kp.clone());
        let mut block = Block::genesis(1, 0);
        block.header.height = 3;

        let proposal = validator.propose(1, 0, None, block, None).unwrap();
        assert_eq!(proposal.height, 3);
        proposal.verify_signature(&kp.public).unwrap();
    }
}
