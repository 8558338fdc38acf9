//! Quorum certificates over prevotes and precommits.

use std::collections::BTreeMap;
use std::sync::Arc;

use cairn_core::{
    aggregate_signatures, is_majority, majority_threshold, verify_aggregate, AggregatedSignature,
    Sig,
};
use tracing::debug;

use crate::error::ConsensusError;
use crate::validator_set::ValidatorSet;
use crate::worker_pool::CryptoPool;

/// Aggregate single-validator signatures keyed by validator index.
///
/// Fails unless the signers form a majority of `total_validators`.
pub fn aggregate(
    votes: &BTreeMap<u32, Sig>,
    total_validators: usize,
) -> Result<AggregatedSignature, ConsensusError> {
    if !is_majority(votes.len(), total_validators) {
        return Err(ConsensusError::InsufficientSignatures {
            have: votes.len(),
            need: majority_threshold(total_validators),
        });
    }

    let mut validators = vec![false; total_validators];
    for index in votes.keys() {
        match validators.get_mut(*index as usize) {
            Some(bit) => *bit = true,
            None => {
                return Err(ConsensusError::Core(cairn_core::CoreError::InvalidAggregate(
                    format!("validator index {} out of {}", index, total_validators),
                )))
            }
        }
    }

    // BTreeMap iteration is ascending by index, matching the bitmap order
    let signatures: Vec<Sig> = votes.values().copied().collect();
    Ok(AggregatedSignature {
        signature: aggregate_signatures(&signatures)?,
        validators,
    })
}

/// Verifies aggregated signatures against the round validator set
#[derive(Clone)]
pub struct Aggregator {
    validator_set: Arc<dyn ValidatorSet>,
    pool: CryptoPool,
}

impl Aggregator {
    pub fn new(validator_set: Arc<dyn ValidatorSet>, pool: CryptoPool) -> Self {
        Aggregator {
            validator_set,
            pool,
        }
    }

    /// Fails closed: a sub-quorum bitmap, a bitmap of the wrong length or a
    /// bad aggregate all yield `false`.
    pub async fn verify(&self, signature: &AggregatedSignature, data: Vec<u8>, height: u64) -> bool {
        let validators = self.validator_set.round_validators(height);
        if signature.validators.len() != validators.len() {
            debug!(
                bitmap = signature.validators.len(),
                validators = validators.len(),
                "Aggregated signature bitmap length mismatch"
            );
            return false;
        }

        let public_keys: Vec<_> = signature
            .signers()
            .map(|index| validators[index].public_key)
            .collect();
        if !is_majority(public_keys.len(), validators.len()) {
            return false;
        }

        let aggregate = signature.signature.clone();
        self.pool
            .verify(move || verify_aggregate(&public_keys, &data, &aggregate).is_ok())
            .await
    }
}
