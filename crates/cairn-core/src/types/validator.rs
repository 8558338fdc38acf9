use serde::{Deserialize, Serialize};

use crate::crypto::PublicKey;

/// A member of the round validator set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    /// Position in the round validator set; also the bit in aggregated signatures
    pub index: u32,
    /// Consensus public key
    pub public_key: PublicKey,
    /// Voting weight reported by the validator-set service
    pub voting_power: u64,
}

impl Validator {
    pub fn new(index: u32, public_key: PublicKey) -> Self {
        Validator {
            index,
            public_key,
            voting_power: 1,
        }
    }
}
