//! Multi-signature aggregation.
//!
//! A quorum certificate carries one opaque aggregate plus a bitmap of
//! contributing validator indices. The aggregate produced here is the
//! concatenation of member signatures in ascending validator-index order,
//! and verification checks each member against the key selected by the
//! bitmap at the same position. Callers only ever see the bytes and the
//! bitmap, so a pairing-based backend can replace these two functions.

use crate::crypto::keys::PublicKey;
use crate::crypto::signature::{verify, Sig, SIGNATURE_LENGTH};
use crate::error::CoreError;

/// Aggregate signatures that are already ordered by validator index.
pub fn aggregate_signatures(signatures: &[Sig]) -> Result<Vec<u8>, CoreError> {
    if signatures.is_empty() {
        return Err(CoreError::InvalidAggregate(
            "no signatures to aggregate".to_string(),
        ));
    }

    let mut aggregate = Vec::with_capacity(signatures.len() * SIGNATURE_LENGTH);
    for signature in signatures {
        aggregate.extend_from_slice(signature.as_bytes());
    }
    Ok(aggregate)
}

/// Verify an aggregate against the ordered public keys of its contributors.
pub fn verify_aggregate(
    public_keys: &[PublicKey],
    message: &[u8],
    aggregate: &[u8],
) -> Result<(), CoreError> {
    if public_keys.is_empty() || aggregate.len() != public_keys.len() * SIGNATURE_LENGTH {
        return Err(CoreError::InvalidAggregate(format!(
            "{} bytes for {} signers",
            aggregate.len(),
            public_keys.len()
        )));
    }

    for (public_key, chunk) in public_keys.iter().zip(aggregate.chunks(SIGNATURE_LENGTH)) {
        let signature = Sig::from_slice(chunk).ok_or(CoreError::InvalidSignature)?;
        verify(public_key, message, &signature)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::KeyPair;
    use crate::crypto::signature::sign;

    fn signers(n: u8) -> Vec<KeyPair> {
        (1..=n).map(KeyPair::from_seed).collect()
    }

    #[test]
    fn test_aggregate_verifies_for_ordered_keys() {
        let keys = signers(3);
        let sigs: Vec<Sig> = keys.iter().map(|k| sign(&k.secret, b"commit")).collect();
        let aggregate = aggregate_signatures(&sigs).unwrap();

        let publics: Vec<PublicKey> = keys.iter().map(|k| k.public).collect();
        verify_aggregate(&publics, b"commit", &aggregate).unwrap();
    }

    #[test]
    fn test_aggregate_fails_for_swapped_keys() {
        let keys = signers(2);
        let sigs: Vec<Sig> = keys.iter().map(|k| sign(&k.secret, b"commit")).collect();
        let aggregate = aggregate_signatures(&sigs).unwrap();

        let swapped = vec![keys[1].public, keys[0].public];
        assert!(verify_aggregate(&swapped, b"commit", &aggregate).is_err());
    }

    #[test]
    fn test_aggregate_rejects_signer_count_mismatch() {
        let keys = signers(3);
        let sigs: Vec<Sig> = keys[..2].iter().map(|k| sign(&k.secret, b"m")).collect();
        let aggregate = aggregate_signatures(&sigs).unwrap();

        let publics: Vec<PublicKey> = keys.iter().map(|k| k.public).collect();
        assert!(matches!(
            verify_aggregate(&publics, b"m", &aggregate),
            Err(CoreError::InvalidAggregate(_))
        ));
        assert!(aggregate_signatures(&[]).is_err());
    }
}
