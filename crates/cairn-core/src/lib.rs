//! Cairn Core - Consensus types, cryptography, and serialization
//!
//! This crate provides the message types exchanged by validators, the
//! signature and aggregation primitives, and BFT quorum arithmetic.

pub mod crypto;
pub mod error;
pub mod quorum;
pub mod serialize;
pub mod types;

pub use crypto::{
    aggregate_signatures, hash_blake3, merkle_root, sign, verify, verify_aggregate, Hash, KeyPair,
    PublicKey, SecretKey, Sig,
};
pub use error::CoreError;
pub use quorum::{is_majority, is_minority, majority_threshold, minority_threshold};
pub use types::*;
