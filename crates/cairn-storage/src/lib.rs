//! Cairn Storage - Byte-oriented key-value stores and consensus tables
//!
//! The `Storage` trait is the durable store the consensus core consumes.
//! `ConsensusStore` lays the proposal, prevote, precommit and state tables
//! out on top of it.

pub mod consensus_store;
pub mod error;
pub mod storage;

pub use consensus_store::ConsensusStore;
pub use error::StorageError;
pub use storage::{FileStorage, MemoryStorage, Storage};
