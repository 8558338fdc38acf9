//! Durable consensus tables.
//!
//! Messages are keyed `table / height (be) / round (be) / validator index (be)`
//! so a prefix scan replays them in `(height, round, validator)` order.

use cairn_core::{serialize, Precommit, Prevote, Proposal};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::StorageError;
use crate::storage::Storage;

const PROPOSALS: &[u8] = b"consensus/proposals/";
const PREVOTES: &[u8] = b"consensus/prevotes/";
const PRECOMMITS: &[u8] = b"consensus/precommits/";
const STATE: &[u8] = b"consensus/state";

fn message_key(table: &[u8], height: u64, round: u32, validator_index: Option<u32>) -> Vec<u8> {
    let mut key = Vec::with_capacity(table.len() + 16);
    key.extend_from_slice(table);
    key.extend_from_slice(&height.to_be_bytes());
    key.extend_from_slice(&round.to_be_bytes());
    if let Some(index) = validator_index {
        key.extend_from_slice(&index.to_be_bytes());
    }
    key
}

/// Proposal, prevote, precommit and state-snapshot tables over a byte store
pub struct ConsensusStore<S: Storage> {
    storage: S,
}

impl<S: Storage> ConsensusStore<S> {
    pub fn new(storage: S) -> Self {
        ConsensusStore { storage }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub fn get_state<T: DeserializeOwned>(&self) -> Result<Option<T>, StorageError> {
        self.storage
            .get(STATE)
            .map(|bytes| decode(STATE, &bytes))
            .transpose()
    }

    pub fn save_state<T: Serialize>(&mut self, state: &T) -> Result<(), StorageError> {
        self.storage.put(STATE, &serialize::to_bytes(state)?);
        Ok(())
    }

    pub fn save_proposals(&mut self, proposals: &[Proposal]) -> Result<(), StorageError> {
        for proposal in proposals {
            let key = message_key(PROPOSALS, proposal.height, proposal.round, None);
            self.storage.put(&key, &proposal.to_bytes()?);
        }
        Ok(())
    }

    pub fn save_prevotes(&mut self, prevotes: &[Prevote]) -> Result<(), StorageError> {
        for prevote in prevotes {
            let key = message_key(
                PREVOTES,
                prevote.height,
                prevote.round,
                Some(prevote.validator_index),
            );
            self.storage.put(&key, &prevote.to_bytes()?);
        }
        Ok(())
    }

    pub fn save_precommits(&mut self, precommits: &[Precommit]) -> Result<(), StorageError> {
        for precommit in precommits {
            let key = message_key(
                PRECOMMITS,
                precommit.height,
                precommit.round,
                Some(precommit.validator_index),
            );
            self.storage.put(&key, &precommit.to_bytes()?);
        }
        Ok(())
    }

    pub fn get_proposals(&self) -> Result<Vec<Proposal>, StorageError> {
        self.load_table(PROPOSALS)
    }

    pub fn get_prevotes(&self) -> Result<Vec<Prevote>, StorageError> {
        self.load_table(PREVOTES)
    }

    pub fn get_precommits(&self) -> Result<Vec<Precommit>, StorageError> {
        self.load_table(PRECOMMITS)
    }

    /// Stage removal of every table
    pub fn clear(&mut self) {
        for table in [PROPOSALS, PREVOTES, PRECOMMITS] {
            self.storage.delete_prefix(table);
        }
        self.storage.delete(STATE);
    }

    pub fn commit(&mut self) -> Result<(), StorageError> {
        self.storage.commit()
    }

    /// Drop every staged change, including a staged [`clear`](Self::clear)
    pub fn rollback(&mut self) {
        self.storage.rollback();
    }

    fn load_table<T: DeserializeOwned>(&self, table: &[u8]) -> Result<Vec<T>, StorageError> {
        let rows = self.storage.scan_prefix(table);
        debug!(
            table = %String::from_utf8_lossy(table),
            rows = rows.len(),
            "Loading consensus table"
        );
        rows.iter().map(|(key, value)| decode(key, value)).collect()
    }
}

fn decode<T: DeserializeOwned>(key: &[u8], bytes: &[u8]) -> Result<T, StorageError> {
    serialize::from_bytes(bytes).map_err(|e| StorageError::Corrupt {
        key: String::from_utf8_lossy(key).into_owned(),
        reason: e.to_string(),
    })
}
