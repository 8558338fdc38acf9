use std::collections::BTreeMap;

use super::Storage;
use crate::error::StorageError;

/// Committed data plus the writes staged on top of it.
///
/// A staged `None` is a pending deletion.
#[derive(Debug, Clone, Default)]
pub(crate) struct Overlay {
    pub(crate) data: BTreeMap<Vec<u8>, Vec<u8>>,
    pending: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl Overlay {
    pub(crate) fn with_data(data: BTreeMap<Vec<u8>, Vec<u8>>) -> Self {
        Overlay {
            data,
            pending: BTreeMap::new(),
        }
    }

    pub(crate) fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        match self.pending.get(key) {
            Some(staged) => staged.clone(),
            None => self.data.get(key).cloned(),
        }
    }

    pub(crate) fn stage(&mut self, key: &[u8], value: Option<&[u8]>) {
        self.pending.insert(key.to_vec(), value.map(<[u8]>::to_vec));
    }

    pub(crate) fn apply(&mut self) {
        for (key, value) in std::mem::take(&mut self.pending) {
            match value {
                Some(v) => {
                    self.data.insert(key, v);
                }
                None => {
                    self.data.remove(&key);
                }
            }
        }
    }

    pub(crate) fn discard(&mut self) {
        self.pending.clear();
    }

    pub(crate) fn keys_with_prefix(&self, prefix: &[u8]) -> Vec<Vec<u8>> {
        let committed = self
            .data
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| !matches!(self.pending.get(*key), Some(None)))
            .map(|(key, _)| key.clone());

        let staged = self
            .pending
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(key, value)| value.is_some() && !self.data.contains_key(*key))
            .map(|(key, _)| key.clone());

        committed.chain(staged).collect()
    }
}

/// In-memory storage, used by tests and ephemeral nodes
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    overlay: Overlay,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed keys
    pub fn len(&self) -> usize {
        self.overlay.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overlay.data.is_empty()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.overlay.get(key)
    }

    fn put(&mut self, key: &[u8], value: &[u8]) {
        self.overlay.stage(key, Some(value));
    }

    fn delete(&mut self, key: &[u8]) {
        self.overlay.stage(key, None);
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        self.overlay.apply();
        Ok(())
    }

    fn rollback(&mut self) {
        self.overlay.discard();
    }

    fn keys_with_prefix(&self, prefix: &[u8]) -> Vec<Vec<u8>> {
        self.overlay.keys_with_prefix(prefix)
    }
}
