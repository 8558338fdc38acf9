pub mod file;
pub mod memory;

use crate::error::StorageError;

/// Byte-oriented key-value store with staged writes
pub trait Storage: Send + Sync {
    /// Get a value by key
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /// Stage a key-value pair
    fn put(&mut self, key: &[u8], value: &[u8]);

    /// Stage a deletion
    fn delete(&mut self, key: &[u8]);

    /// Make staged changes durable
    fn commit(&mut self) -> Result<(), StorageError>;

    /// Drop staged changes
    fn rollback(&mut self);

    /// All visible keys with a given prefix, in no particular order
    fn keys_with_prefix(&self, prefix: &[u8]) -> Vec<Vec<u8>>;

    fn exists(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /// Key-value pairs under a prefix in ascending key order
    fn scan_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut keys = self.keys_with_prefix(prefix);
        keys.sort();
        keys.into_iter()
            .filter_map(|key| self.get(&key).map(|value| (key, value)))
            .collect()
    }

    /// Stage deletion of every key under a prefix
    fn delete_prefix(&mut self, prefix: &[u8]) {
        for key in self.keys_with_prefix(prefix) {
            self.delete(&key);
        }
    }
}

pub use file::FileStorage;
pub use memory::MemoryStorage;
