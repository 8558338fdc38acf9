use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use cairn_core::serialize;

use super::memory::Overlay;
use super::Storage;
use crate::error::StorageError;

/// File-backed storage using a single snapshot file.
///
/// Every commit rewrites the snapshot through a temporary file and an atomic rename.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
    overlay: Overlay,
}

fn io_error(path: &Path, source: std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.display().to_string(),
        source,
    }
}

impl FileStorage {
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self, StorageError> {
        let path = path.into();
        let data = if path.exists() {
            let bytes = fs::read(&path).map_err(|e| io_error(&path, e))?;
            if bytes.is_empty() {
                BTreeMap::new()
            } else {
                serialize::from_bytes(&bytes).map_err(|e| StorageError::Corrupt {
                    key: path.display().to_string(),
                    reason: e.to_string(),
                })?
            }
        } else {
            BTreeMap::new()
        };

        Ok(FileStorage {
            path,
            overlay: Overlay::with_data(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush_to_disk(&self) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
        }

        let bytes = serialize::to_bytes(&self.overlay.data)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, &bytes).map_err(|e| io_error(&tmp_path, e))?;
        fs::rename(&tmp_path, &self.path).map_err(|e| io_error(&self.path, e))?;
        Ok(())
    }
}

impl Storage for FileStorage {
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
        self.flush_to_disk()
    }

    fn rollback(&mut self) {
        self.overlay.discard();
    }

    fn keys_with_prefix(&self, prefix: &[u8]) -> Vec<Vec<u8>> {
        self.overlay.keys_with_prefix(prefix)
    }
}
