use std::path::{Path, PathBuf};

use super::error::StorageError;
use super::kv::KeyValueStore;

const TREE_NAME: &str = "__quest_sync__";

/// Sled-backed key-value store.
///
/// All keys live in one dedicated tree. Each write is flushed before
/// returning so that the value survives a process restart.
pub struct SledStore {
    db: sled::Db,
    tree: sled::Tree,
    path: PathBuf,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self, StorageError> {
        let path = data_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&path)?;

        let db = sled::open(&path).map_err(|e| StorageError::SledError(e.to_string()))?;
        let tree = db
            .open_tree(TREE_NAME)
            .map_err(|e| StorageError::SledError(e.to_string()))?;

        log::info!("Sled key-value store opened at {:?}", path);

        Ok(Self { db, tree, path })
    }

    fn flush(&self) -> Result<(), StorageError> {
        self.tree
            .flush()
            .map_err(|e| StorageError::SledError(e.to_string()))?;
        Ok(())
    }
}

impl KeyValueStore for SledStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let value = self
            .tree
            .get(key.as_bytes())
            .map_err(|e| StorageError::SledError(e.to_string()))?;

        match value {
            Some(bytes) => {
                let text = String::from_utf8(bytes.to_vec())
                    .map_err(|e| StorageError::SledError(e.to_string()))?;
                Ok(Some(text))
            }
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.tree
            .insert(key.as_bytes(), value.as_bytes())
            .map_err(|e| StorageError::SledError(e.to_string()))?;
        self.flush()
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.tree
            .remove(key.as_bytes())
            .map_err(|e| StorageError::SledError(e.to_string()))?;
        self.flush()
    }
}

impl Drop for SledStore {
    fn drop(&mut self) {
        if let Err(e) = self.db.flush() {
            log::warn!("Failed to flush sled store at {:?}: {}", self.path, e);
        }
    }
}
