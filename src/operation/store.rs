//! Generic key-value persistence for progress records.

use sled::{Db, Tree};

use crate::error::StorageError;

const TREE_KV: &str = "tally_kv";

/// String-valued store, last write wins.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    /// Returns whether the key was present.
    fn delete(&self, key: &str) -> Result<bool, StorageError>;
}

#[derive(Clone)]
pub struct SledKeyValueStore {
    tree: Tree,
}

impl SledKeyValueStore {
    pub fn new(db: &Db) -> Result<Self, StorageError> {
        Ok(Self {
            tree: db.open_tree(TREE_KV)?,
        })
    }
}

impl KeyValueStore for SledKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let Some(raw) = self.tree.get(key.as_bytes())? else {
            return Ok(None);
        };
        String::from_utf8(raw.to_vec())
            .map(Some)
            .map_err(|e| StorageError::Serialization {
                key: key.to_string(),
                message: e.to_string(),
            })
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.tree.insert(key.as_bytes(), value.as_bytes())?;
        self.tree.flush()?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let removed = self.tree.remove(key.as_bytes())?.is_some();
        self.tree.flush()?;
        Ok(removed)
    }
}
