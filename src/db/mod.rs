//! Database handles
//!
//! `Database` is the process-wide pooled handle. `TransactionDb` is a
//! write-buffered view over it that is applied atomically on commit.
//! Business code never picks between them: it asks the ambient context for a
//! `DbHandle` and gets whichever one is active in its call chain.

pub mod transaction;

pub use transaction::TransactionDb;

use crate::error::StorageError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

const TREE_DATA: &str = "tally_data";

/// Pooled database handle. Cheap to clone; clones share the same sled instance.
#[derive(Clone)]
pub struct Database {
    db: sled::Db,
    data: sled::Tree,
}

impl Database {
    /// Open (or create) the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path.as_ref()).map_err(|e| {
            StorageError::IoError(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!(
                    "Failed to open sled database at {}: {}",
                    path.as_ref().display(),
                    e
                ),
            ))
        })?;
        Self::from_sled(db)
    }

    /// In-memory database removed on drop. Used by tests and dry runs.
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_sled(db)
    }

    pub fn from_sled(db: sled::Db) -> Result<Self, StorageError> {
        let data = db.open_tree(TREE_DATA)?;
        Ok(Self { db, data })
    }

    /// Underlying sled database, shared with other stores (e.g. the key-value store).
    pub fn sled(&self) -> &sled::Db {
        &self.db
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.data.get(key.as_bytes())?.map(|v| v.to_vec()))
    }

    pub fn insert(&self, key: &str, value: impl Into<Vec<u8>>) -> Result<(), StorageError> {
        self.data.insert(key.as_bytes(), value.into())?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.data.remove(key.as_bytes())?;
        Ok(())
    }

    pub fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let mut out = Vec::new();
        for item in self.data.scan_prefix(prefix.as_bytes()) {
            let (key, value) = item?;
            out.push((String::from_utf8_lossy(&key).into_owned(), value.to_vec()));
        }
        Ok(out)
    }

    /// Start a buffered transaction. Nothing is written until `commit`.
    pub fn begin(&self) -> TransactionDb {
        TransactionDb::new(self.db.clone(), self.data.clone())
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

/// The handle returned by `ambient::db()`.
#[derive(Clone)]
pub enum DbHandle {
    Pooled(Database),
    Transaction(TransactionDb),
}

impl DbHandle {
    pub fn is_transaction(&self) -> bool {
        matches!(self, DbHandle::Transaction(_))
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match self {
            DbHandle::Pooled(db) => db.get(key),
            DbHandle::Transaction(tx) => tx.get(key),
        }
    }

    pub fn insert(&self, key: &str, value: impl Into<Vec<u8>>) -> Result<(), StorageError> {
        match self {
            DbHandle::Pooled(db) => db.insert(key, value),
            DbHandle::Transaction(tx) => tx.insert(key, value),
        }
    }

    pub fn remove(&self, key: &str) -> Result<(), StorageError> {
        match self {
            DbHandle::Pooled(db) => db.remove(key),
            DbHandle::Transaction(tx) => tx.remove(key),
        }
    }

    pub fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        match self {
            DbHandle::Pooled(db) => db.scan_prefix(prefix),
            DbHandle::Transaction(tx) => tx.scan_prefix(prefix),
        }
    }

    /// Read and deserialize a JSON value.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        let Some(raw) = self.get(key)? else {
            return Ok(None);
        };
        let parsed = serde_json::from_slice(&raw).map_err(|e| StorageError::Serialization {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Ok(Some(parsed))
    }

    /// Serialize a value as JSON and write it.
    pub fn put_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let raw = serde_json::to_vec(value).map_err(|e| StorageError::Serialization {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        self.insert(key, raw)
    }
}

impl From<Database> for DbHandle {
    fn from(db: Database) -> Self {
        DbHandle::Pooled(db)
    }
}
