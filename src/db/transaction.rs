//! Buffered transaction handle.
//!
//! Writes are staged in an in-memory overlay and applied to sled as one
//! `Batch` on commit, which sled applies atomically. Reads consult the overlay
//! first so code inside the transaction sees its own writes.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::StorageError;

static TRANSACTION_COUNTER: AtomicU64 = AtomicU64::new(1);

#[derive(Default)]
struct Staged {
    // None marks a staged removal
    writes: BTreeMap<String, Option<Vec<u8>>>,
    finished: bool,
}

struct Inner {
    id: u64,
    db: sled::Db,
    tree: sled::Tree,
    staged: Mutex<Staged>,
}

/// Transaction-scoped database handle. Clones share the same staged writes.
#[derive(Clone)]
pub struct TransactionDb {
    inner: Arc<Inner>,
}

impl TransactionDb {
    pub(crate) fn new(db: sled::Db, tree: sled::Tree) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: TRANSACTION_COUNTER.fetch_add(1, Ordering::Relaxed),
                db,
                tree,
                staged: Mutex::new(Staged::default()),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn is_finished(&self) -> bool {
        self.inner.staged.lock().finished
    }

    pub fn pending_writes(&self) -> usize {
        self.inner.staged.lock().writes.len()
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        {
            let staged = self.inner.staged.lock();
            if staged.finished {
                return Err(StorageError::TransactionClosed(self.inner.id));
            }
            if let Some(value) = staged.writes.get(key) {
                return Ok(value.clone());
            }
        }
        Ok(self.inner.tree.get(key.as_bytes())?.map(|v| v.to_vec()))
    }

    pub fn insert(&self, key: &str, value: impl Into<Vec<u8>>) -> Result<(), StorageError> {
        self.stage(key, Some(value.into()))
    }

    pub fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.stage(key, None)
    }

    pub fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let mut merged: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        for item in self.inner.tree.scan_prefix(prefix.as_bytes()) {
            let (key, value) = item?;
            merged.insert(String::from_utf8_lossy(&key).into_owned(), value.to_vec());
        }

        let staged = self.inner.staged.lock();
        if staged.finished {
            return Err(StorageError::TransactionClosed(self.inner.id));
        }
        for (key, value) in staged.writes.range(prefix.to_string()..) {
            if !key.starts_with(prefix) {
                break;
            }
            match value {
                Some(v) => {
                    merged.insert(key.clone(), v.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged.into_iter().collect())
    }

    /// Apply every staged write in one atomic batch.
    pub fn commit(&self) -> Result<usize, StorageError> {
        let writes = {
            let mut staged = self.inner.staged.lock();
            if staged.finished {
                return Err(StorageError::TransactionClosed(self.inner.id));
            }
            staged.finished = true;
            std::mem::take(&mut staged.writes)
        };

        let count = writes.len();
        if count == 0 {
            return Ok(0);
        }

        let mut batch = sled::Batch::default();
        for (key, value) in writes {
            match value {
                Some(v) => batch.insert(key.as_bytes(), v),
                None => batch.remove(key.as_bytes()),
            }
        }
        self.inner.tree.apply_batch(batch)?;
        self.inner.db.flush()?;
        debug!(transaction_id = self.inner.id, writes = count, "transaction committed");
        Ok(count)
    }

    /// Discard every staged write. Returns how many were dropped.
    pub fn rollback(&self) -> usize {
        let mut staged = self.inner.staged.lock();
        staged.finished = true;
        let dropped = staged.writes.len();
        staged.writes.clear();
        debug!(transaction_id = self.inner.id, dropped, "transaction rolled back");
        dropped
    }

    fn stage(&self, key: &str, value: Option<Vec<u8>>) -> Result<(), StorageError> {
        let mut staged = self.inner.staged.lock();
        if staged.finished {
            return Err(StorageError::TransactionClosed(self.inner.id));
        }
        staged.writes.insert(key.to_string(), value);
        Ok(())
    }
}
