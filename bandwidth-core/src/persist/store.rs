//! Durable key/value backend for persisted metric blobs.

use crate::error::{StorageError, StorageResult};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default sled tree holding persisted metrics
pub const DEFAULT_TREE_NAME: &str = "persistent-metrics";

/// Blob store keyed by metric identifier.
///
/// Implementations must make `put` atomic: a concurrent `get` sees either the
/// previous blob or the new one, and a crash mid-write leaves the previous blob
/// intact.
pub trait MetricStore: Send + Sync {
    /// Read the blob stored under `key`, `None` if the key was never written
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Replace the blob stored under `key`
    fn put(&self, key: &str, value: &[u8]) -> StorageResult<()>;

    /// List every key in the store, in byte order
    fn keys(&self) -> StorageResult<Vec<String>>;
}

/// sled-backed metric store.
pub struct SledStore {
    db: sled::Db,
    tree: sled::Tree,
    db_path: PathBuf,
}

impl SledStore {
    /// Open (or create) the database at `path` using the default tree
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        Self::open_tree(path, DEFAULT_TREE_NAME)
    }

    /// Open (or create) the database at `path` and the named tree inside it
    pub fn open_tree<P: AsRef<Path>>(path: P, tree_name: &str) -> StorageResult<Self> {
        if tree_name.is_empty() {
            return Err(StorageError::InvalidOption(
                "invalid empty tree name".to_string(),
            ));
        }

        let path_buf = path.as_ref().to_path_buf();
        let db = sled::Config::new()
            .path(&path_buf)
            .flush_every_ms(Some(1000))
            .open()?;
        let tree = db.open_tree(tree_name)?;

        debug!(path = %path_buf.display(), tree = tree_name, "Opened metric store");

        Ok(Self {
            db,
            tree,
            db_path: path_buf,
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }
}

impl MetricStore for SledStore {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.tree.get(key.as_bytes())?.map(|value| value.to_vec()))
    }

    fn put(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        self.tree
            .transaction(|tx| {
                tx.insert(key.as_bytes(), value)?;
                Ok::<(), ConflictableTransactionError<()>>(())
            })
            .map_err(|e| match e {
                TransactionError::Storage(err) => StorageError::Database(err),
                TransactionError::Abort(()) => {
                    StorageError::Transaction(format!("write of {key} aborted"))
                }
            })?;

        // Make the write durable before reporting success.
        self.db.flush()?;
        Ok(())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        for key in self.tree.iter().keys() {
            let key = key?;
            keys.push(String::from_utf8_lossy(&key).into_owned());
        }
        Ok(keys)
    }
}
