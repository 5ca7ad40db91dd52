//! Hydra Datastore
//!
//! The shared record store every head reads and writes.
//!
//! Keys are cleaned paths ([`Key`]). A [`Query`] selects every key strictly
//! below a prefix and yields [`Entry`] values lazily through
//! [`QueryResults`]. Backends:
//!
//! - [`MemoryDatastore`]: ordered map behind a read/write lock.
//! - [`RocksDatastore`]: RocksDB, streaming query results in chunks.
//!
//! [`HookedDatastore`] wraps any backend and runs callbacks after puts,
//! deletes and queries. Callbacks run synchronously on the caller's task.

mod error;
mod hooks;
mod key;
mod memory;
mod rocks;

pub use error::{Error, Result};
pub use hooks::{AfterDelete, AfterPut, AfterQuery, HookedDatastore, Hooks};
pub use key::Key;
pub use memory::MemoryDatastore;
pub use rocks::RocksDatastore;

use std::sync::Arc;

/// Selects entries below a key prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    /// Only keys strictly below this prefix match. The root matches all.
    pub prefix: Key,
    /// Leave [`Entry::value`] empty.
    pub keys_only: bool,
}

impl Query {
    pub fn prefix(prefix: impl Into<Key>) -> Self {
        Self {
            prefix: prefix.into(),
            keys_only: false,
        }
    }

    pub fn keys_only(mut self) -> Self {
        self.keys_only = true;
        self
    }

    pub fn matches(&self, key: &Key) -> bool {
        key.is_descendant_of(&self.prefix)
    }
}

/// A query result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: Key,
    /// Empty for keys-only queries.
    pub value: Vec<u8>,
    /// Size of the stored value, reported even for keys-only queries.
    pub size: usize,
}

/// Lazily evaluated query results, in key order.
pub type QueryResults = Box<dyn Iterator<Item = Result<Entry>> + Send>;

/// A group of writes applied together.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    ops: Vec<BatchOp>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put(Key, Vec<u8>),
    Delete(Key),
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: Key, value: Vec<u8>) {
        self.ops.push(BatchOp::Put(key, value));
    }

    pub fn delete(&mut self, key: Key) {
        self.ops.push(BatchOp::Delete(key));
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// The key-value contract the fleet needs from its store.
///
/// Implementations are internally synchronized and shared as
/// [`SharedDatastore`].
pub trait Datastore: Send + Sync {
    /// Value at `key`, or [`Error::NotFound`].
    fn get(&self, key: &Key) -> Result<Vec<u8>>;

    fn has(&self, key: &Key) -> Result<bool>;

    /// Size of the value at `key`, or [`Error::NotFound`].
    fn get_size(&self, key: &Key) -> Result<usize>;

    fn put(&self, key: &Key, value: Vec<u8>) -> Result<()>;

    /// Remove `key`. Removing a missing key succeeds.
    fn delete(&self, key: &Key) -> Result<()>;

    fn query(&self, query: &Query) -> Result<QueryResults>;

    /// Apply a batch. Backends without atomic batches apply it in order.
    fn commit(&self, batch: Batch) -> Result<()> {
        for op in batch.into_ops() {
            match op {
                BatchOp::Put(key, value) => self.put(&key, value)?,
                BatchOp::Delete(key) => self.delete(&key)?,
            }
        }
        Ok(())
    }

    /// Cheap approximate count of keys below `prefix`, when the backend can
    /// provide one.
    fn estimate_prefix_count(&self, _prefix: &Key) -> Option<u64> {
        None
    }

    /// Flush and release resources.
    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Datastore handle shared across the fleet.
pub type SharedDatastore = Arc<dyn Datastore>;

/// Count keys below `prefix`, preferring the backend's estimate.
pub fn count_prefix(store: &dyn Datastore, prefix: &Key) -> Result<u64> {
    if let Some(estimate) = store.estimate_prefix_count(prefix) {
        return Ok(estimate);
    }
    let mut count = 0;
    for entry in store.query(&Query::prefix(prefix.clone()).keys_only())? {
        entry?;
        count += 1;
    }
    Ok(count)
}
