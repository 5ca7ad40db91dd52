//! RocksDB-backed datastore.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use tracing::{debug, warn};

use crate::{Batch, BatchOp, Datastore, Entry, Error, Key, Query, QueryResults, Result};

/// Entries fetched per iterator refill.
const QUERY_CHUNK: usize = 256;

/// Persistent store on RocksDB.
///
/// [`Datastore::close`] releases the database once in-flight queries finish;
/// later operations fail with [`Error::Closed`].
pub struct RocksDatastore {
    db: RwLock<Option<Arc<DB>>>,
}

impl RocksDatastore {
    /// Open or create a database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        std::fs::create_dir_all(path.as_ref())?;
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path.as_ref())?;
        debug!(path = %path.as_ref().display(), "opened rocksdb datastore");
        Ok(Self {
            db: RwLock::new(Some(Arc::new(db))),
        })
    }

    fn db(&self) -> Result<Arc<DB>> {
        self.db.read().clone().ok_or(Error::Closed)
    }
}

impl Datastore for RocksDatastore {
    fn get(&self, key: &Key) -> Result<Vec<u8>> {
        self.db()?
            .get(key.as_str().as_bytes())?
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    fn has(&self, key: &Key) -> Result<bool> {
        Ok(self.db()?.get_pinned(key.as_str().as_bytes())?.is_some())
    }

    fn get_size(&self, key: &Key) -> Result<usize> {
        self.db()?
            .get_pinned(key.as_str().as_bytes())?
            .map(|v| v.len())
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    fn put(&self, key: &Key, value: Vec<u8>) -> Result<()> {
        self.db()?.put(key.as_str().as_bytes(), value)?;
        Ok(())
    }

    fn delete(&self, key: &Key) -> Result<()> {
        self.db()?.delete(key.as_str().as_bytes())?;
        Ok(())
    }

    fn query(&self, query: &Query) -> Result<QueryResults> {
        Ok(Box::new(RocksQuery {
            db: self.db()?,
            prefix: query.prefix.descendant_prefix().into_bytes(),
            keys_only: query.keys_only,
            resume_from: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }))
    }

    fn commit(&self, batch: Batch) -> Result<()> {
        let mut wb = WriteBatch::default();
        for op in batch.ops() {
            match op {
                BatchOp::Put(key, value) => wb.put(key.as_str().as_bytes(), value),
                BatchOp::Delete(key) => wb.delete(key.as_str().as_bytes()),
            }
        }
        self.db()?.write(wb)?;
        Ok(())
    }

    /// RocksDB's estimate covers the whole database, so it is only offered
    /// when every stored key lies under `prefix`: the first and last keys in
    /// order both carry it. The fleet's store keeps provider records only.
    fn estimate_prefix_count(&self, prefix: &Key) -> Option<u64> {
        let db = self.db().ok()?;
        let wanted = prefix.descendant_prefix().into_bytes();
        let covers = |mode: IteratorMode| match db.iterator(mode).next() {
            Some(Ok((key, _))) => key.starts_with(&wanted),
            Some(Err(_)) => false,
            None => true,
        };
        if !prefix.is_root() && !(covers(IteratorMode::Start) && covers(IteratorMode::End)) {
            return None;
        }
        match db.property_int_value("rocksdb.estimate-num-keys") {
            Ok(estimate) => estimate,
            Err(e) => {
                warn!(error = %e, "rocksdb key estimate unavailable");
                None
            }
        }
    }

    fn close(&self) -> Result<()> {
        if let Some(db) = self.db.write().take() {
            db.flush()?;
        }
        Ok(())
    }
}

/// Lazy prefix scan that re-opens a RocksDB iterator for every chunk, so the
/// result stream owns no borrow of the database.
struct RocksQuery {
    db: Arc<DB>,
    prefix: Vec<u8>,
    keys_only: bool,
    /// Smallest key of the next chunk.
    resume_from: Option<Vec<u8>>,
    buffer: VecDeque<Result<Entry>>,
    exhausted: bool,
}

impl RocksQuery {
    fn refill(&mut self) {
        let start = self.resume_from.clone().unwrap_or_else(|| self.prefix.clone());
        let iter = self
            .db
            .iterator(IteratorMode::From(&start, Direction::Forward));

        let mut taken = 0;
        for item in iter {
            let (key, value) = match item {
                Ok(kv) => kv,
                Err(e) => {
                    self.buffer.push_back(Err(e.into()));
                    self.exhausted = true;
                    return;
                }
            };
            if !key.starts_with(&self.prefix) {
                self.exhausted = true;
                return;
            }
            if taken == QUERY_CHUNK {
                self.resume_from = Some(key.to_vec());
                return;
            }
            taken += 1;

            let entry = match String::from_utf8(key.to_vec()) {
                Ok(k) => Ok(Entry {
                    key: Key::new(k),
                    size: value.len(),
                    value: if self.keys_only {
                        Vec::new()
                    } else {
                        value.to_vec()
                    },
                }),
                Err(e) => Err(Error::Storage(format!("non-utf8 key: {e}"))),
            };
            self.buffer.push_back(entry);
        }
        self.exhausted = true;
    }
}

impl Iterator for RocksQuery {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            self.refill();
        }
        self.buffer.pop_front()
    }
}
