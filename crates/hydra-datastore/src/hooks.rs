//! Operation hooks around a datastore.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::{Batch, BatchOp, Datastore, Error, Key, Query, QueryResults, Result, SharedDatastore};

/// Called after a put with the key, the value, whether the key existed
/// before, and the error if the put failed.
pub type AfterPut = Arc<dyn Fn(&Key, &[u8], bool, Option<&Error>) + Send + Sync>;

/// Called after a delete with the key and the error if it failed.
pub type AfterDelete = Arc<dyn Fn(&Key, Option<&Error>) + Send + Sync>;

/// Called with every successful query's results; returns the stream handed
/// to the caller. Failed queries bypass the hook.
pub type AfterQuery = Arc<dyn Fn(&Query, QueryResults) -> QueryResults + Send + Sync>;

/// Callbacks installed on a [`HookedDatastore`].
#[derive(Default, Clone)]
pub struct Hooks {
    pub after_put: Option<AfterPut>,
    pub after_delete: Option<AfterDelete>,
    pub after_query: Option<AfterQuery>,
}

/// Runs [`Hooks`] after operations on the wrapped store.
///
/// Errors from the wrapped store are returned unchanged. Hooks can be
/// installed after construction, which lets the query proxy be attached once
/// the routing clients it depends on exist.
///
/// While an `after_put` hook is installed, writes through this wrapper are
/// serialized so the reported prior existence matches the write.
pub struct HookedDatastore {
    inner: SharedDatastore,
    hooks: RwLock<Hooks>,
    writes: Mutex<()>,
}

impl HookedDatastore {
    pub fn new(inner: SharedDatastore, hooks: Hooks) -> Self {
        Self {
            inner,
            hooks: RwLock::new(hooks),
            writes: Mutex::new(()),
        }
    }

    /// Drop every hook, releasing whatever the callbacks captured.
    pub fn clear_hooks(&self) {
        *self.hooks.write() = Hooks::default();
    }

    pub fn set_after_put(&self, hook: AfterPut) {
        self.hooks.write().after_put = Some(hook);
    }

    pub fn set_after_delete(&self, hook: AfterDelete) {
        self.hooks.write().after_delete = Some(hook);
    }

    pub fn set_after_query(&self, hook: AfterQuery) {
        self.hooks.write().after_query = Some(hook);
    }

    /// The wrapped store.
    pub fn inner(&self) -> &SharedDatastore {
        &self.inner
    }

    fn existed(&self, key: &Key) -> bool {
        self.inner.has(key).unwrap_or(false)
    }
}

impl Datastore for HookedDatastore {
    fn get(&self, key: &Key) -> Result<Vec<u8>> {
        self.inner.get(key)
    }

    fn has(&self, key: &Key) -> Result<bool> {
        self.inner.has(key)
    }

    fn get_size(&self, key: &Key) -> Result<usize> {
        self.inner.get_size(key)
    }

    fn put(&self, key: &Key, value: Vec<u8>) -> Result<()> {
        let Some(hook) = self.hooks.read().after_put.clone() else {
            return self.inner.put(key, value);
        };
        // Kept for the hook; the store takes ownership of the original.
        let observed = value.clone();
        let (existed, result) = {
            let _write = self.writes.lock();
            (self.existed(key), self.inner.put(key, value))
        };
        hook(key, &observed, existed, result.as_ref().err());
        result
    }

    fn delete(&self, key: &Key) -> Result<()> {
        let result = self.inner.delete(key);
        if let Some(hook) = self.hooks.read().after_delete.clone() {
            hook(key, result.as_ref().err());
        }
        result
    }

    fn query(&self, query: &Query) -> Result<QueryResults> {
        let results = self.inner.query(query)?;
        match self.hooks.read().after_query.clone() {
            Some(hook) => Ok(hook(query, results)),
            None => Ok(results),
        }
    }

    fn commit(&self, batch: Batch) -> Result<()> {
        let hooks = self.hooks.read().clone();
        if hooks.after_put.is_none() && hooks.after_delete.is_none() {
            return self.inner.commit(batch);
        }

        let ops = batch.ops().to_vec();
        let (existed, result) = {
            let _write = self.writes.lock();
            let existed: Vec<bool> = ops
                .iter()
                .map(|op| match op {
                    BatchOp::Put(key, _) => self.existed(key),
                    BatchOp::Delete(_) => false,
                })
                .collect();
            (existed, self.inner.commit(batch))
        };
        let err = result.as_ref().err();
        for (op, existed) in ops.iter().zip(existed) {
            match op {
                BatchOp::Put(key, value) => {
                    if let Some(hook) = &hooks.after_put {
                        hook(key, value, existed, err);
                    }
                }
                BatchOp::Delete(key) => {
                    if let Some(hook) = &hooks.after_delete {
                        hook(key, err);
                    }
                }
            }
        }
        result
    }

    fn estimate_prefix_count(&self, prefix: &Key) -> Option<u64> {
        self.inner.estimate_prefix_count(prefix)
    }

    fn close(&self) -> Result<()> {
        self.inner.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryDatastore;

    struct FailingStore;

    impl Datastore for FailingStore {
        fn get(&self, key: &Key) -> Result<Vec<u8>> {
            Err(Error::NotFound(key.to_string()))
        }
        fn has(&self, _key: &Key) -> Result<bool> {
            Ok(false)
        }
        fn get_size(&self, key: &Key) -> Result<usize> {
            Err(Error::NotFound(key.to_string()))
        }
        fn put(&self, _key: &Key, _value: Vec<u8>) -> Result<()> {
            Err(Error::Storage("disk full".into()))
        }
        fn delete(&self, _key: &Key) -> Result<()> {
            Err(Error::Storage("disk full".into()))
        }
        fn query(&self, _query: &Query) -> Result<QueryResults> {
            Err(Error::Storage("disk full".into()))
        }
    }

    #[test]
    fn after_put_sees_prior_existence() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        let hooks = Hooks {
            after_put: Some(Arc::new(move |key: &Key, _: &[u8], existed: bool, err: Option<&Error>| {
                log.lock().push((key.to_string(), existed, err.is_some()));
            })),
            ..Default::default()
        };
        let ds = HookedDatastore::new(Arc::new(MemoryDatastore::new()), hooks);
        ds.put(&Key::new("/providers/a/p"), vec![1]).unwrap();
        ds.put(&Key::new("/providers/a/p"), vec![2]).unwrap();
        assert_eq!(
            *seen.lock(),
            vec![
                ("/providers/a/p".to_string(), false, false),
                ("/providers/a/p".to_string(), true, false),
            ]
        );
    }

    #[test]
    fn errors_pass_through_unchanged() {
        let saw_error = Arc::new(Mutex::new(false));
        let flag = saw_error.clone();
        let ds = HookedDatastore::new(Arc::new(FailingStore), Hooks::default());
        ds.set_after_delete(Arc::new(move |_: &Key, err: Option<&Error>| {
            *flag.lock() = err.is_some();
        }));

        match ds.delete(&Key::new("/providers/a/p")) {
            Err(Error::Storage(msg)) => assert_eq!(msg, "disk full"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(*saw_error.lock());
        assert!(matches!(ds.query(&Query::prefix("/providers")), Err(Error::Storage(_))));
    }

    #[test]
    fn after_query_transforms_results() {
        let ds = HookedDatastore::new(Arc::new(MemoryDatastore::new()), Hooks::default());
        ds.put(&Key::new("/a/1"), vec![]).unwrap();
        ds.put(&Key::new("/a/2"), vec![]).unwrap();
        ds.set_after_query(Arc::new(|_: &Query, results: QueryResults| {
            Box::new(results.take(1)) as QueryResults
        }));
        assert_eq!(ds.query(&Query::prefix("/a")).unwrap().count(), 1);
    }

    #[test]
    fn batch_runs_hooks_per_op() {
        let puts = Arc::new(Mutex::new(0));
        let deletes = Arc::new(Mutex::new(0));
        let (p, d) = (puts.clone(), deletes.clone());
        let hooks = Hooks {
            after_put: Some(Arc::new(move |_: &Key, _: &[u8], _: bool, _: Option<&Error>| *p.lock() += 1)),
            after_delete: Some(Arc::new(move |_: &Key, _: Option<&Error>| *d.lock() += 1)),
            after_query: None,
        };
        let ds = HookedDatastore::new(Arc::new(MemoryDatastore::new()), hooks);
        let mut batch = Batch::new();
        batch.put(Key::new("/a"), vec![]);
        batch.put(Key::new("/b"), vec![]);
        batch.delete(Key::new("/a"));
        ds.commit(batch).unwrap();
        assert_eq!((*puts.lock(), *deletes.lock()), (2, 1));
    }

    #[test]
    fn concurrent_puts_report_one_new_key() {
        let fresh = Arc::new(Mutex::new(0));
        let counter = fresh.clone();
        let hooks = Hooks {
            after_put: Some(Arc::new(move |_: &Key, _: &[u8], existed: bool, _: Option<&Error>| {
                if !existed {
                    *counter.lock() += 1;
                }
            })),
            ..Default::default()
        };
        let ds = HookedDatastore::new(Arc::new(MemoryDatastore::new()), hooks);
        std::thread::scope(|scope| {
            for i in 0..8u8 {
                let ds = &ds;
                scope.spawn(move || ds.put(&Key::new("/providers/a/p"), vec![i]).unwrap());
            }
        });
        assert_eq!(*fresh.lock(), 1);
    }

    #[test]
    fn clearing_hooks_releases_captures() {
        let captured = Arc::new(());
        let held = captured.clone();
        let ds = HookedDatastore::new(Arc::new(MemoryDatastore::new()), Hooks::default());
        ds.set_after_query(Arc::new(move |_: &Query, results: QueryResults| {
            let _ = &held;
            results
        }));
        assert_eq!(Arc::strong_count(&captured), 2);

        ds.clear_hooks();
        assert_eq!(Arc::strong_count(&captured), 1);
        ds.put(&Key::new("/a/1"), vec![]).unwrap();
        assert_eq!(ds.query(&Query::prefix("/a")).unwrap().count(), 1);
    }
}
