//! In-memory datastore.

use std::collections::BTreeMap;
use std::ops::Bound;

use parking_lot::RwLock;

use crate::{Batch, BatchOp, Datastore, Entry, Error, Key, Query, QueryResults, Result};

/// Ordered in-memory store. Queries iterate a snapshot taken when the query
/// starts.
#[derive(Debug, Default)]
pub struct MemoryDatastore {
    entries: RwLock<BTreeMap<Key, Vec<u8>>>,
}

impl MemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Datastore for MemoryDatastore {
    fn get(&self, key: &Key) -> Result<Vec<u8>> {
        self.entries
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    fn has(&self, key: &Key) -> Result<bool> {
        Ok(self.entries.read().contains_key(key))
    }

    fn get_size(&self, key: &Key) -> Result<usize> {
        self.entries
            .read()
            .get(key)
            .map(Vec::len)
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    fn put(&self, key: &Key, value: Vec<u8>) -> Result<()> {
        self.entries.write().insert(key.clone(), value);
        Ok(())
    }

    fn delete(&self, key: &Key) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn query(&self, query: &Query) -> Result<QueryResults> {
        let entries = self.entries.read();
        // Descendants are contiguous from the bound onwards.
        let start = Bound::Excluded(query.prefix.descendant_bound());
        let matched: Vec<Result<Entry>> = entries
            .range((start, Bound::Unbounded))
            .take_while(|(key, _)| query.matches(key))
            .map(|(key, value)| {
                Ok(Entry {
                    key: key.clone(),
                    value: if query.keys_only {
                        Vec::new()
                    } else {
                        value.clone()
                    },
                    size: value.len(),
                })
            })
            .collect();
        Ok(Box::new(matched.into_iter()))
    }

    fn commit(&self, batch: Batch) -> Result<()> {
        let mut entries = self.entries.write();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put(key, value) => {
                    entries.insert(key, value);
                }
                BatchOp::Delete(key) => {
                    entries.remove(&key);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(results: QueryResults) -> Vec<String> {
        results.map(|e| e.unwrap().key.to_string()).collect()
    }

    #[test]
    fn get_put_delete() {
        let ds = MemoryDatastore::new();
        let key = Key::new("/a/b");
        assert!(matches!(ds.get(&key), Err(Error::NotFound(_))));
        ds.put(&key, b"value".to_vec()).unwrap();
        assert_eq!(ds.get(&key).unwrap(), b"value");
        assert_eq!(ds.get_size(&key).unwrap(), 5);
        assert!(ds.has(&key).unwrap());
        ds.delete(&key).unwrap();
        ds.delete(&key).unwrap();
        assert!(!ds.has(&key).unwrap());
    }

    #[test]
    fn query_selects_descendants_only() {
        let ds = MemoryDatastore::new();
        for k in ["/providers", "/providers/a/1", "/providers/b/1", "/providersx/1", "/pk/x"] {
            ds.put(&Key::new(k), vec![1]).unwrap();
        }
        assert_eq!(
            keys(ds.query(&Query::prefix("/providers")).unwrap()),
            vec!["/providers/a/1", "/providers/b/1"]
        );
        assert_eq!(ds.query(&Query::prefix("/")).unwrap().count(), 5);
    }

    #[test]
    fn query_skips_siblings_sorting_inside_the_range() {
        let ds = MemoryDatastore::new();
        // '-' and '.' sort before '/', 'z' after it.
        for k in ["/a-b/1", "/a.c/1", "/a/1", "/a/2", "/az/1", "/b/1"] {
            ds.put(&Key::new(k), vec![1]).unwrap();
        }
        assert_eq!(keys(ds.query(&Query::prefix("/a")).unwrap()), vec!["/a/1", "/a/2"]);
        assert_eq!(keys(ds.query(&Query::prefix("/az")).unwrap()), vec!["/az/1"]);
        assert!(keys(ds.query(&Query::prefix("/c")).unwrap()).is_empty());
    }

    #[test]
    fn keys_only_keeps_size() {
        let ds = MemoryDatastore::new();
        ds.put(&Key::new("/a/b"), vec![1, 2, 3]).unwrap();
        let entry = ds
            .query(&Query::prefix("/a").keys_only())
            .unwrap()
            .next()
            .unwrap()
            .unwrap();
        assert!(entry.value.is_empty());
        assert_eq!(entry.size, 3);
    }

    #[test]
    fn batch_applies_in_order() {
        let ds = MemoryDatastore::new();
        let mut batch = Batch::new();
        batch.put(Key::new("/a"), vec![1]);
        batch.put(Key::new("/b"), vec![2]);
        batch.delete(Key::new("/a"));
        ds.commit(batch).unwrap();
        assert!(!ds.has(&Key::new("/a")).unwrap());
        assert!(ds.has(&Key::new("/b")).unwrap());
    }

    #[test]
    fn count_prefix_scans_without_estimate() {
        let ds = MemoryDatastore::new();
        for i in 0..5 {
            ds.put(&Key::new(format!("/providers/k{i}/p")), vec![]).unwrap();
        }
        ds.put(&Key::new("/other/x"), vec![]).unwrap();
        assert_eq!(crate::count_prefix(&ds, &Key::new("/providers")).unwrap(), 5);
    }
}
