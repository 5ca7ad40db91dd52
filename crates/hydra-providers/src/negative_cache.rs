//! Keys whose last lookup found no providers.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// TTL set of keys. Adding a key that is still live keeps its original
/// insertion time.
#[derive(Debug)]
pub struct NegativeCache {
    ttl: Duration,
    entries: Mutex<HashMap<Vec<u8>, Instant>>,
}

impl NegativeCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn add(&self, key: &[u8]) {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(inserted) if now.duration_since(*inserted) < self.ttl => {}
            _ => {
                entries.insert(key.to_vec(), now);
            }
        }
    }

    pub fn has(&self, key: &[u8]) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(inserted) if now.duration_since(*inserted) < self.ttl => true,
            Some(_) => {
                entries.remove(key);
                false
            }
            None => false,
        }
    }

    /// Live entries. Expired ones are purged.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, inserted| now.duration_since(*inserted) < self.ttl);
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
