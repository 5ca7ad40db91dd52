//! Kademlia routing table with 256 k-buckets.

use std::time::Instant;

use hydra_identity::{AddrInfo, DhtId, PeerId};

const BUCKETS: usize = 256;

#[derive(Debug, Clone)]
struct BucketEntry {
    info: AddrInfo,
    id: DhtId,
    last_seen: Instant,
}

/// Peers indexed by how many leading bits their DHT-ID shares with ours.
#[derive(Debug)]
pub struct RoutingTable {
    local: DhtId,
    bucket_size: usize,
    filter_private: bool,
    buckets: Vec<Vec<BucketEntry>>,
}

impl RoutingTable {
    /// Create a table. With `filter_private`, peers reachable only on
    /// private addresses are refused.
    pub fn new(local: DhtId, bucket_size: usize, filter_private: bool) -> Self {
        Self {
            local,
            bucket_size,
            filter_private,
            buckets: vec![Vec::new(); BUCKETS],
        }
    }

    fn bucket_index(&self, id: &DhtId) -> usize {
        self.local.common_prefix_len(id).min(BUCKETS - 1)
    }

    /// Whether the query and routing filters accept this peer.
    pub fn accepts(&self, info: &AddrInfo) -> bool {
        !(self.filter_private && info.is_private_only())
    }

    /// Add or refresh a peer. Returns false when refused or its bucket is
    /// full.
    pub fn try_add(&mut self, info: AddrInfo) -> bool {
        let id = info.id.dht_id();
        if id == self.local || !self.accepts(&info) {
            return false;
        }
        let idx = self.bucket_index(&id);
        let bucket_size = self.bucket_size;
        let bucket = &mut self.buckets[idx];

        if let Some(pos) = bucket.iter().position(|e| e.info.id == info.id) {
            let mut entry = bucket.remove(pos);
            entry.info = info;
            entry.last_seen = Instant::now();
            bucket.push(entry);
            return true;
        }
        if bucket.len() >= bucket_size {
            return false;
        }
        bucket.push(BucketEntry {
            info,
            id,
            last_seen: Instant::now(),
        });
        true
    }

    pub fn remove(&mut self, peer: &PeerId) -> bool {
        let idx = self.bucket_index(&peer.dht_id());
        let bucket = &mut self.buckets[idx];
        match bucket.iter().position(|e| &e.info.id == peer) {
            Some(pos) => {
                bucket.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        let idx = self.bucket_index(&peer.dht_id());
        self.buckets[idx].iter().any(|e| &e.info.id == peer)
    }

    /// Up to `count` peers closest to `target`, nearest first.
    pub fn nearest(&self, target: &DhtId, count: usize) -> Vec<AddrInfo> {
        let mut all: Vec<&BucketEntry> = self.buckets.iter().flatten().collect();
        all.sort_by_key(|e| e.id.distance(target));
        all.into_iter().take(count).map(|e| e.info.clone()).collect()
    }

    pub fn size(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    pub fn peers(&self) -> Vec<PeerId> {
        self.buckets
            .iter()
            .flatten()
            .map(|e| e.info.id.clone())
            .collect()
    }

    /// When a peer was last added or refreshed.
    pub fn last_seen(&self, peer: &PeerId) -> Option<Instant> {
        let idx = self.bucket_index(&peer.dht_id());
        self.buckets[idx]
            .iter()
            .find(|e| &e.info.id == peer)
            .map(|e| e.last_seen)
    }
}
