//! Shortlist bookkeeping for iterative lookups.
//!
//! Candidates are kept ordered by XOR distance to the target. Each round
//! takes up to `alpha` unqueried peers from the `k` closest. The lookup is
//! over when every one of the `k` closest candidates has been queried.

use std::collections::{BTreeMap, HashSet};

use hydra_identity::{AddrInfo, DhtId, PeerId};

pub(crate) struct Shortlist {
    target: DhtId,
    k: usize,
    local: PeerId,
    filter_private: bool,
    candidates: BTreeMap<[u8; 32], AddrInfo>,
    queried: HashSet<PeerId>,
    responded: BTreeMap<[u8; 32], AddrInfo>,
}

impl Shortlist {
    pub(crate) fn new(target: DhtId, k: usize, local: PeerId, filter_private: bool) -> Self {
        Self {
            target,
            k: k.max(1),
            local,
            filter_private,
            candidates: BTreeMap::new(),
            queried: HashSet::new(),
            responded: BTreeMap::new(),
        }
    }

    pub(crate) fn target(&self) -> &DhtId {
        &self.target
    }

    /// Add peers returned by the routing table or a remote. Returns how many
    /// were new.
    pub(crate) fn extend(&mut self, peers: impl IntoIterator<Item = AddrInfo>) -> usize {
        let mut added = 0;
        for peer in peers {
            if peer.id == self.local || peer.addrs.is_empty() {
                continue;
            }
            if self.filter_private && peer.is_private_only() {
                continue;
            }
            let distance = self.target.distance(&peer.id.dht_id());
            if let std::collections::btree_map::Entry::Vacant(slot) = self.candidates.entry(distance) {
                slot.insert(peer);
                added += 1;
            }
        }
        added
    }

    /// Next peers to query, marked as queried. Empty when the lookup is done.
    pub(crate) fn next_round(&mut self, alpha: usize) -> Vec<AddrInfo> {
        let round: Vec<AddrInfo> = self
            .candidates
            .values()
            .take(self.k)
            .filter(|p| !self.queried.contains(&p.id))
            .take(alpha)
            .cloned()
            .collect();
        for peer in &round {
            self.queried.insert(peer.id.clone());
        }
        round
    }

    pub(crate) fn mark_responded(&mut self, peer: AddrInfo) {
        let distance = self.target.distance(&peer.id.dht_id());
        self.responded.insert(distance, peer);
    }

    /// Drop a peer that failed so it no longer holds a slot among the closest.
    pub(crate) fn mark_failed(&mut self, peer: &PeerId) {
        let distance = self.target.distance(&peer.dht_id());
        self.candidates.remove(&distance);
    }

    /// The `k` closest peers that answered.
    pub(crate) fn closest(&self) -> Vec<AddrInfo> {
        self.responded.values().take(self.k).cloned().collect()
    }
}
