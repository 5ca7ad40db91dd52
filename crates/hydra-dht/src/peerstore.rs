//! Known addresses of remote peers.

use std::collections::HashMap;

use hydra_identity::{AddrInfo, Multiaddr, PeerId};
use parking_lot::RwLock;

/// Address book shared by a host and its routing client.
#[derive(Debug, Default)]
pub struct Peerstore {
    addrs: RwLock<HashMap<PeerId, Vec<Multiaddr>>>,
}

impl Peerstore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember addresses for a peer, skipping ones already known.
    pub fn add_addrs(&self, peer: &PeerId, addrs: &[Multiaddr]) {
        let mut book = self.addrs.write();
        let known = book.entry(peer.clone()).or_default();
        for addr in addrs {
            if !known.contains(addr) {
                known.push(*addr);
            }
        }
    }

    pub fn addrs(&self, peer: &PeerId) -> Vec<Multiaddr> {
        self.addrs.read().get(peer).cloned().unwrap_or_default()
    }

    /// The peer with every known address.
    pub fn addr_info(&self, peer: &PeerId) -> AddrInfo {
        AddrInfo::new(peer.clone(), self.addrs(peer))
    }

    pub fn peers(&self) -> Vec<PeerId> {
        self.addrs.read().keys().cloned().collect()
    }

    pub fn remove(&self, peer: &PeerId) {
        self.addrs.write().remove(peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hydra_identity::Keypair;

    #[test]
    fn deduplicates_addresses() {
        let store = Peerstore::new();
        let peer = Keypair::derive(b"seed", 1).unwrap().peer_id();
        let a: Multiaddr = "/ip4/1.2.3.4/tcp/1".parse().unwrap();
        let b: Multiaddr = "/ip4/1.2.3.4/tcp/2".parse().unwrap();
        store.add_addrs(&peer, &[a, b]);
        store.add_addrs(&peer, &[a]);
        assert_eq!(store.addrs(&peer), vec![a, b]);
        assert_eq!(store.peers(), vec![peer.clone()]);
        store.remove(&peer);
        assert!(store.addrs(&peer).is_empty());
    }
}
