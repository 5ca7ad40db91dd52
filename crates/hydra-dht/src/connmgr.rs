//! Connection manager: water marks, grace period and protected peers.
//!
//! When a host holds more than `high_water` connections it closes
//! unprotected ones that are older than the grace period, newest first,
//! until `low_water` remain.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use hydra_identity::PeerId;
use parking_lot::RwLock;

/// Water marks and grace period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnManagerConfig {
    pub low_water: usize,
    pub high_water: usize,
    pub grace_period: Duration,
}

impl Default for ConnManagerConfig {
    fn default() -> Self {
        Self {
            low_water: 1200,
            high_water: 1800,
            grace_period: Duration::from_secs(60),
        }
    }
}

/// A live connection as seen by the trimmer.
#[derive(Debug, Clone)]
pub struct ConnInfo {
    pub peer: PeerId,
    pub opened: Instant,
}

/// Decides which connections to close.
#[derive(Debug, Default)]
pub struct ConnManager {
    config: ConnManagerConfig,
    protected: RwLock<HashSet<PeerId>>,
}

impl ConnManager {
    pub fn new(config: ConnManagerConfig) -> Self {
        Self {
            config,
            protected: RwLock::new(HashSet::new()),
        }
    }

    pub fn config(&self) -> &ConnManagerConfig {
        &self.config
    }

    /// Exempt a peer from trimming.
    pub fn protect(&self, peer: &PeerId) {
        self.protected.write().insert(peer.clone());
    }

    pub fn unprotect(&self, peer: &PeerId) -> bool {
        self.protected.write().remove(peer)
    }

    pub fn is_protected(&self, peer: &PeerId) -> bool {
        self.protected.read().contains(peer)
    }

    /// Peers whose connections should be closed now.
    pub fn select_for_trim(&self, conns: &[ConnInfo], now: Instant) -> Vec<PeerId> {
        if conns.len() <= self.config.high_water {
            return Vec::new();
        }
        let excess = conns.len() - self.config.low_water;
        let protected = self.protected.read();

        let mut candidates: Vec<&ConnInfo> = conns
            .iter()
            .filter(|c| !protected.contains(&c.peer))
            .filter(|c| now.saturating_duration_since(c.opened) >= self.config.grace_period)
            .collect();
        candidates.sort_by(|a, b| b.opened.cmp(&a.opened));
        candidates
            .into_iter()
            .take(excess)
            .map(|c| c.peer.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hydra_identity::Keypair;

    fn conns(n: u32, base: Instant) -> Vec<ConnInfo> {
        (0..n)
            .map(|i| ConnInfo {
                peer: Keypair::derive(b"conn", i + 1).unwrap().peer_id(),
                opened: base + Duration::from_secs(i as u64),
            })
            .collect()
    }

    fn manager(low: usize, high: usize) -> ConnManager {
        ConnManager::new(ConnManagerConfig {
            low_water: low,
            high_water: high,
            grace_period: Duration::from_secs(60),
        })
    }

    #[test]
    fn below_high_water_keeps_everything() {
        let base = Instant::now();
        let mgr = manager(2, 4);
        assert!(mgr.select_for_trim(&conns(4, base), base + Duration::from_secs(600)).is_empty());
    }

    #[test]
    fn trims_down_to_low_water_newest_first() {
        let base = Instant::now();
        let mgr = manager(2, 4);
        let all = conns(6, base);
        let closed = mgr.select_for_trim(&all, base + Duration::from_secs(600));
        assert_eq!(closed, vec![all[5].peer.clone(), all[4].peer.clone(), all[3].peer.clone(), all[2].peer.clone()]);
    }

    #[test]
    fn respects_protection_and_grace() {
        let base = Instant::now();
        let mgr = manager(2, 4);
        let all = conns(6, base);
        mgr.protect(&all[5].peer);
        // Only connections opened at least 60s before `now` are eligible.
        let now = base + Duration::from_secs(63);
        let closed = mgr.select_for_trim(&all, now);
        assert_eq!(closed, vec![all[3].peer.clone(), all[2].peer.clone(), all[1].peer.clone(), all[0].peer.clone()]);
        assert!(mgr.unprotect(&all[5].peer));
        assert!(!mgr.is_protected(&all[5].peer));
    }
}
