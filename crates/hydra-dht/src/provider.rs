//! Provider records and the default in-datastore provider store.
//!
//! Records live at `/providers/<b32(multihash)>/<b32(peer-id)>`, base32
//! without padding, with a JSON value holding the provider's addresses and
//! the time the record was received. Records older than the provide
//! validity are ignored on read and removed by a periodic sweep.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use data_encoding::BASE32_NOPAD;
use hydra_datastore::{Batch, Datastore, Key, Query, SharedDatastore};
use hydra_identity::{AddrInfo, Multiaddr, PeerId};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Namespace holding every provider record.
pub const PROVIDERS_NAMESPACE: &str = "/providers";

/// How long a provider record stays valid.
pub const PROVIDE_VALIDITY: Duration = Duration::from_secs(48 * 60 * 60);

/// Interval between expired-record sweeps.
pub const PROVIDER_GC_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Stores and answers provider records. `key` is the content multihash.
#[async_trait]
pub trait ProviderStore: Send + Sync {
    async fn add_provider(&self, key: &[u8], provider: AddrInfo) -> Result<()>;

    async fn get_providers(&self, key: &[u8]) -> Result<Vec<AddrInfo>>;
}

#[async_trait]
impl<T: ProviderStore + ?Sized> ProviderStore for Arc<T> {
    async fn add_provider(&self, key: &[u8], provider: AddrInfo) -> Result<()> {
        (**self).add_provider(key, provider).await
    }

    async fn get_providers(&self, key: &[u8]) -> Result<Vec<AddrInfo>> {
        (**self).get_providers(key).await
    }
}

/// `/providers/<b32(key)>`
pub fn providers_prefix(key: &[u8]) -> Key {
    Key::new(format!("{}/{}", PROVIDERS_NAMESPACE, BASE32_NOPAD.encode(key)))
}

/// `/providers/<b32(key)>/<b32(peer)>`
pub fn provider_record_key(key: &[u8], peer: &PeerId) -> Key {
    providers_prefix(key).child(BASE32_NOPAD.encode(peer.as_bytes()))
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredProvider {
    addrs: Vec<Multiaddr>,
    /// Milliseconds since the Unix epoch.
    received_at: u64,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Provider store backed by the shared datastore.
pub struct ProviderManager {
    store: SharedDatastore,
    validity: Duration,
}

impl ProviderManager {
    pub fn new(store: SharedDatastore) -> Self {
        Self::with_validity(store, PROVIDE_VALIDITY)
    }

    pub fn with_validity(store: SharedDatastore, validity: Duration) -> Self {
        Self { store, validity }
    }

    fn expired(&self, record: &StoredProvider, now: u64) -> bool {
        now.saturating_sub(record.received_at) >= self.validity.as_millis() as u64
    }

    /// Remove every expired record. Returns how many were removed.
    pub fn collect_garbage(&self) -> Result<usize> {
        let now = now_millis();
        let mut batch = Batch::new();
        for entry in self.store.query(&Query::prefix(PROVIDERS_NAMESPACE))? {
            let entry = entry?;
            let stale = match serde_json::from_slice::<StoredProvider>(&entry.value) {
                Ok(record) => self.expired(&record, now),
                Err(_) => true,
            };
            if stale {
                batch.delete(entry.key);
            }
        }
        let removed = batch.len();
        if removed > 0 {
            self.store.commit(batch)?;
        }
        Ok(removed)
    }

    /// Sweep expired records every `interval` until `ctx` is cancelled.
    pub fn spawn_gc(self: Arc<Self>, interval: Duration, ctx: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = ctx.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                match self.collect_garbage() {
                    Ok(0) => {}
                    Ok(removed) => info!(removed, "removed expired provider records"),
                    Err(e) => warn!(error = %e, "provider record gc failed"),
                }
            }
        })
    }
}

fn decode_peer(segment: &str) -> Result<PeerId> {
    let bytes = BASE32_NOPAD
        .decode(segment.as_bytes())
        .map_err(|e| Error::ProviderStore(format!("bad peer segment: {e}")))?;
    Ok(PeerId::from_bytes(&bytes)?)
}

#[async_trait]
impl ProviderStore for ProviderManager {
    async fn add_provider(&self, key: &[u8], provider: AddrInfo) -> Result<()> {
        let record = StoredProvider {
            addrs: provider.addrs,
            received_at: now_millis(),
        };
        let record_key = provider_record_key(key, &provider.id);
        self.store.put(&record_key, serde_json::to_vec(&record)?)?;
        debug!(key = %record_key, "stored provider record");
        Ok(())
    }

    async fn get_providers(&self, key: &[u8]) -> Result<Vec<AddrInfo>> {
        let now = now_millis();
        let mut providers = Vec::new();
        for entry in self.store.query(&Query::prefix(providers_prefix(key)))? {
            let entry = entry?;
            let record: StoredProvider = match serde_json::from_slice(&entry.value) {
                Ok(record) => record,
                Err(e) => {
                    debug!(key = %entry.key, error = %e, "skipping undecodable provider record");
                    continue;
                }
            };
            if self.expired(&record, now) {
                continue;
            }
            match decode_peer(entry.key.name()) {
                Ok(id) => providers.push(AddrInfo::new(id, record.addrs)),
                Err(e) => debug!(key = %entry.key, error = %e, "skipping provider record"),
            }
        }
        Ok(providers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hydra_datastore::MemoryDatastore;
    use hydra_identity::Keypair;

    const MH: &[u8] = &[0x12, 0x20, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27, 28, 29, 30, 31, 32];

    fn provider(i: u32) -> AddrInfo {
        AddrInfo::new(
            Keypair::derive(b"provider", i).unwrap().peer_id(),
            vec!["/ip4/127.0.0.1/tcp/5001".parse().unwrap()],
        )
    }

    #[test]
    fn record_key_layout() {
        let p = provider(1);
        let key = provider_record_key(MH, &p.id);
        let segments = key.namespaces();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0], "providers");
        assert_eq!(BASE32_NOPAD.decode(segments[1].as_bytes()).unwrap(), MH);
        assert_eq!(decode_peer(segments[2]).unwrap(), p.id);
    }

    #[tokio::test]
    async fn add_then_get() {
        let store: SharedDatastore = Arc::new(MemoryDatastore::new());
        let pm = ProviderManager::new(store.clone());
        pm.add_provider(MH, provider(1)).await.unwrap();
        pm.add_provider(MH, provider(2)).await.unwrap();
        pm.add_provider(&[0x12, 0x01, 0xff], provider(3)).await.unwrap();

        let mut found = pm.get_providers(MH).await.unwrap();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        let mut expected = vec![provider(1), provider(2)];
        expected.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(found, expected);
    }

    #[tokio::test]
    async fn expired_records_are_hidden_and_collected() {
        let store: SharedDatastore = Arc::new(MemoryDatastore::new());
        let pm = ProviderManager::with_validity(store.clone(), Duration::ZERO);
        pm.add_provider(MH, provider(1)).await.unwrap();
        assert!(pm.get_providers(MH).await.unwrap().is_empty());
        store.put(&Key::new("/providers/junk/x"), b"not json".to_vec()).unwrap();

        assert_eq!(pm.collect_garbage().unwrap(), 2);
        assert_eq!(store.query(&Query::prefix(PROVIDERS_NAMESPACE)).unwrap().count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn gc_task_sweeps_periodically() {
        let store: SharedDatastore = Arc::new(MemoryDatastore::new());
        let pm = Arc::new(ProviderManager::with_validity(store.clone(), Duration::ZERO));
        pm.add_provider(MH, provider(1)).await.unwrap();

        let ctx = CancellationToken::new();
        let handle = pm.clone().spawn_gc(Duration::from_secs(60), ctx.clone());
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(store.query(&Query::prefix(PROVIDERS_NAMESPACE)).unwrap().count(), 0);
        ctx.cancel();
        handle.await.unwrap();
    }
}
