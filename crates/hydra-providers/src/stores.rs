//! Composable provider stores.
//!
//! Every stage implements [`ProviderStore`] and holds only its configured
//! delegates, so any composition is safe to share between heads.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use futures::FutureExt;
use hydra_dht::{ContentRouting, ProviderStore, Result};
use hydra_identity::AddrInfo;
use hydra_metrics::{measures, Metrics, TagSet};
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::finder::{AsyncProvidersFinder, FindOutcome, OnProvider};

/// Accepts everything, stores nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProviderStore;

#[async_trait]
impl ProviderStore for NoopProviderStore {
    async fn add_provider(&self, _key: &[u8], _provider: AddrInfo) -> Result<()> {
        Ok(())
    }

    async fn get_providers(&self, _key: &[u8]) -> Result<Vec<AddrInfo>> {
        Ok(Vec::new())
    }
}

/// Reads from the wrapped store; adds succeed without reaching it.
pub struct AddProviderNotSupported<S> {
    inner: S,
}

impl<S> AddProviderNotSupported<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S: ProviderStore> ProviderStore for AddProviderNotSupported<S> {
    async fn add_provider(&self, _key: &[u8], _provider: AddrInfo) -> Result<()> {
        Ok(())
    }

    async fn get_providers(&self, key: &[u8]) -> Result<Vec<AddrInfo>> {
        self.inner.get_providers(key).await
    }
}

/// Fans out to several stores at once.
///
/// Adds are best effort: failures are logged and never returned. Gets
/// concatenate the successful answers in backend order.
pub struct CombiningProviderStore {
    stores: Vec<Arc<dyn ProviderStore>>,
}

impl CombiningProviderStore {
    pub fn new(stores: Vec<Arc<dyn ProviderStore>>) -> Self {
        Self { stores }
    }
}

#[async_trait]
impl ProviderStore for CombiningProviderStore {
    async fn add_provider(&self, key: &[u8], provider: AddrInfo) -> Result<()> {
        let adds = self
            .stores
            .iter()
            .map(|store| store.add_provider(key, provider.clone()));
        for (idx, result) in join_all(adds).await.into_iter().enumerate() {
            if let Err(e) = result {
                debug!(backend = idx, error = %e, "add_provider failed");
            }
        }
        Ok(())
    }

    async fn get_providers(&self, key: &[u8]) -> Result<Vec<AddrInfo>> {
        let gets = self.stores.iter().map(|store| store.get_providers(key));
        let mut providers = Vec::new();
        for (idx, result) in join_all(gets).await.into_iter().enumerate() {
            match result {
                Ok(found) => providers.extend(found),
                Err(e) => debug!(backend = idx, error = %e, "get_providers failed"),
            }
        }
        Ok(providers)
    }
}

/// Late-bound routing handle.
///
/// The provider chain is built before the heads whose routing clients it
/// needs, so the router is installed once they exist.
#[derive(Clone, Default)]
pub struct RouterSlot {
    router: Arc<RwLock<Option<Arc<dyn ContentRouting>>>>,
}

impl RouterSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, router: Arc<dyn ContentRouting>) {
        *self.router.write() = Some(router);
    }

    pub fn get(&self) -> Option<Arc<dyn ContentRouting>> {
        self.router.read().clone()
    }

    /// Drop the installed router.
    pub fn clear(&self) {
        self.router.write().take();
    }
}

/// Callback that writes discovered providers into `store` under `key`,
/// counting failures instead of returning them.
pub fn cache_writer(store: Arc<dyn ProviderStore>, key: Vec<u8>, metrics: Metrics) -> OnProvider {
    Arc::new(move |provider: AddrInfo| {
        let store = store.clone();
        let key = key.clone();
        let metrics = metrics.clone();
        async move {
            let peer = provider.id.short();
            if let Err(e) = store.add_provider(&key, provider).await {
                warn!(%peer, error = %e, "failed to cache provider");
                metrics.increment(&measures::PROVIDER_CACHE_WRITE_ERRORS, &TagSet::new());
            }
        }
        .boxed()
    })
}

/// Answers from `read`; on an empty answer starts a background lookup whose
/// results land in `write`.
pub struct CachingProviderStore {
    read: Arc<dyn ProviderStore>,
    write: Arc<dyn ProviderStore>,
    finder: AsyncProvidersFinder,
    router: RouterSlot,
    metrics: Metrics,
    ctx: CancellationToken,
}

impl CachingProviderStore {
    pub fn new(
        read: Arc<dyn ProviderStore>,
        write: Arc<dyn ProviderStore>,
        finder: AsyncProvidersFinder,
        router: RouterSlot,
        metrics: Metrics,
        ctx: CancellationToken,
    ) -> Self {
        Self {
            read,
            write,
            finder,
            router,
            metrics,
            ctx,
        }
    }
}

#[async_trait]
impl ProviderStore for CachingProviderStore {
    async fn add_provider(&self, key: &[u8], provider: AddrInfo) -> Result<()> {
        self.write.add_provider(key, provider).await
    }

    async fn get_providers(&self, key: &[u8]) -> Result<Vec<AddrInfo>> {
        let providers = self.read.get_providers(key).await?;
        if providers.is_empty() {
            match self.router.get() {
                Some(router) => {
                    let on_provider = cache_writer(self.write.clone(), key.to_vec(), self.metrics.clone());
                    let outcome = self.finder.find(self.ctx.child_token(), router, key, on_provider);
                    if outcome == FindOutcome::Enqueued {
                        self.metrics
                            .record(&measures::FIND_PROVS_QUEUE_SIZE, 1.0, &TagSet::new());
                    }
                }
                None => debug!("no router installed, skipping provider prefetch"),
            }
        }
        Ok(providers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finder::FinderConfig;
    use crate::testing::{mh, peer, StubRouter};
    use hydra_dht::{Error, ProviderManager};
    use hydra_datastore::MemoryDatastore;
    use std::time::Duration;

    struct Failing;

    #[async_trait]
    impl ProviderStore for Failing {
        async fn add_provider(&self, _key: &[u8], _provider: AddrInfo) -> Result<()> {
            Err(Error::ProviderStore("write refused".into()))
        }

        async fn get_providers(&self, _key: &[u8]) -> Result<Vec<AddrInfo>> {
            Err(Error::ProviderStore("read refused".into()))
        }
    }

    fn memory_store() -> Arc<dyn ProviderStore> {
        Arc::new(ProviderManager::new(Arc::new(MemoryDatastore::new())))
    }

    #[tokio::test]
    async fn noop_and_add_not_supported() {
        let key = mh(b"k");
        assert!(NoopProviderStore.add_provider(&key, peer(1)).await.is_ok());
        assert!(NoopProviderStore.get_providers(&key).await.unwrap().is_empty());

        let store = memory_store();
        store.add_provider(&key, peer(1)).await.unwrap();
        let wrapped = AddProviderNotSupported::new(store.clone());
        wrapped.add_provider(&key, peer(2)).await.unwrap();
        assert_eq!(wrapped.get_providers(&key).await.unwrap(), vec![peer(1)]);
        assert_eq!(store.get_providers(&key).await.unwrap(), vec![peer(1)]);
    }

    #[tokio::test]
    async fn combining_concatenates_in_order_and_skips_errors() {
        let key = mh(b"k");
        let first = memory_store();
        let second = memory_store();
        first.add_provider(&key, peer(1)).await.unwrap();
        second.add_provider(&key, peer(2)).await.unwrap();

        let combined = CombiningProviderStore::new(vec![first.clone(), Arc::new(Failing), second.clone()]);
        assert_eq!(combined.get_providers(&key).await.unwrap(), vec![peer(1), peer(2)]);

        combined.add_provider(&key, peer(3)).await.unwrap();
        assert_eq!(first.get_providers(&key).await.unwrap().len(), 2);
        assert_eq!(second.get_providers(&key).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn caching_prefetches_on_miss() {
        let ctx = CancellationToken::new();
        let metrics = Metrics::with_default_views();
        let finder = AsyncProvidersFinder::new(FinderConfig::default(), metrics.clone());
        finder.run(ctx.clone());
        let router = Arc::new(StubRouter::returning(vec![peer(7)]));
        let slot = RouterSlot::new();
        slot.set(router.clone());

        let cache = memory_store();
        let caching = CachingProviderStore::new(
            cache.clone(),
            cache.clone(),
            finder.clone(),
            slot,
            metrics.clone(),
            ctx.clone(),
        );
        let key = mh(b"miss");
        assert!(caching.get_providers(&key).await.unwrap().is_empty());

        for _ in 0..100 {
            if !cache.get_providers(&key).await.unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(caching.get_providers(&key).await.unwrap(), vec![peer(7)]);
        assert_eq!(router.calls(), 1);
        ctx.cancel();
    }

    #[tokio::test]
    async fn cache_write_failures_are_counted() {
        let metrics = Metrics::with_default_views();
        let writer = cache_writer(Arc::new(Failing), mh(b"k"), metrics.clone());
        writer(peer(1)).await;
        writer(peer(2)).await;
        assert_eq!(
            metrics.value("provider_cache_write_errors", &TagSet::new()),
            Some(2.0)
        );
    }

    #[tokio::test]
    async fn caching_read_errors_surface() {
        let metrics = Metrics::with_default_views();
        let caching = CachingProviderStore::new(
            Arc::new(Failing),
            memory_store(),
            AsyncProvidersFinder::new(FinderConfig::default(), metrics.clone()),
            RouterSlot::new(),
            metrics,
            CancellationToken::new(),
        );
        assert!(caching.get_providers(&mh(b"k")).await.is_err());
    }
}
