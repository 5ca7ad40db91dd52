//! Datastore query hook that prefetches providers on a local miss.
//!
//! Only queries for one content key (`/providers/<b32(mh)>`, or deeper) are
//! watched. The results pass through untouched; when the stream is
//! exhausted the proxy records `local` if anything was yielded, otherwise
//! it hands the key to the finder. The GC sweep queries the bare
//! `/providers` namespace and is never watched.

use std::sync::Arc;

use hydra_datastore::{AfterQuery, Entry, Query, QueryResults};
use hydra_dht::{ProviderStore, PROVIDERS_NAMESPACE};
use hydra_metrics::{measures, Metrics, Status, TagSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::finder::{AsyncProvidersFinder, FindOutcome};
use crate::keys::provider_key_to_cid;
use crate::stores::{cache_writer, RouterSlot};

/// Query proxy state shared by every watched query.
#[derive(Clone)]
pub struct QueryProxy {
    finder: AsyncProvidersFinder,
    router: RouterSlot,
    /// Receives the providers a prefetch discovers.
    cache: Arc<dyn ProviderStore>,
    metrics: Metrics,
    ctx: CancellationToken,
}

impl QueryProxy {
    pub fn new(
        finder: AsyncProvidersFinder,
        router: RouterSlot,
        cache: Arc<dyn ProviderStore>,
        metrics: Metrics,
        ctx: CancellationToken,
    ) -> Self {
        Self {
            finder,
            router,
            cache,
            metrics,
            ctx,
        }
    }

    /// Whether a query targets a specific content key.
    pub fn watches(query: &Query) -> bool {
        let segments = query.prefix.namespaces();
        segments.len() >= 2 && segments[0] == PROVIDERS_NAMESPACE.trim_start_matches('/')
    }

    /// The hook to install with `HookedDatastore::set_after_query`.
    pub fn into_hook(self) -> AfterQuery {
        Arc::new(move |query: &Query, results: QueryResults| -> QueryResults {
            if !Self::watches(query) {
                return results;
            }
            let proxy = self.clone();
            let query = query.clone();
            Box::new(Watched {
                inner: results,
                count: 0,
                on_end: Some(Box::new(move |count: usize| proxy.on_end(&query, count))),
            })
        })
    }

    fn on_end(&self, query: &Query, count: usize) {
        if count > 0 {
            self.metrics
                .increment(&measures::FIND_PROVS, &TagSet::status(Status::Local));
            return;
        }
        let cid = match provider_key_to_cid(&query.prefix) {
            Ok(cid) => cid,
            Err(e) => {
                debug!(error = %e, "skipping prefetch for undecodable key");
                return;
            }
        };
        let Some(router) = self.router.get() else {
            debug!(%cid, "no router installed, skipping prefetch");
            return;
        };
        let key = cid.hash().to_bytes();
        let on_provider = cache_writer(self.cache.clone(), key.clone(), self.metrics.clone());
        let outcome = self.finder.find(self.ctx.child_token(), router, &key, on_provider);
        if outcome == FindOutcome::Enqueued {
            self.metrics
                .record(&measures::FIND_PROVS_QUEUE_SIZE, 1.0, &TagSet::new());
        }
        trace!(%cid, ?outcome, "local provider miss");
    }
}

type OnEnd = Box<dyn FnOnce(usize) + Send>;

/// Counts results and fires `on_end` once the wrapped stream is exhausted.
struct Watched {
    inner: QueryResults,
    count: usize,
    on_end: Option<OnEnd>,
}

impl Iterator for Watched {
    type Item = hydra_datastore::Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.next() {
            Some(item) => {
                self.count += 1;
                Some(item)
            }
            None => {
                if let Some(on_end) = self.on_end.take() {
                    on_end(self.count);
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finder::FinderConfig;
    use crate::testing::{peer, StubRouter};
    use data_encoding::BASE32_NOPAD;
    use hydra_datastore::{Datastore, HookedDatastore, Hooks, Key, MemoryDatastore, SharedDatastore};
    use hydra_dht::ProviderManager;
    use hydra_identity::Cid;
    use std::time::Duration;

    struct Fixture {
        store: Arc<HookedDatastore>,
        providers: Arc<ProviderManager>,
        router: Arc<StubRouter>,
        finder: AsyncProvidersFinder,
        metrics: Metrics,
        ctx: CancellationToken,
    }

    fn fixture(router: StubRouter) -> Fixture {
        let ctx = CancellationToken::new();
        let metrics = Metrics::with_default_views();
        let store = Arc::new(HookedDatastore::new(
            Arc::new(MemoryDatastore::new()),
            Hooks::default(),
        ));
        let shared: SharedDatastore = store.clone();
        let providers = Arc::new(ProviderManager::new(shared));
        let finder = AsyncProvidersFinder::new(FinderConfig::default(), metrics.clone());
        finder.run(ctx.clone());
        let router = Arc::new(router);
        let slot = RouterSlot::new();
        slot.set(router.clone());
        let proxy = QueryProxy::new(finder.clone(), slot, providers.clone(), metrics.clone(), ctx.clone());
        store.set_after_query(proxy.into_hook());
        Fixture {
            store,
            providers,
            router,
            finder,
            metrics,
            ctx,
        }
    }

    fn example_cid() -> Cid {
        Cid::try_from("QmbWqxBEKC3P8tqsKc98xmWNzrzDtRLMiMPL8wBuTGsMnR").unwrap()
    }

    fn prefix_for(cid: &Cid) -> Key {
        Key::new(format!("/providers/{}", BASE32_NOPAD.encode(&cid.hash().to_bytes())))
    }

    fn count(metrics: &Metrics, status: Status) -> f64 {
        metrics.value("find_provs", &TagSet::status(status)).unwrap_or(0.0)
    }

    #[tokio::test]
    async fn local_hit_is_reported_and_not_prefetched() {
        let f = fixture(StubRouter::returning(vec![peer(1)]));
        let prefix = prefix_for(&example_cid());
        f.store.put(&prefix.child("x"), b"v".to_vec()).unwrap();

        let results: Vec<_> = f.store.query(&Query::prefix(prefix)).unwrap().collect();
        assert_eq!(results.len(), 1);
        assert_eq!(count(&f.metrics, Status::Local), 1.0);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(f.router.calls(), 0);
        f.ctx.cancel();
    }

    #[tokio::test]
    async fn network_hit_lands_in_the_store() {
        let f = fixture(StubRouter::returning(vec![peer(1)]));
        let cid = example_cid();
        let mut results = f.store.query(&Query::prefix(prefix_for(&cid))).unwrap();
        assert!(results.next().is_none());

        let key = cid.hash().to_bytes();
        let mut cached = Vec::new();
        for _ in 0..100 {
            cached = f.providers.get_providers(&key).await.unwrap();
            if !cached.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(cached, vec![peer(1)]);
        assert_eq!(f.router.cids()[0].hash(), cid.hash());
        f.ctx.cancel();
    }

    #[tokio::test]
    async fn network_miss_is_cached() {
        let f = fixture(StubRouter::empty());
        let cid = example_cid();
        let key = cid.hash().to_bytes();
        let query = Query::prefix(prefix_for(&cid));
        assert_eq!(f.store.query(&query).unwrap().count(), 0);

        for _ in 0..100 {
            if f.finder.negative_cache().has(&key) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(f.finder.negative_cache().has(&key));
        for _ in 0..100 {
            if !f.finder.is_pending(&key) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(f.store.query(&query).unwrap().count(), 0);
        assert_eq!(count(&f.metrics, Status::FailedCached), 1.0);
        assert_eq!(f.router.calls(), 1);
        f.ctx.cancel();
    }

    #[tokio::test]
    async fn other_namespaces_and_the_bare_namespace_pass_through() {
        let f = fixture(StubRouter::empty());
        assert_eq!(f.store.query(&Query::prefix("/notproviders")).unwrap().count(), 0);
        assert_eq!(f.store.query(&Query::prefix("/providers")).unwrap().count(), 0);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(f.router.calls(), 0);
        assert_eq!(f.finder.pending_count(), 0);
        assert_eq!(count(&f.metrics, Status::Local), 0.0);
        f.ctx.cancel();
    }

    #[tokio::test]
    async fn undecodable_keys_are_skipped() {
        let f = fixture(StubRouter::empty());
        assert_eq!(f.store.query(&Query::prefix("/providers/!!!")).unwrap().count(), 0);
        assert_eq!(f.router.calls(), 0);
        f.ctx.cancel();
    }

    #[test]
    fn watch_gate() {
        assert!(!QueryProxy::watches(&Query::prefix("/providers")));
        assert!(QueryProxy::watches(&Query::prefix("/providers/ABC")));
        assert!(QueryProxy::watches(&Query::prefix("/providers/ABC/DEF")));
        assert!(!QueryProxy::watches(&Query::prefix("/notproviders/ABC")));
    }
}
