//! Bounded, deduplicating provider prefetcher.
//!
//! [`AsyncProvidersFinder::find`] never waits: a key already pending, a key
//! in the negative cache, or a full queue all return at once with a
//! [`FindOutcome`] and a `find_provs` data point. Accepted keys are looked up
//! by a fixed pool of workers reading one shared queue.
//!
//! Each lookup runs under a child of the caller's token and the configured
//! timeout. A lookup that streams at least one provider records
//! `succeeded`; one that ends empty records `failed` and puts the key in
//! the negative cache. Cancelled lookups record nothing.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use hydra_dht::ContentRouting;
use hydra_identity::{cid_from_multihash_bytes, AddrInfo};
use hydra_metrics::{measures, Metrics, Status, TagSet};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::negative_cache::NegativeCache;

/// Interval between finder gauge updates.
pub const FINDER_METRICS_INTERVAL: Duration = Duration::from_secs(10);

/// Called for every provider a lookup streams.
pub type OnProvider = Arc<dyn Fn(AddrInfo) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinderConfig {
    pub timeout: Duration,
    pub queue_size: usize,
    pub negative_ttl: Duration,
    pub worker_count: usize,
}

impl Default for FinderConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            queue_size: 1000,
            negative_ttl: Duration::from_secs(60),
            worker_count: 1,
        }
    }
}

/// What [`AsyncProvidersFinder::find`] did with a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindOutcome {
    Enqueued,
    /// Already queued or in flight.
    Pending,
    /// Looked up recently without result.
    NegativelyCached,
    /// Dropped because the queue is at capacity.
    QueueFull,
}

struct WorkItem {
    ctx: CancellationToken,
    router: Arc<dyn ContentRouting>,
    key: Vec<u8>,
    on_provider: OnProvider,
}

struct FinderInner {
    config: FinderConfig,
    metrics: Metrics,
    tx: mpsc::Sender<WorkItem>,
    rx: tokio::sync::Mutex<mpsc::Receiver<WorkItem>>,
    pending: Mutex<HashSet<Vec<u8>>>,
    negative: NegativeCache,
}

/// Shared handle to the finder.
#[derive(Clone)]
pub struct AsyncProvidersFinder {
    inner: Arc<FinderInner>,
}

impl AsyncProvidersFinder {
    pub fn new(config: FinderConfig, metrics: Metrics) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_size.max(1));
        Self {
            inner: Arc::new(FinderInner {
                config,
                metrics,
                tx,
                rx: tokio::sync::Mutex::new(rx),
                pending: Mutex::new(HashSet::new()),
                negative: NegativeCache::new(config.negative_ttl),
            }),
        }
    }

    pub fn config(&self) -> &FinderConfig {
        &self.inner.config
    }

    /// Start the workers and the gauge reporter. They stop when `ctx` is
    /// cancelled.
    pub fn run(&self, ctx: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles: Vec<JoinHandle<()>> = (0..self.inner.config.worker_count.max(1))
            .map(|worker| tokio::spawn(worker_loop(self.inner.clone(), ctx.clone(), worker)))
            .collect();
        handles.push(tokio::spawn(gauge_loop(self.inner.clone(), ctx)));
        handles
    }

    /// Queue a provider lookup for the multihash `key` without waiting.
    pub fn find(
        &self,
        ctx: CancellationToken,
        router: Arc<dyn ContentRouting>,
        key: &[u8],
        on_provider: OnProvider,
    ) -> FindOutcome {
        let inner = &self.inner;
        let outcome = {
            let mut pending = inner.pending.lock();
            if pending.contains(key) {
                FindOutcome::Pending
            } else if inner.negative.has(key) {
                FindOutcome::NegativelyCached
            } else {
                let item = WorkItem {
                    ctx,
                    router,
                    key: key.to_vec(),
                    on_provider,
                };
                match inner.tx.try_send(item) {
                    Ok(()) => {
                        pending.insert(key.to_vec());
                        FindOutcome::Enqueued
                    }
                    Err(_) => FindOutcome::QueueFull,
                }
            }
        };

        match outcome {
            FindOutcome::Enqueued => {}
            FindOutcome::Pending | FindOutcome::QueueFull => {
                inner.metrics.increment(&measures::FIND_PROVS, &TagSet::status(Status::Discarded));
            }
            FindOutcome::NegativelyCached => {
                inner.metrics.increment(&measures::FIND_PROVS, &TagSet::status(Status::FailedCached));
            }
        }
        trace!(?outcome, "find providers");
        outcome
    }

    pub fn is_pending(&self, key: &[u8]) -> bool {
        self.inner.pending.lock().contains(key)
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    pub fn negative_cache(&self) -> &NegativeCache {
        &self.inner.negative
    }
}

async fn worker_loop(inner: Arc<FinderInner>, ctx: CancellationToken, worker: usize) {
    debug!(worker, "finder worker started");
    loop {
        let item = {
            let mut rx = inner.rx.lock().await;
            tokio::select! {
                _ = ctx.cancelled() => break,
                item = rx.recv() => match item {
                    Some(item) => item,
                    None => break,
                },
            }
        };
        inner.metrics.record(&measures::FIND_PROVS_QUEUE_SIZE, -1.0, &TagSet::new());

        let key = item.key.clone();
        let started = Instant::now();
        let result = inner.lookup(&ctx, item).await;
        let elapsed = started.elapsed().as_secs_f64();

        match result {
            Ok(0) => {
                inner.negative.add(&key);
                inner
                    .metrics
                    .increment(&measures::FIND_PROVS, &TagSet::status(Status::Failed));
                inner
                    .metrics
                    .record(&measures::FIND_PROVS_DURATION, elapsed, &TagSet::status(Status::Failed));
            }
            Ok(found) => {
                trace!(found, "prefetched providers");
                inner
                    .metrics
                    .increment(&measures::FIND_PROVS, &TagSet::status(Status::Succeeded));
                inner
                    .metrics
                    .record(&measures::FIND_PROVS_DURATION, elapsed, &TagSet::status(Status::Succeeded));
            }
            Err(e) => debug!(error = %e, "provider lookup abandoned"),
        }
        inner.pending.lock().remove(&key);
    }
    debug!(worker, "finder worker stopped");
}

impl FinderInner {
    /// Stream providers for one item. Returns how many were seen.
    async fn lookup(&self, finder_ctx: &CancellationToken, item: WorkItem) -> Result<usize> {
        let cid = cid_from_multihash_bytes(&item.key)?;
        let lookup = item.ctx.child_token();
        let mut providers = item.router.find_providers_async(lookup.clone(), cid, 1);
        let deadline = Instant::now() + self.config.timeout;

        let mut found = 0;
        let result = loop {
            tokio::select! {
                _ = finder_ctx.cancelled() => break Err(Error::Cancelled),
                _ = lookup.cancelled() => break Err(Error::Cancelled),
                _ = tokio::time::sleep_until(deadline) => break Ok(found),
                next = providers.recv() => match next {
                    Some(provider) => {
                        found += 1;
                        (item.on_provider)(provider).await;
                    }
                    None => break Ok(found),
                },
            }
        };
        lookup.cancel();
        result
    }
}

async fn gauge_loop(inner: Arc<FinderInner>, ctx: CancellationToken) {
    let mut ticker = tokio::time::interval_at(Instant::now() + FINDER_METRICS_INTERVAL, FINDER_METRICS_INTERVAL);
    loop {
        tokio::select! {
            _ = ctx.cancelled() => return,
            _ = ticker.tick() => {}
        }
        let none = TagSet::new();
        let pending = inner.pending.lock().len();
        inner.metrics.record(&measures::PREFETCHES_PENDING, pending as f64, &none);
        inner
            .metrics
            .record(&measures::PREFETCH_NEGATIVE_CACHE_SIZE, inner.negative.len() as f64, &none);
        inner.metrics.record(
            &measures::PREFETCH_NEGATIVE_CACHE_TTL,
            inner.negative.ttl().as_secs_f64(),
            &none,
        );
        inner
            .metrics
            .record(&measures::PREFETCH_PENDING_LIMIT, inner.config.queue_size as f64, &none);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{mh, peer, StubRouter};
    use hydra_metrics::AggregationData;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn metrics() -> Metrics {
        Metrics::with_default_views()
    }

    fn counting() -> (OnProvider, Arc<AtomicUsize>) {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let on_provider: OnProvider = Arc::new(move |_: AddrInfo| {
            counter.fetch_add(1, Ordering::SeqCst);
            async {}.boxed()
        });
        (on_provider, seen)
    }

    fn status(metrics: &Metrics, status: Status) -> f64 {
        metrics.value("find_provs", &TagSet::status(status)).unwrap_or(0.0)
    }

    async fn settle(finder: &AsyncProvidersFinder, key: &[u8]) {
        for _ in 0..1000 {
            if !finder.is_pending(key) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("lookup never finished");
    }

    #[tokio::test]
    async fn concurrent_finds_share_one_lookup() {
        let metrics = metrics();
        let finder = AsyncProvidersFinder::new(FinderConfig::default(), metrics.clone());
        let router = Arc::new(StubRouter::holding(vec![peer(1)]));
        let key = mh(b"dedup");
        let (on_provider, seen) = counting();

        let first = finder.find(CancellationToken::new(), router.clone(), &key, on_provider.clone());
        let second = finder.find(CancellationToken::new(), router.clone(), &key, on_provider.clone());
        assert_eq!(first, FindOutcome::Enqueued);
        assert_eq!(second, FindOutcome::Pending);

        let ctx = CancellationToken::new();
        finder.run(ctx.clone());
        router.wait_for_calls(1).await;
        assert_eq!(
            finder.find(CancellationToken::new(), router.clone(), &key, on_provider),
            FindOutcome::Pending
        );
        router.release();
        settle(&finder, &key).await;

        assert_eq!(router.calls(), 1);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(status(&metrics, Status::Discarded), 2.0);
        assert_eq!(status(&metrics, Status::Succeeded), 1.0);
        ctx.cancel();
    }

    #[tokio::test]
    async fn empty_lookup_is_negatively_cached() {
        let metrics = metrics();
        let finder = AsyncProvidersFinder::new(FinderConfig::default(), metrics.clone());
        let ctx = CancellationToken::new();
        finder.run(ctx.clone());
        let router = Arc::new(StubRouter::empty());
        let key = mh(b"miss");
        let (on_provider, _) = counting();

        assert_eq!(
            finder.find(CancellationToken::new(), router.clone(), &key, on_provider.clone()),
            FindOutcome::Enqueued
        );
        settle(&finder, &key).await;
        assert!(finder.negative_cache().has(&key));
        assert_eq!(status(&metrics, Status::Failed), 1.0);

        assert_eq!(
            finder.find(CancellationToken::new(), router.clone(), &key, on_provider),
            FindOutcome::NegativelyCached
        );
        assert_eq!(router.calls(), 1);
        assert_eq!(status(&metrics, Status::FailedCached), 1.0);
        ctx.cancel();
    }

    #[tokio::test]
    async fn full_queue_discards() {
        let metrics = metrics();
        let config = FinderConfig {
            queue_size: 1,
            ..Default::default()
        };
        let finder = AsyncProvidersFinder::new(config, metrics.clone());
        let router = Arc::new(StubRouter::empty());
        let (on_provider, _) = counting();

        let a = finder.find(CancellationToken::new(), router.clone(), &mh(b"a"), on_provider.clone());
        let b = finder.find(CancellationToken::new(), router.clone(), &mh(b"b"), on_provider);
        assert_eq!((a, b), (FindOutcome::Enqueued, FindOutcome::QueueFull));
        assert!(!finder.is_pending(&mh(b"b")));
        assert_eq!(status(&metrics, Status::Discarded), 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn lookup_times_out_into_negative_cache() {
        let metrics = metrics();
        let config = FinderConfig {
            timeout: Duration::from_secs(2),
            ..Default::default()
        };
        let finder = AsyncProvidersFinder::new(config, metrics.clone());
        let ctx = CancellationToken::new();
        finder.run(ctx.clone());
        let router = Arc::new(StubRouter::holding(vec![]));
        let key = mh(b"slow");
        let (on_provider, _) = counting();

        finder.find(CancellationToken::new(), router.clone(), &key, on_provider);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!finder.is_pending(&key));
        assert!(finder.negative_cache().has(&key));
        match metrics.data("find_provs_duration", &TagSet::status(Status::Failed)) {
            Some(AggregationData::Distribution { count, sum, .. }) => {
                assert_eq!(count, 1);
                assert!((sum - 2.0).abs() < 0.1, "{sum}");
            }
            other => panic!("unexpected {other:?}"),
        }
        ctx.cancel();
    }

    #[tokio::test]
    async fn cancelled_lookup_records_nothing() {
        let metrics = metrics();
        let finder = AsyncProvidersFinder::new(FinderConfig::default(), metrics.clone());
        let ctx = CancellationToken::new();
        finder.run(ctx.clone());
        let router = Arc::new(StubRouter::holding(vec![]));
        let key = mh(b"cancel");
        let (on_provider, _) = counting();

        let request = CancellationToken::new();
        finder.find(request.clone(), router.clone(), &key, on_provider);
        router.wait_for_calls(1).await;
        request.cancel();
        settle(&finder, &key).await;

        assert!(!finder.negative_cache().has(&key));
        assert_eq!(status(&metrics, Status::Failed), 0.0);
        assert_eq!(status(&metrics, Status::Succeeded), 0.0);
        ctx.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn reports_gauges() {
        let metrics = metrics();
        let finder = AsyncProvidersFinder::new(FinderConfig::default(), metrics.clone());
        let ctx = CancellationToken::new();
        finder.run(ctx.clone());
        tokio::time::sleep(FINDER_METRICS_INTERVAL + Duration::from_millis(1)).await;

        let none = TagSet::new();
        assert_eq!(metrics.value("prefetch_pending_limit", &none), Some(1000.0));
        assert_eq!(metrics.value("prefetch_negative_cache_ttl", &none), Some(60.0));
        assert_eq!(metrics.value("prefetches_pending", &none), Some(0.0));
        ctx.cancel();
    }
}
