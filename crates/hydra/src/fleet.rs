//! The fleet coordinator.
//!
//! # Startup
//!
//! 1. Open the shared datastore (RocksDB or memory) behind a
//!    [`HookedDatastore`] that keeps the provider-record gauge current.
//! 2. Build the provider-store chain and, unless prefetching is disabled,
//!    the finder and the query proxy hook.
//! 3. Spawn the heads one after another, `stagger` apart, each with a
//!    balanced identity.
//! 4. Start the periodic metric tasks, provider GC and the log reporter.
//!
//! # Shutdown
//!
//! Cancel the fleet token, close every head, wait for background tasks and
//! close the datastore.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::FutureExt;
use hydra_datastore::{
    count_prefix, Datastore, Error as DatastoreError, HookedDatastore, Hooks, Key,
    MemoryDatastore, RocksDatastore, SharedDatastore,
};
use hydra_dht::{
    ContentRouting, DhtClient, NetworkEvent, NetworkListener, ProviderManager,
    ProviderStore, PROVIDERS_NAMESPACE, PROVIDER_GC_INTERVAL,
};
use hydra_identity::{AddrInfo, Cid};
use hydra_idgen::{BalancedGenerator, DelegatedGenerator, IdentityGenerator};
use hydra_metrics::{measures, spawn_reporting, HyperLogLog, LogReporter, Metrics, TagKey, TagSet};
use hydra_providers::{
    AddProviderNotSupported, AsyncProvidersFinder, CachingProviderStore, CombiningProviderStore,
    HttpProviderStore, QueryProxy, RouterSlot,
};
use parking_lot::Mutex;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::config::HydraConfig;
use crate::error::{Error, Result};
use crate::head::{BootstrapStatus, Head, HeadOptions};
use crate::periodic::{schedule, PeriodicTask};

pub const PROVIDER_COUNT_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const ROUTING_TABLE_INTERVAL: Duration = Duration::from_secs(5);
pub const UNIQUE_PEERS_INTERVAL: Duration = Duration::from_secs(5);

/// Spreads provider lookups over the fleet's routing clients.
pub struct FleetRouter {
    clients: Vec<DhtClient>,
    next: AtomicUsize,
}

impl FleetRouter {
    pub fn new(clients: Vec<DhtClient>) -> Self {
        Self {
            clients,
            next: AtomicUsize::new(0),
        }
    }
}

impl ContentRouting for FleetRouter {
    fn find_providers_async(
        &self,
        ctx: CancellationToken,
        cid: Cid,
        count: usize,
    ) -> mpsc::Receiver<AddrInfo> {
        if self.clients.is_empty() {
            let (_, rx) = mpsc::channel(1);
            return rx;
        }
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.clients.len();
        self.clients[idx].find_providers_async(ctx, cid, count)
    }
}

/// A running fleet.
pub struct Hydra {
    heads: Vec<Head>,
    datastore: Arc<HookedDatastore>,
    providers: Arc<dyn ProviderStore>,
    finder: Option<AsyncProvidersFinder>,
    router: RouterSlot,
    metrics: Metrics,
    unique_peers: Arc<Mutex<HyperLogLog>>,
    provider_records: Arc<AtomicI64>,
    idgen_addr: Option<SocketAddr>,
    tasks: Vec<JoinHandle<()>>,
    ctx: CancellationToken,
}

impl Hydra {
    pub async fn start(config: HydraConfig, metrics: Metrics) -> Result<Self> {
        config.validate()?;
        let ctx = CancellationToken::new();
        // Stops everything spawned so far if startup fails.
        let guard = ctx.clone().drop_guard();
        let mut tasks = Vec::new();

        let inner: SharedDatastore = if config.in_memory {
            info!("using in-memory datastore");
            Arc::new(MemoryDatastore::new())
        } else {
            info!(path = %config.db_path.display(), "opening datastore");
            Arc::new(RocksDatastore::open(&config.db_path)?)
        };
        let providers_prefix = Key::new(PROVIDERS_NAMESPACE);
        let initial = count_prefix(inner.as_ref(), &providers_prefix)?;
        let provider_records = Arc::new(AtomicI64::new(initial as i64));
        metrics.record(&measures::PROVIDER_RECORDS, initial as f64, &TagSet::new());
        let datastore = Arc::new(HookedDatastore::new(
            inner,
            record_counting_hooks(provider_records.clone(), metrics.clone()),
        ));
        let shared: SharedDatastore = datastore.clone();

        let manager = Arc::new(ProviderManager::new(shared.clone()));
        let router = RouterSlot::new();
        let finder = if config.disable_prefetch {
            None
        } else {
            let finder = AsyncProvidersFinder::new(config.finder(), metrics.clone());
            tasks.extend(finder.run(ctx.clone()));
            let proxy = QueryProxy::new(
                finder.clone(),
                router.clone(),
                manager.clone(),
                metrics.clone(),
                ctx.clone(),
            );
            datastore.set_after_query(proxy.into_hook());
            Some(finder)
        };
        let providers = provider_chain(&config, manager.clone(), finder.as_ref(), &router, &metrics, &ctx);

        let (generator, idgen_addr) = identity_generator(&config, &ctx, &mut tasks).await?;

        let unique_peers = Arc::new(Mutex::new(HyperLogLog::new()));
        let bootstrap_limit = Arc::new(Semaphore::new(config.bootstrap_concurrency));
        let mut heads = Vec::with_capacity(config.nsybils);
        for index in 0..config.nsybils {
            if index > 0 && !config.stagger.is_zero() {
                tokio::select! {
                    _ = ctx.cancelled() => break,
                    _ = tokio::time::sleep(config.stagger) => {}
                }
            }
            let name = config.head_name(index);
            let keypair = generator.add_balanced().await?;
            let opts = HeadOptions {
                name: name.clone(),
                keypair,
                listen: config.listen_addr(index),
                dht: config.dht(),
                conn_manager: config.conn_manager(),
                bootstrap_peers: config.bootstrap_peers.clone(),
                providers: providers.clone(),
                listener: Some(connection_listener(name, unique_peers.clone(), metrics.clone())),
            };
            let (head, status) = Head::spawn(&ctx, opts, bootstrap_limit.clone()).await?;
            metrics.increment(&measures::HEADS, &TagSet::new());
            tasks.push(tokio::spawn(track_bootstrap(
                head.name().to_string(),
                status,
                metrics.clone(),
            )));
            heads.push(head);
        }

        let clients: Vec<DhtClient> = heads.iter().map(|h| h.client().clone()).collect();
        router.set(Arc::new(FleetRouter::new(clients.clone())));

        tasks.extend(schedule(
            &ctx,
            metric_tasks(shared.clone(), clients, unique_peers.clone(), provider_records.clone(), metrics.clone()),
        ));
        if !config.disable_provider_gc {
            tasks.push(manager.spawn_gc(PROVIDER_GC_INTERVAL, ctx.clone()));
        }
        tasks.push(spawn_reporting(
            metrics.clone(),
            Arc::new(LogReporter),
            config.metrics_interval,
            ctx.clone(),
        ));

        info!(heads = heads.len(), prefetch = finder.is_some(), "hydra fleet started");
        guard.disarm();
        Ok(Self {
            heads,
            datastore,
            providers,
            finder,
            router,
            metrics,
            unique_peers,
            provider_records,
            idgen_addr,
            tasks,
            ctx,
        })
    }

    pub fn heads(&self) -> &[Head] {
        &self.heads
    }

    pub fn datastore(&self) -> SharedDatastore {
        self.datastore.clone()
    }

    /// The provider-store chain every head serves from.
    pub fn provider_store(&self) -> Arc<dyn ProviderStore> {
        self.providers.clone()
    }

    pub fn finder(&self) -> Option<&AsyncProvidersFinder> {
        self.finder.as_ref()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Address of the served identity generator, when enabled.
    pub fn idgen_addr(&self) -> Option<SocketAddr> {
        self.idgen_addr
    }

    pub fn unique_peers_estimate(&self) -> u64 {
        self.unique_peers.lock().estimate()
    }

    /// Routing-table entries summed over all heads.
    pub fn routing_table_size(&self) -> usize {
        self.heads.iter().map(|h| h.client().routing_table().size).sum()
    }

    /// The gauge-backed provider-record count.
    pub fn provider_record_count(&self) -> u64 {
        self.provider_records.load(Ordering::Relaxed).max(0) as u64
    }

    pub async fn shutdown(self) -> Result<()> {
        info!("shutting down hydra fleet");
        self.ctx.cancel();
        // The router holds the heads' clients, which hold the datastore
        // whose query hook holds the router and the provider manager.
        self.router.clear();
        self.datastore.clear_hooks();
        for head in &self.heads {
            if let Err(e) = head.close().await {
                warn!(head = %head.name(), error = %e, "failed to close head");
            }
        }
        for result in join_all(self.tasks).await {
            if let Err(e) = result {
                debug!(error = %e, "background task ended abnormally");
            }
        }
        self.datastore.close()?;
        info!("hydra fleet stopped");
        Ok(())
    }
}

fn is_provider_record(key: &Key) -> bool {
    let segments = key.namespaces();
    segments.len() >= 3 && segments[0] == PROVIDERS_NAMESPACE.trim_start_matches('/')
}

/// Hooks that move the provider-record gauge on new records and deletes.
fn record_counting_hooks(count: Arc<AtomicI64>, metrics: Metrics) -> Hooks {
    let on_put = count.clone();
    let put_metrics = metrics.clone();
    Hooks {
        after_put: Some(Arc::new(
            move |key: &Key, _value: &[u8], existed: bool, err: Option<&DatastoreError>| {
                if err.is_none() && !existed && is_provider_record(key) {
                    let now = on_put.fetch_add(1, Ordering::Relaxed) + 1;
                    put_metrics.record(&measures::PROVIDER_RECORDS, now.max(0) as f64, &TagSet::new());
                }
            },
        )),
        after_delete: Some(Arc::new(move |key: &Key, err: Option<&DatastoreError>| {
            if err.is_none() && is_provider_record(key) {
                let now = count.fetch_sub(1, Ordering::Relaxed) - 1;
                metrics.record(&measures::PROVIDER_RECORDS, now.max(0) as f64, &TagSet::new());
            }
        })),
        after_query: None,
    }
}

/// The store heads serve provider records from.
///
/// Without a delegate this is the datastore-backed manager; prefetching then
/// happens through the query proxy. With a delegate, reads combine the
/// manager and the delegate and misses are prefetched into the manager.
fn provider_chain(
    config: &HydraConfig,
    manager: Arc<ProviderManager>,
    finder: Option<&AsyncProvidersFinder>,
    router: &RouterSlot,
    metrics: &Metrics,
    ctx: &CancellationToken,
) -> Arc<dyn ProviderStore> {
    let Some(url) = &config.delegate_url else {
        return manager;
    };
    info!(%url, "consulting delegated routing for providers");
    let delegate = HttpProviderStore::new(url.clone(), metrics.clone());
    let combined: Arc<dyn ProviderStore> = Arc::new(CombiningProviderStore::new(vec![
        manager.clone() as Arc<dyn ProviderStore>,
        Arc::new(AddProviderNotSupported::new(delegate)),
    ]));
    match finder {
        Some(finder) => Arc::new(CachingProviderStore::new(
            combined,
            manager,
            finder.clone(),
            router.clone(),
            metrics.clone(),
            ctx.clone(),
        )),
        None => combined,
    }
}

/// Pick the identity source. A local generator is optionally served over
/// HTTP so other fleets can share its keyspace.
async fn identity_generator(
    config: &HydraConfig,
    ctx: &CancellationToken,
    tasks: &mut Vec<JoinHandle<()>>,
) -> Result<(Arc<dyn IdentityGenerator>, Option<SocketAddr>)> {
    if let Some(addr) = &config.idgen_addr {
        info!(%addr, "using delegated identity generator");
        let delegated: Arc<dyn IdentityGenerator> = Arc::new(DelegatedGenerator::new(addr.clone()));
        return Ok((delegated, None));
    }
    let generator = Arc::new(match config.seed {
        Some(seed) => BalancedGenerator::new(seed, config.id_offset),
        None => BalancedGenerator::random(),
    });

    let mut served = None;
    if let Some(listen) = config.idgen_listen {
        let listener = tokio::net::TcpListener::bind(listen).await?;
        let local = listener.local_addr()?;
        let app = hydra_idgen::http::router(generator.clone()).layer(TraceLayer::new_for_http());
        let shutdown = ctx.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
            {
                warn!(error = %e, "idgen server failed");
            }
        }));
        info!(addr = %local, "serving identity generator");
        served = Some(local);
    }
    Ok((generator as Arc<dyn IdentityGenerator>, served))
}

/// Per-head listener feeding the unique-peer sketch and connection metrics.
fn connection_listener(
    name: String,
    unique_peers: Arc<Mutex<HyperLogLog>>,
    metrics: Metrics,
) -> Arc<dyn NetworkListener> {
    Arc::new(move |event: &NetworkEvent| match event {
        NetworkEvent::Connected { peer, direction } => {
            unique_peers.lock().insert(peer.as_bytes());
            let head = TagSet::new().with(TagKey::Name, name.as_str());
            metrics.record(&measures::CONNECTED_PEERS, 1.0, &head);
            let conn = head
                .with(TagKey::Direction, direction.as_str())
                .with(TagKey::UsesFd, "true");
            metrics.increment(&measures::CONNECTIONS, &conn);
        }
        NetworkEvent::Disconnected { .. } => {
            let head = TagSet::new().with(TagKey::Name, name.as_str());
            metrics.record(&measures::CONNECTED_PEERS, -1.0, &head);
        }
    })
}

async fn track_bootstrap(
    name: String,
    mut status: mpsc::Receiver<BootstrapStatus>,
    metrics: Metrics,
) {
    let mut failures = 0;
    while let Some(update) = status.recv().await {
        if update.done {
            metrics.increment(&measures::BOOTSTRAPPED_HEADS, &TagSet::new());
            debug!(head = %name, failures, "bootstrap complete");
        } else if update.err.is_some() {
            failures += 1;
        }
    }
}

fn metric_tasks(
    store: SharedDatastore,
    clients: Vec<DhtClient>,
    unique_peers: Arc<Mutex<HyperLogLog>>,
    provider_records: Arc<AtomicI64>,
    metrics: Metrics,
) -> Vec<PeriodicTask> {
    let count_metrics = metrics.clone();
    let table_metrics = metrics.clone();
    let clients = Arc::new(clients);
    vec![
        PeriodicTask::new("provider-records", PROVIDER_COUNT_INTERVAL, move |_ctx| {
            let store = store.clone();
            let provider_records = provider_records.clone();
            let metrics = count_metrics.clone();
            async move {
                let count = count_prefix(store.as_ref(), &Key::new(PROVIDERS_NAMESPACE))?;
                provider_records.store(count as i64, Ordering::Relaxed);
                metrics.record(&measures::PROVIDER_RECORDS, count as f64, &TagSet::new());
                Ok::<(), Error>(())
            }
            .boxed()
        }),
        PeriodicTask::new("routing-table-size", ROUTING_TABLE_INTERVAL, move |_ctx| {
            let clients = clients.clone();
            let metrics = table_metrics.clone();
            async move {
                let size: usize = clients.iter().map(|c| c.routing_table().size).sum();
                metrics.record(&measures::ROUTING_TABLE_SIZE, size as f64, &TagSet::new());
                Ok::<(), Error>(())
            }
            .boxed()
        }),
        PeriodicTask::new("unique-peers", UNIQUE_PEERS_INTERVAL, move |_ctx| {
            let estimate = unique_peers.lock().estimate();
            metrics.record(&measures::UNIQUE_PEERS, estimate as f64, &TagSet::new());
            async { Ok::<(), Error>(()) }.boxed()
        }),
    ]
}
