//! Kademlia routing client bound to one host.
//!
//! The client always runs in server mode: it answers every [`Request`] kind
//! for its peers and keeps a k-bucket routing table fed by the host's
//! connection events.
//!
//! # Lookups
//!
//! [`DhtClient::find_providers_async`], [`DhtClient::get_closest_peers`],
//! [`DhtClient::get_value`] and [`DhtClient::bootstrap`] share one iterative
//! walk: query `alpha` of the closest unqueried peers in parallel, merge the
//! closer peers they return, repeat until the closest set has all been
//! asked. The walk checks its cancellation token between rounds and while a
//! round is in flight.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use hydra_identity::{AddrInfo, Cid, DhtId, PeerId};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::host::{Host, NetworkEvent, RequestHandler};
use crate::lookup::Shortlist;
use crate::provider::ProviderStore;
use crate::routing_table::RoutingTable;
use crate::validator::Validator;
use crate::wire::{Record, Request, Response};

/// Routing client options.
#[derive(Clone)]
pub struct DhtConfig {
    /// Prefix of the protocol id, `"/ipfs"` gives `/ipfs/kad/1.0.0`.
    pub protocol_prefix: String,
    pub bucket_size: usize,
    /// Parallel queries per lookup round.
    pub alpha: usize,
    /// Keep peers with only private addresses out of the table and lookups.
    pub filter_private: bool,
    /// Record validator for `PutValue`/`GetValue`. Without one, values put
    /// by this node are kept (newest wins) and remote `PutValue` is refused.
    pub validator: Option<Arc<dyn Validator>>,
    /// Upper bound for a whole lookup.
    pub lookup_timeout: Duration,
    /// Records kept in memory; the oldest is evicted to make room.
    pub max_records: usize,
    /// Largest record value accepted, in bytes.
    pub max_record_size: usize,
}

impl Default for DhtConfig {
    fn default() -> Self {
        Self {
            protocol_prefix: "/ipfs".into(),
            bucket_size: 20,
            alpha: 3,
            filter_private: true,
            validator: None,
            lookup_timeout: Duration::from_secs(60),
            max_records: 16 * 1024,
            max_record_size: 64 * 1024,
        }
    }
}

impl DhtConfig {
    /// Protocol id spoken on the wire.
    pub fn protocol_id(&self) -> String {
        format!("{}/kad/1.0.0", self.protocol_prefix)
    }
}

impl std::fmt::Debug for DhtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DhtConfig")
            .field("protocol_prefix", &self.protocol_prefix)
            .field("bucket_size", &self.bucket_size)
            .field("alpha", &self.alpha)
            .field("filter_private", &self.filter_private)
            .field("validator", &self.validator.is_some())
            .field("lookup_timeout", &self.lookup_timeout)
            .field("max_records", &self.max_records)
            .field("max_record_size", &self.max_record_size)
            .finish()
    }
}

/// Snapshot of a routing table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingTableInfo {
    pub size: usize,
    pub peers: Vec<PeerId>,
}

/// Streams providers for a CID.
///
/// The receiver closes once `count` providers were sent, the lookup is
/// exhausted, or `ctx` is cancelled.
pub trait ContentRouting: Send + Sync {
    fn find_providers_async(
        &self,
        ctx: CancellationToken,
        cid: Cid,
        count: usize,
    ) -> mpsc::Receiver<AddrInfo>;
}

struct ClientInner {
    host: Arc<dyn Host>,
    local: DhtId,
    config: DhtConfig,
    table: Mutex<RoutingTable>,
    providers: Arc<dyn ProviderStore>,
    records: RwLock<HashMap<String, StoredRecord>>,
}

struct StoredRecord {
    value: Vec<u8>,
    stored_at: Instant,
}

/// Routing client for one head.
#[derive(Clone)]
pub struct DhtClient {
    inner: Arc<ClientInner>,
}

impl DhtClient {
    pub fn new(host: Arc<dyn Host>, providers: Arc<dyn ProviderStore>, config: DhtConfig) -> Self {
        let local = host.id().dht_id();
        let table = RoutingTable::new(local, config.bucket_size, config.filter_private);
        Self {
            inner: Arc::new(ClientInner {
                host,
                local,
                config,
                table: Mutex::new(table),
                providers,
                records: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Answer requests on the host and track its connections.
    ///
    /// Peers already connected are added to the routing table immediately.
    pub fn start(&self) {
        let host = &self.inner.host;
        host.set_handler(Arc::new(self.clone()));

        let inner = self.inner.clone();
        host.notify(Arc::new(move |event: &NetworkEvent| match event {
            NetworkEvent::Connected { peer, .. } => {
                let info = inner.host.peerstore().addr_info(peer);
                if inner.table.lock().try_add(info) {
                    debug!(peer = %peer.short(), "peer added to routing table");
                }
            }
            NetworkEvent::Disconnected { peer } => {
                inner.table.lock().remove(peer);
            }
        }));

        for peer in host.connected_peers() {
            let info = host.peerstore().addr_info(&peer);
            self.inner.table.lock().try_add(info);
        }
    }

    pub fn host(&self) -> &Arc<dyn Host> {
        &self.inner.host
    }

    pub fn config(&self) -> &DhtConfig {
        &self.inner.config
    }

    pub fn routing_table(&self) -> RoutingTableInfo {
        let table = self.inner.table.lock();
        RoutingTableInfo {
            size: table.size(),
            peers: table.peers(),
        }
    }

    /// Self-lookup to fill the routing table.
    pub async fn bootstrap(&self, ctx: CancellationToken) -> Result<()> {
        let id = self.inner.host.id().clone();
        let found = self
            .walk(&ctx, self.inner.local, Request::FindNode { key: id.to_bytes() }, |_, _| false)
            .await?;
        info!(
            peer = %id.short(),
            closest = found.len(),
            table = self.inner.table.lock().size(),
            "bootstrap lookup finished"
        );
        Ok(())
    }

    /// The closest peers to `key` that answered a lookup.
    pub async fn get_closest_peers(&self, ctx: &CancellationToken, key: &[u8]) -> Result<Vec<AddrInfo>> {
        self.walk(ctx, DhtId::hash(key), Request::FindNode { key: key.to_vec() }, |_, _| false)
            .await
    }

    /// Announce this host as a provider of `cid`. Returns how many remote
    /// peers accepted the record.
    pub async fn provide(&self, ctx: &CancellationToken, cid: &Cid) -> Result<usize> {
        let key = cid.hash().to_bytes();
        let host = &self.inner.host;
        let me = AddrInfo::new(host.id().clone(), host.addrs());
        self.inner.providers.add_provider(&key, me.clone()).await?;

        let closest = self.get_closest_peers(ctx, &key).await?;
        let request = Request::AddProvider { key, provider: me };
        let acks = self
            .query_all(ctx, closest, &request)
            .await?
            .into_iter()
            .filter(|(_, r)| matches!(r, Response::Ack))
            .count();
        debug!(%cid, acks, "provided");
        Ok(acks)
    }

    /// Validate and store a record locally and on the closest peers.
    pub async fn put_value(&self, ctx: &CancellationToken, key: &str, value: Vec<u8>) -> Result<()> {
        self.inner.store_record(key, value.clone())?;
        let closest = self.get_closest_peers(ctx, key.as_bytes()).await?;
        let request = Request::PutValue {
            key: key.to_string(),
            value,
        };
        let stored = self
            .query_all(ctx, closest, &request)
            .await?
            .into_iter()
            .filter(|(_, r)| matches!(r, Response::Ack))
            .count();
        debug!(key, stored, "put value");
        Ok(())
    }

    /// Best valid value for `key` seen locally or on the network.
    pub async fn get_value(&self, ctx: &CancellationToken, key: &str) -> Result<Vec<u8>> {
        let mut values: Vec<Vec<u8>> = self.inner.record(key).into_iter().collect();
        let validator = self.inner.config.validator.clone();
        let request = Request::GetValue { key: key.to_string() };
        self.walk(ctx, DhtId::hash(key.as_bytes()), request, |peer, response| {
            if let Response::Value { record: Some(record), .. } = response {
                let valid = match &validator {
                    Some(v) => v.validate(key, &record.value).is_ok(),
                    None => true,
                };
                if valid {
                    values.push(record.value.clone());
                } else {
                    debug!(peer = %peer.short(), key, "discarding invalid record");
                }
            }
            false
        })
        .await?;

        if values.is_empty() {
            return Err(Error::NotFound(key.to_string()));
        }
        let best = match &self.inner.config.validator {
            Some(v) => v.select(key, &values)?,
            None => values.len() - 1,
        };
        Ok(values.swap_remove(best))
    }

    async fn find_providers(&self, ctx: CancellationToken, cid: Cid, count: usize, tx: mpsc::Sender<AddrInfo>) {
        let key = cid.hash().to_bytes();
        let mut seen = HashSet::new();
        let mut queue = Vec::new();

        match self.inner.providers.get_providers(&key).await {
            Ok(local) => queue.extend(local),
            Err(e) => debug!(%cid, error = %e, "local provider lookup failed"),
        }
        if self.send_providers(&ctx, &tx, &mut seen, &mut queue, count).await {
            return;
        }

        let request = Request::GetProviders { key: key.clone() };
        let mut found = Vec::new();
        let walk = self.walk(&ctx, DhtId::hash(&key), request, |_, response| {
            if let Response::Providers { providers, .. } = response {
                for provider in providers {
                    if !seen.contains(&provider.id) && !found.iter().any(|p: &AddrInfo| p.id == provider.id) {
                        found.push(provider.clone());
                    }
                }
            }
            seen.len() + found.len() >= count
        });
        if let Err(e) = walk.await {
            debug!(%cid, error = %e, "provider lookup ended early");
        }
        for provider in &found {
            self.inner.host.peerstore().add_addrs(&provider.id, &provider.addrs);
        }
        self.send_providers(&ctx, &tx, &mut seen, &mut found, count).await;
    }

    /// Send queued providers until `count` is reached. Returns true when the
    /// stream should end.
    async fn send_providers(
        &self,
        ctx: &CancellationToken,
        tx: &mpsc::Sender<AddrInfo>,
        seen: &mut HashSet<PeerId>,
        queue: &mut Vec<AddrInfo>,
        count: usize,
    ) -> bool {
        for provider in queue.drain(..) {
            if seen.len() >= count {
                return true;
            }
            if !seen.insert(provider.id.clone()) {
                continue;
            }
            tokio::select! {
                _ = ctx.cancelled() => return true,
                sent = tx.send(provider) => if sent.is_err() { return true },
            }
        }
        seen.len() >= count || ctx.is_cancelled()
    }

    /// Iterative lookup toward `target`. `on_response` sees every answer and
    /// returns true to stop early.
    async fn walk<F>(&self, ctx: &CancellationToken, target: DhtId, request: Request, mut on_response: F) -> Result<Vec<AddrInfo>>
    where
        F: FnMut(&PeerId, &Response) -> bool,
    {
        let config = &self.inner.config;
        let mut shortlist = Shortlist::new(
            target,
            config.bucket_size,
            self.inner.host.id().clone(),
            config.filter_private,
        );
        shortlist.extend(self.inner.table.lock().nearest(shortlist.target(), config.bucket_size));

        let deadline = tokio::time::Instant::now() + config.lookup_timeout;
        loop {
            if ctx.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let round = shortlist.next_round(config.alpha.max(1));
            if round.is_empty() {
                break;
            }
            let answers = tokio::time::timeout_at(deadline, self.query_all(ctx, round.clone(), &request)).await??;

            let answered: HashSet<PeerId> = answers.iter().map(|(p, _)| p.id.clone()).collect();
            for peer in round.iter().filter(|p| !answered.contains(&p.id)) {
                shortlist.mark_failed(&peer.id);
            }
            let mut stop = false;
            for (peer, response) in answers {
                stop |= on_response(&peer.id, &response);
                let closer = match response {
                    Response::Nodes { closer } => closer,
                    Response::Providers { closer, .. } => closer,
                    Response::Value { closer, .. } => closer,
                    _ => Vec::new(),
                };
                shortlist.mark_responded(peer);
                shortlist.extend(closer);
            }
            if stop {
                break;
            }
        }
        Ok(shortlist.closest())
    }

    /// Send `request` to every peer concurrently, dialing where needed.
    /// Failed peers are left out of the result.
    async fn query_all(
        &self,
        ctx: &CancellationToken,
        peers: Vec<AddrInfo>,
        request: &Request,
    ) -> Result<Vec<(AddrInfo, Response)>> {
        let host = &self.inner.host;
        let queries = peers.into_iter().map(|peer| async move {
            if let Err(e) = host.connect(&peer).await {
                debug!(peer = %peer.id.short(), error = %e, "lookup dial failed");
                return None;
            }
            match host.request(&peer.id, request.clone()).await {
                Ok(Response::Error { message }) => {
                    debug!(peer = %peer.id.short(), %message, "peer returned an error");
                    Some((peer, Response::Error { message }))
                }
                Ok(response) => Some((peer, response)),
                Err(e) => {
                    debug!(peer = %peer.id.short(), error = %e, "lookup query failed");
                    None
                }
            }
        });
        tokio::select! {
            _ = ctx.cancelled() => Err(Error::Cancelled),
            results = join_all(queries) => Ok(results.into_iter().flatten().collect()),
        }
    }
}

impl ContentRouting for DhtClient {
    fn find_providers_async(
        &self,
        ctx: CancellationToken,
        cid: Cid,
        count: usize,
    ) -> mpsc::Receiver<AddrInfo> {
        let (tx, rx) = mpsc::channel(count.clamp(1, 64));
        let client = self.clone();
        tokio::spawn(async move {
            client.find_providers(ctx, cid, count, tx).await;
        });
        rx
    }
}

impl ClientInner {
    fn closer_peers(&self, key: &[u8], exclude: &PeerId) -> Vec<AddrInfo> {
        self.table
            .lock()
            .nearest(&DhtId::hash(key), self.config.bucket_size)
            .into_iter()
            .filter(|p| &p.id != exclude)
            .collect()
    }

    fn record(&self, key: &str) -> Option<Vec<u8>> {
        self.records.read().get(key).map(|r| r.value.clone())
    }

    fn store_record(&self, key: &str, value: Vec<u8>) -> Result<()> {
        if value.len() > self.config.max_record_size {
            return Err(Error::Validation(format!(
                "record of {} bytes exceeds {} bytes",
                value.len(),
                self.config.max_record_size
            )));
        }
        if let Some(validator) = &self.config.validator {
            validator.validate(key, &value)?;
        }
        let mut records = self.records.write();
        if let (Some(validator), Some(existing)) = (&self.config.validator, records.get(key)) {
            if validator.select(key, &[existing.value.clone(), value.clone()])? == 0 {
                return Ok(());
            }
        }
        if !records.contains_key(key) && records.len() >= self.config.max_records {
            let oldest = records
                .iter()
                .min_by_key(|(_, r)| r.stored_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                records.remove(&oldest);
            }
        }
        records.insert(
            key.to_string(),
            StoredRecord {
                value,
                stored_at: Instant::now(),
            },
        );
        Ok(())
    }
}

#[async_trait]
impl RequestHandler for DhtClient {
    async fn handle(&self, from: &PeerId, request: Request) -> Response {
        let inner = &self.inner;
        match request {
            Request::Ping => Response::Pong,
            Request::FindNode { key } => Response::Nodes {
                closer: inner.closer_peers(&key, from),
            },
            Request::GetProviders { key } => match inner.providers.get_providers(&key).await {
                Ok(providers) => Response::Providers {
                    providers,
                    closer: inner.closer_peers(&key, from),
                },
                Err(e) => Response::Error { message: e.to_string() },
            },
            Request::AddProvider { key, provider } => {
                if &provider.id != from {
                    warn!(from = %from.short(), claimed = %provider.id.short(), "rejecting provider record for another peer");
                    return Response::Error {
                        message: "provider id does not match sender".into(),
                    };
                }
                inner.host.peerstore().add_addrs(&provider.id, &provider.addrs);
                match inner.providers.add_provider(&key, provider).await {
                    Ok(()) => Response::Ack,
                    Err(e) => Response::Error { message: e.to_string() },
                }
            }
            // Unvalidated records are only stored on behalf of this node.
            Request::PutValue { .. } if inner.config.validator.is_none() => Response::Error {
                message: "records are not accepted without a validator".into(),
            },
            Request::PutValue { key, value } => match inner.store_record(&key, value) {
                Ok(()) => Response::Ack,
                Err(e) => Response::Error { message: e.to_string() },
            },
            Request::GetValue { key } => Response::Value {
                record: inner.record(&key).map(|value| Record { value }),
                closer: inner.closer_peers(key.as_bytes(), from),
            },
        }
    }
}
