//! A head: one host identity with its own routing client.
//!
//! Every head of a fleet shares the provider store (and through it the
//! datastore) and the bootstrap semaphore. Heads bootstrap in the
//! background; progress is reported on the channel returned by
//! [`Head::spawn`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use hydra_dht::{
    ConnManagerConfig, DhtClient, DhtConfig, Host, HostConfig, NetworkListener, ProviderStore,
    TcpHost,
};
use hydra_identity::{AddrInfo, Keypair, PeerId};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;

/// Dial attempts per bootstrap peer.
pub const BOOTSTRAP_ATTEMPTS: u32 = 3;
/// Delay before the second attempt; doubles after each failure.
pub const BOOTSTRAP_BACKOFF: Duration = Duration::from_millis(500);

/// Everything a head needs to start.
pub struct HeadOptions {
    pub name: String,
    pub keypair: Keypair,
    pub listen: SocketAddr,
    pub dht: DhtConfig,
    pub conn_manager: ConnManagerConfig,
    pub bootstrap_peers: Vec<AddrInfo>,
    pub providers: Arc<dyn ProviderStore>,
    /// Registered before any connection is made.
    pub listener: Option<Arc<dyn NetworkListener>>,
}

/// Bootstrap progress of one head.
///
/// A failed peer yields `{done: false, err: Some(..)}`. The last message is
/// always `{done: true, err: None}`, after which the channel closes.
#[derive(Debug)]
pub struct BootstrapStatus {
    pub done: bool,
    pub err: Option<hydra_dht::Error>,
}

pub struct Head {
    name: String,
    host: Arc<TcpHost>,
    client: DhtClient,
    ctx: CancellationToken,
}

impl Head {
    /// Start listening and begin bootstrapping in the background.
    ///
    /// The head stops when `ctx` is cancelled or [`Head::close`] is called.
    pub async fn spawn(
        ctx: &CancellationToken,
        opts: HeadOptions,
        bootstrap_limit: Arc<Semaphore>,
    ) -> Result<(Head, mpsc::Receiver<BootstrapStatus>)> {
        let ctx = ctx.child_token();
        let host_config = HostConfig {
            listen: vec![opts.listen],
            protocol: opts.dht.protocol_id(),
            max_connections: opts.conn_manager.high_water * 2,
            conn_manager: opts.conn_manager,
            ..HostConfig::default()
        };
        let host = Arc::new(TcpHost::listen(opts.keypair, host_config, ctx.clone()).await?);
        if let Some(listener) = opts.listener {
            host.notify(listener);
        }
        let client = DhtClient::new(host.clone(), opts.providers, opts.dht);
        client.start();
        info!(
            head = %opts.name,
            peer = %host.id(),
            addrs = ?host.addrs(),
            "head started"
        );

        let (tx, rx) = mpsc::channel(opts.bootstrap_peers.len() + 1);
        tokio::spawn(bootstrap(
            opts.name.clone(),
            host.clone(),
            client.clone(),
            opts.bootstrap_peers,
            bootstrap_limit,
            tx,
            ctx.clone(),
        ));

        Ok((
            Head {
                name: opts.name,
                host,
                client,
                ctx,
            },
            rx,
        ))
    }

    pub fn id(&self) -> &PeerId {
        self.host.id()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host(&self) -> &Arc<TcpHost> {
        &self.host
    }

    pub fn client(&self) -> &DhtClient {
        &self.client
    }

    /// The address other nodes dial to reach this head.
    pub fn addr_info(&self) -> AddrInfo {
        self.host.addr_info()
    }

    pub async fn close(&self) -> Result<()> {
        self.ctx.cancel();
        self.host.close().await?;
        debug!(head = %self.name, "head closed");
        Ok(())
    }
}

async fn bootstrap(
    name: String,
    host: Arc<TcpHost>,
    client: DhtClient,
    peers: Vec<AddrInfo>,
    limit: Arc<Semaphore>,
    status: mpsc::Sender<BootstrapStatus>,
    ctx: CancellationToken,
) {
    let _permit = tokio::select! {
        _ = ctx.cancelled() => return,
        permit = limit.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return,
        },
    };

    let attempts = peers.iter().map(|peer| connect_with_retry(&host, peer, &ctx));
    let mut connected = 0;
    for (peer, result) in peers.iter().zip(join_all(attempts).await) {
        match result {
            Ok(()) => {
                host.conn_manager().protect(&peer.id);
                connected += 1;
            }
            Err(e) => {
                warn!(head = %name, peer = %peer.id.short(), error = %e, "bootstrap connect failed");
                let _ = status
                    .send(BootstrapStatus {
                        done: false,
                        err: Some(e),
                    })
                    .await;
            }
        }
    }

    if connected > 0 {
        if let Err(e) = client.bootstrap(ctx.child_token()).await {
            warn!(head = %name, error = %e, "bootstrap lookup failed");
        }
    }
    info!(head = %name, connected, total = peers.len(), "head bootstrapped");
    let _ = status
        .send(BootstrapStatus {
            done: true,
            err: None,
        })
        .await;
}

async fn connect_with_retry(
    host: &TcpHost,
    peer: &AddrInfo,
    ctx: &CancellationToken,
) -> hydra_dht::Result<()> {
    let mut backoff = BOOTSTRAP_BACKOFF;
    let mut attempt = 1;
    loop {
        let result = tokio::select! {
            _ = ctx.cancelled() => return Err(hydra_dht::Error::Cancelled),
            result = host.connect(peer) => result,
        };
        match result {
            Ok(()) => return Ok(()),
            Err(e) if attempt >= BOOTSTRAP_ATTEMPTS => return Err(e),
            Err(e) => {
                debug!(peer = %peer.id.short(), attempt, error = %e, "retrying bootstrap peer");
                tokio::select! {
                    _ = ctx.cancelled() => return Err(hydra_dht::Error::Cancelled),
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff *= 2;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hydra_datastore::MemoryDatastore;
    use hydra_dht::ProviderManager;
    use hydra_identity::Multiaddr;

    fn options(i: u32, bootstrap_peers: Vec<AddrInfo>) -> HeadOptions {
        HeadOptions {
            name: format!("test-{i}"),
            keypair: Keypair::derive(b"head tests", i).unwrap(),
            listen: "127.0.0.1:0".parse().unwrap(),
            dht: DhtConfig {
                filter_private: false,
                ..DhtConfig::default()
            },
            conn_manager: ConnManagerConfig::default(),
            bootstrap_peers,
            providers: Arc::new(ProviderManager::new(Arc::new(MemoryDatastore::new()))),
            listener: None,
        }
    }

    async fn drain(mut rx: mpsc::Receiver<BootstrapStatus>) -> Vec<BootstrapStatus> {
        let mut all = Vec::new();
        while let Some(status) = rx.recv().await {
            all.push(status);
        }
        all
    }

    #[tokio::test]
    async fn no_bootstrap_peers_is_done_immediately() {
        let ctx = CancellationToken::new();
        let (head, rx) = Head::spawn(&ctx, options(0, vec![]), Arc::new(Semaphore::new(1)))
            .await
            .unwrap();
        let statuses = drain(rx).await;
        assert_eq!(statuses.len(), 1);
        assert!(statuses[0].done && statuses[0].err.is_none());
        head.close().await.unwrap();
    }

    #[tokio::test]
    async fn bootstraps_from_a_seed_and_protects_it() {
        let ctx = CancellationToken::new();
        let limit = Arc::new(Semaphore::new(1));
        let (seed, rx) = Head::spawn(&ctx, options(1, vec![]), limit.clone()).await.unwrap();
        drain(rx).await;

        let (head, rx) = Head::spawn(&ctx, options(2, vec![seed.addr_info()]), limit)
            .await
            .unwrap();
        let statuses = drain(rx).await;
        assert_eq!(statuses.len(), 1);
        assert!(statuses[0].done);
        assert!(head.host().conn_manager().is_protected(seed.id()));
        assert!(head.host().connected_peers().contains(seed.id()));
        assert_eq!(head.client().routing_table().size, 1);

        head.close().await.unwrap();
        seed.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_peers_report_errors_then_done() {
        let ctx = CancellationToken::new();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead = listener.local_addr().unwrap();
        drop(listener);
        let ghost = AddrInfo::new(
            Keypair::derive(b"head tests", 99).unwrap().peer_id(),
            vec![Multiaddr::tcp(dead)],
        );

        let (head, rx) = Head::spawn(&ctx, options(3, vec![ghost]), Arc::new(Semaphore::new(1)))
            .await
            .unwrap();
        let statuses = drain(rx).await;
        assert_eq!(statuses.len(), 2);
        assert!(!statuses[0].done && statuses[0].err.is_some());
        assert!(statuses[1].done && statuses[1].err.is_none());
        head.close().await.unwrap();
    }

    #[tokio::test]
    async fn cancelled_while_waiting_for_the_semaphore() {
        let ctx = CancellationToken::new();
        let limit = Arc::new(Semaphore::new(1));
        let _held = limit.clone().acquire_owned().await.unwrap();
        let (head, rx) = Head::spawn(&ctx, options(4, vec![]), limit).await.unwrap();
        ctx.cancel();
        assert!(drain(rx).await.is_empty());
        head.close().await.unwrap();
    }
}
