//! TCP host: one listening identity with authenticated connections.
//!
//! # Connection lifecycle
//!
//! 1. Dial or accept a TCP stream, taking a permit from the resource
//!    limiter. Without a permit the stream is dropped.
//! 2. Handshake: exchange [`Hello`] frames, check the protocol id, then
//!    exchange signatures over each other's nonce.
//! 3. Register the connection, record the peer's listen addresses and emit
//!    [`NetworkEvent::Connected`].
//! 4. A reader task dispatches requests to the [`RequestHandler`] and
//!    routes responses to waiting callers. A writer task drains the outbound
//!    frame queue.
//! 5. On EOF, error, trim or host close the connection is removed and
//!    [`NetworkEvent::Disconnected`] emitted.
//!
//! Frames are newline-delimited JSON. A frame longer than `MAX_FRAME_LEN`
//! ends the connection, during the handshake or after it.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use hydra_identity::{verify, AddrInfo, Keypair, Multiaddr, PeerId};
use parking_lot::{Mutex, RwLock};
use rand::RngCore;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit, Semaphore};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connmgr::{ConnInfo, ConnManager, ConnManagerConfig};
use crate::error::{Error, Result};
use crate::peerstore::Peerstore;
use crate::wire::{proof_payload, Frame, Hello, Request, Response};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const OUTBOUND_QUEUE: usize = 64;
const NONCE_LEN: usize = 32;
/// Longest frame accepted from a peer, excluding the newline.
pub(crate) const MAX_FRAME_LEN: usize = 1024 * 1024;

type FrameReader = FramedRead<OwnedReadHalf, LinesCodec>;

/// Which side opened a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Connection events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    Connected { peer: PeerId, direction: Direction },
    Disconnected { peer: PeerId },
}

/// Observer of connection events. Called synchronously; must not block.
pub trait NetworkListener: Send + Sync {
    fn on_event(&self, event: &NetworkEvent);
}

impl<F> NetworkListener for F
where
    F: Fn(&NetworkEvent) + Send + Sync,
{
    fn on_event(&self, event: &NetworkEvent) {
        self(event)
    }
}

/// Serves requests arriving on any connection.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, from: &PeerId, request: Request) -> Response;
}

/// The host surface a routing client and the fleet need.
#[async_trait]
pub trait Host: Send + Sync {
    fn id(&self) -> &PeerId;

    /// Addresses the host listens on.
    fn addrs(&self) -> Vec<Multiaddr>;

    /// Connect to a peer unless already connected.
    async fn connect(&self, info: &AddrInfo) -> Result<()>;

    /// Register an event listener.
    fn notify(&self, listener: Arc<dyn NetworkListener>);

    fn peerstore(&self) -> &Peerstore;

    fn conn_manager(&self) -> &ConnManager;

    fn connected_peers(&self) -> Vec<PeerId>;

    /// Send a request on the existing connection to `peer`.
    async fn request(&self, peer: &PeerId, request: Request) -> Result<Response>;

    /// Install the handler for inbound requests.
    fn set_handler(&self, handler: Arc<dyn RequestHandler>);

    /// Close every connection and stop listening.
    async fn close(&self) -> Result<()>;
}

/// Host options.
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub listen: Vec<SocketAddr>,
    /// Full protocol id, e.g. `/ipfs/kad/1.0.0`.
    pub protocol: String,
    pub conn_manager: ConnManagerConfig,
    /// Hard cap on simultaneous connections.
    pub max_connections: usize,
    pub request_timeout: Duration,
    pub dial_timeout: Duration,
    pub trim_interval: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        let conn_manager = ConnManagerConfig::default();
        Self {
            listen: vec![SocketAddr::from(([0, 0, 0, 0], 0))],
            protocol: "/ipfs/kad/1.0.0".to_string(),
            max_connections: conn_manager.high_water * 2,
            conn_manager,
            request_timeout: Duration::from_secs(10),
            dial_timeout: Duration::from_secs(5),
            trim_interval: Duration::from_secs(10),
        }
    }
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Response>>>>;

struct Connection {
    conn_id: u64,
    tx: mpsc::Sender<Frame>,
    pending: PendingMap,
    opened: Instant,
    /// Peer id of the side that dialed.
    dialer: PeerId,
    cancel: CancellationToken,
}

struct HostInner {
    keypair: Keypair,
    id: PeerId,
    config: HostConfig,
    listen_addrs: RwLock<Vec<Multiaddr>>,
    peerstore: Peerstore,
    conn_manager: ConnManager,
    conns: RwLock<HashMap<PeerId, Connection>>,
    listeners: RwLock<Vec<Arc<dyn NetworkListener>>>,
    handler: RwLock<Option<Arc<dyn RequestHandler>>>,
    limiter: Arc<Semaphore>,
    next_id: AtomicU64,
    ctx: CancellationToken,
}

/// A host speaking JSON-lines over TCP.
#[derive(Clone)]
pub struct TcpHost {
    inner: Arc<HostInner>,
}

impl TcpHost {
    /// Bind every listen address and start accepting. The host stops when
    /// `ctx` is cancelled or [`Host::close`] is called.
    pub async fn listen(keypair: Keypair, config: HostConfig, ctx: CancellationToken) -> Result<Self> {
        let id = keypair.peer_id();
        let mut bound = Vec::new();
        let mut listeners = Vec::new();
        for addr in &config.listen {
            let listener = TcpListener::bind(addr).await?;
            let local = listener.local_addr()?;
            info!(peer = %id.short(), addr = %local, "host listening");
            bound.push(Multiaddr::tcp(local));
            listeners.push(listener);
        }

        let inner = Arc::new(HostInner {
            limiter: Arc::new(Semaphore::new(config.max_connections)),
            conn_manager: ConnManager::new(config.conn_manager),
            keypair,
            id,
            config,
            listen_addrs: RwLock::new(bound),
            peerstore: Peerstore::new(),
            conns: RwLock::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
            handler: RwLock::new(None),
            next_id: AtomicU64::new(1),
            ctx: ctx.child_token(),
        });

        for listener in listeners {
            tokio::spawn(accept_loop(inner.clone(), listener));
        }
        tokio::spawn(trim_loop(inner.clone()));

        Ok(Self { inner })
    }

    /// The host's own address bundle.
    pub fn addr_info(&self) -> AddrInfo {
        AddrInfo::new(self.inner.id.clone(), self.addrs())
    }

    /// Close the connection to one peer.
    pub fn disconnect(&self, peer: &PeerId) {
        if let Some(conn) = self.inner.conns.read().get(peer) {
            conn.cancel.cancel();
        }
    }
}

#[async_trait]
impl Host for TcpHost {
    fn id(&self) -> &PeerId {
        &self.inner.id
    }

    fn addrs(&self) -> Vec<Multiaddr> {
        self.inner.listen_addrs.read().clone()
    }

    async fn connect(&self, info: &AddrInfo) -> Result<()> {
        if info.id == self.inner.id {
            return Err(Error::Protocol("refusing to dial self".into()));
        }
        if self.inner.conns.read().contains_key(&info.id) {
            return Ok(());
        }
        self.inner.peerstore.add_addrs(&info.id, &info.addrs);
        let addrs = self.inner.peerstore.addrs(&info.id);
        if addrs.is_empty() {
            return Err(Error::NotConnected(format!("no addresses for {}", info.id)));
        }

        let mut last_err = Error::NotConnected(info.id.to_string());
        for addr in addrs {
            if self.inner.ctx.is_cancelled() {
                return Err(Error::Closed);
            }
            let permit = self
                .inner
                .limiter
                .clone()
                .try_acquire_owned()
                .map_err(|_| Error::ConnectionLimit)?;
            let dial = tokio::time::timeout(
                self.inner.config.dial_timeout,
                TcpStream::connect(addr.to_socket_addr()),
            );
            match dial.await {
                Ok(Ok(stream)) => {
                    match establish(self.inner.clone(), stream, Direction::Outbound, permit).await {
                        Ok(peer) if peer == info.id => return Ok(()),
                        Ok(peer) => {
                            self.disconnect(&peer);
                            last_err = Error::Protocol(format!(
                                "dialed {} but reached {}",
                                info.id, peer
                            ));
                        }
                        Err(e) => last_err = e,
                    }
                }
                Ok(Err(e)) => last_err = e.into(),
                Err(_) => last_err = Error::Timeout,
            }
        }
        Err(last_err)
    }

    fn notify(&self, listener: Arc<dyn NetworkListener>) {
        self.inner.listeners.write().push(listener);
    }

    fn peerstore(&self) -> &Peerstore {
        &self.inner.peerstore
    }

    fn conn_manager(&self) -> &ConnManager {
        &self.inner.conn_manager
    }

    fn connected_peers(&self) -> Vec<PeerId> {
        self.inner.conns.read().keys().cloned().collect()
    }

    async fn request(&self, peer: &PeerId, request: Request) -> Result<Response> {
        let (tx, pending) = {
            let conns = self.inner.conns.read();
            let conn = conns
                .get(peer)
                .ok_or_else(|| Error::NotConnected(peer.to_string()))?;
            (conn.tx.clone(), conn.pending.clone())
        };

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (resp_tx, resp_rx) = oneshot::channel();
        pending.lock().insert(id, resp_tx);

        if tx.send(Frame::Request { id, body: request }).await.is_err() {
            pending.lock().remove(&id);
            return Err(Error::NotConnected(peer.to_string()));
        }

        match tokio::time::timeout(self.inner.config.request_timeout, resp_rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(Error::NotConnected(peer.to_string())),
            Err(_) => {
                pending.lock().remove(&id);
                Err(Error::Timeout)
            }
        }
    }

    fn set_handler(&self, handler: Arc<dyn RequestHandler>) {
        *self.inner.handler.write() = Some(handler);
    }

    async fn close(&self) -> Result<()> {
        self.inner.ctx.cancel();
        let conns: Vec<Connection> = self.inner.conns.write().drain().map(|(_, c)| c).collect();
        for conn in &conns {
            conn.cancel.cancel();
        }
        // Break the host -> handler -> client -> host cycle.
        *self.inner.handler.write() = None;
        self.inner.listeners.write().clear();
        debug!(peer = %self.inner.id.short(), closed = conns.len(), "host closed");
        Ok(())
    }
}

async fn accept_loop(inner: Arc<HostInner>, listener: TcpListener) {
    loop {
        let accepted = tokio::select! {
            _ = inner.ctx.cancelled() => return,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, addr)) => {
                let Ok(permit) = inner.limiter.clone().try_acquire_owned() else {
                    debug!(%addr, "connection limit reached, refusing inbound");
                    continue;
                };
                let inner = inner.clone();
                tokio::spawn(async move {
                    if let Err(e) = establish(inner, stream, Direction::Inbound, permit).await {
                        debug!(%addr, error = %e, "inbound handshake failed");
                    }
                });
            }
            Err(e) => warn!(error = %e, "accept error"),
        }
    }
}

async fn trim_loop(inner: Arc<HostInner>) {
    let interval = inner.config.trim_interval;
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    loop {
        tokio::select! {
            _ = inner.ctx.cancelled() => return,
            _ = ticker.tick() => {}
        }
        let infos: Vec<ConnInfo> = inner
            .conns
            .read()
            .iter()
            .map(|(peer, c)| ConnInfo { peer: peer.clone(), opened: c.opened })
            .collect();
        let victims = inner.conn_manager.select_for_trim(&infos, Instant::now());
        if victims.is_empty() {
            continue;
        }
        info!(peer = %inner.id.short(), closing = victims.len(), open = infos.len(), "trimming connections");
        let conns = inner.conns.read();
        for peer in victims {
            if let Some(conn) = conns.get(&peer) {
                conn.cancel.cancel();
            }
        }
    }
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) -> Result<()> {
    let mut line = serde_json::to_vec(frame)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    Ok(())
}

async fn read_frame(lines: &mut FrameReader) -> Result<Frame> {
    match lines.next().await {
        Some(Ok(line)) => Ok(serde_json::from_str(&line)?),
        Some(Err(LinesCodecError::MaxLineLengthExceeded)) => Err(Error::Protocol(format!(
            "frame exceeds {} bytes",
            MAX_FRAME_LEN
        ))),
        Some(Err(LinesCodecError::Io(e))) => Err(e.into()),
        None => Err(Error::Protocol("connection closed".into())),
    }
}

/// Run the handshake and register the connection. Returns the remote peer.
async fn establish(
    inner: Arc<HostInner>,
    stream: TcpStream,
    direction: Direction,
    permit: OwnedSemaphorePermit,
) -> Result<PeerId> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_FRAME_LEN));

    let remote = tokio::time::timeout(
        HANDSHAKE_TIMEOUT,
        handshake(&inner, &mut lines, &mut writer),
    )
    .await??;
    let peer = remote.peer_id.clone();

    inner.peerstore.add_addrs(&peer, &remote.listen_addrs);

    let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
    let cancel = inner.ctx.child_token();
    let conn_id = inner.next_id.fetch_add(1, Ordering::Relaxed);
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let dialer = match direction {
        Direction::Outbound => inner.id.clone(),
        Direction::Inbound => peer.clone(),
    };

    {
        let mut conns = inner.conns.write();
        if let Some(existing) = conns.get(&peer) {
            // Simultaneous dials: both sides keep the connection opened by
            // the smaller peer id.
            if existing.dialer <= dialer {
                debug!(peer = %peer.short(), "duplicate connection dropped");
                return Ok(peer);
            }
            existing.cancel.cancel();
        }
        conns.insert(
            peer.clone(),
            Connection {
                conn_id,
                tx: tx.clone(),
                pending: pending.clone(),
                opened: Instant::now(),
                dialer,
                cancel: cancel.clone(),
            },
        );
    }

    debug!(peer = %peer.short(), direction = direction.as_str(), "connected");
    emit(&inner, &NetworkEvent::Connected { peer: peer.clone(), direction });

    tokio::spawn(write_loop(writer, rx, cancel.clone()));
    tokio::spawn(read_loop(inner, lines, peer.clone(), conn_id, tx, pending, cancel, permit));
    Ok(peer)
}

async fn handshake(
    inner: &HostInner,
    lines: &mut FrameReader,
    writer: &mut OwnedWriteHalf,
) -> Result<Hello> {
    let mut nonce = vec![0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    let hello = Hello {
        protocol: inner.config.protocol.clone(),
        peer_id: inner.id.clone(),
        listen_addrs: inner.listen_addrs.read().clone(),
        nonce: nonce.clone(),
    };
    write_frame(writer, &Frame::Hello(hello)).await?;

    let remote = match read_frame(lines).await? {
        Frame::Hello(h) => h,
        other => return Err(Error::Protocol(format!("expected hello, got {:?}", other))),
    };
    if remote.protocol != inner.config.protocol {
        return Err(Error::Protocol(format!(
            "protocol mismatch: {} != {}",
            remote.protocol, inner.config.protocol
        )));
    }
    if remote.peer_id == inner.id {
        return Err(Error::Protocol("connected to self".into()));
    }
    let remote_key = remote
        .peer_id
        .public_key()
        .ok_or_else(|| Error::Protocol("peer id does not embed a public key".into()))?;

    let signature = inner.keypair.sign(&proof_payload(&remote.nonce, &inner.id));
    write_frame(writer, &Frame::Proof { signature: signature.to_vec() }).await?;

    match read_frame(lines).await? {
        Frame::Proof { signature } => {
            if !verify(&remote_key, &proof_payload(&nonce, &remote.peer_id), &signature) {
                return Err(Error::Protocol("bad handshake signature".into()));
            }
        }
        other => return Err(Error::Protocol(format!("expected proof, got {:?}", other))),
    }
    Ok(remote)
}

fn emit(inner: &HostInner, event: &NetworkEvent) {
    let listeners = inner.listeners.read().clone();
    for listener in listeners {
        listener.on_event(event);
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::Receiver<Frame>,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        if let Err(e) = write_frame(&mut writer, &frame).await {
            debug!(error = %e, "write failed");
            cancel.cancel();
            break;
        }
    }
    let _ = writer.shutdown().await;
}

#[allow(clippy::too_many_arguments)]
async fn read_loop(
    inner: Arc<HostInner>,
    mut lines: FrameReader,
    peer: PeerId,
    conn_id: u64,
    tx: mpsc::Sender<Frame>,
    pending: PendingMap,
    cancel: CancellationToken,
    _permit: OwnedSemaphorePermit,
) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = read_frame(&mut lines) => frame,
        };
        match frame {
            Ok(Frame::Request { id, body }) => {
                let handler = inner.handler.read().clone();
                let tx = tx.clone();
                let from = peer.clone();
                tokio::spawn(async move {
                    let body = match handler {
                        Some(handler) => handler.handle(&from, body).await,
                        None => Response::Error {
                            message: "no handler".into(),
                        },
                    };
                    let _ = tx.send(Frame::Response { id, body }).await;
                });
            }
            Ok(Frame::Response { id, body }) => {
                if let Some(waiter) = pending.lock().remove(&id) {
                    let _ = waiter.send(body);
                }
            }
            Ok(other) => {
                debug!(peer = %peer.short(), frame = ?other, "unexpected frame after handshake");
                break;
            }
            Err(e) => {
                debug!(peer = %peer.short(), error = %e, "connection ended");
                break;
            }
        }
    }

    cancel.cancel();
    pending.lock().clear();
    let removed = {
        let mut conns = inner.conns.write();
        match conns.get(&peer) {
            Some(c) if c.conn_id == conn_id => conns.remove(&peer).is_some(),
            _ => false,
        }
    };
    if removed {
        emit(&inner, &NetworkEvent::Disconnected { peer });
    }
}
