//! Test doubles shared by the unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use hydra_dht::ContentRouting;
use hydra_identity::{AddrInfo, Cid, DhtId, Keypair, SHA2_256};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// SHA2-256 multihash bytes of `data`.
pub(crate) fn mh(data: &[u8]) -> Vec<u8> {
    let mut out = vec![SHA2_256 as u8, 0x20];
    out.extend_from_slice(DhtId::hash(data).as_bytes());
    out
}

pub(crate) fn peer(i: u32) -> AddrInfo {
    AddrInfo::new(
        Keypair::derive(b"providers-test", i).unwrap().peer_id(),
        vec!["/ip4/127.0.0.1/tcp/5001".parse().unwrap()],
    )
}

/// Router that streams a fixed provider list.
///
/// A holding router keeps each stream open after the providers until
/// [`StubRouter::release`] is called or the lookup is cancelled.
pub(crate) struct StubRouter {
    providers: Vec<AddrInfo>,
    hold: bool,
    release: CancellationToken,
    calls: AtomicUsize,
    cids: Mutex<Vec<Cid>>,
}

impl StubRouter {
    pub(crate) fn returning(providers: Vec<AddrInfo>) -> Self {
        Self {
            providers,
            hold: false,
            release: CancellationToken::new(),
            calls: AtomicUsize::new(0),
            cids: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn empty() -> Self {
        Self::returning(Vec::new())
    }

    pub(crate) fn holding(providers: Vec<AddrInfo>) -> Self {
        Self {
            hold: true,
            ..Self::returning(providers)
        }
    }

    pub(crate) fn release(&self) {
        self.release.cancel();
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn cids(&self) -> Vec<Cid> {
        self.cids.lock().clone()
    }

    pub(crate) async fn wait_for_calls(&self, n: usize) {
        for _ in 0..1000 {
            if self.calls() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("router was called {} times, wanted {n}", self.calls());
    }
}

impl ContentRouting for StubRouter {
    fn find_providers_async(&self, ctx: CancellationToken, cid: Cid, count: usize) -> mpsc::Receiver<AddrInfo> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.cids.lock().push(cid);
        let (tx, rx) = mpsc::channel(self.providers.len().max(1));
        let providers: Vec<AddrInfo> = self.providers.iter().take(count).cloned().collect();
        let hold = self.hold;
        let release = self.release.clone();
        tokio::spawn(async move {
            for provider in providers {
                if tx.send(provider).await.is_err() {
                    return;
                }
            }
            if hold {
                tokio::select! {
                    _ = ctx.cancelled() => {}
                    _ = release.cancelled() => {}
                }
            }
        });
        rx
    }
}
