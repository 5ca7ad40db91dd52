//! End-to-end fleet scenarios over real TCP on loopback.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use data_encoding::BASE32_NOPAD;
use hydra::{Error, Hydra, HydraConfig};
use hydra_datastore::{Datastore, Key, MemoryDatastore, Query};
use hydra_dht::{DhtClient, DhtConfig, Host, HostConfig, ProviderManager, ProviderStore, TcpHost};
use hydra_identity::{AddrInfo, Cid, Keypair};
use hydra_idgen::{DelegatedGenerator, IdentityGenerator};
use hydra_metrics::{Metrics, Status, TagKey, TagSet};
use tokio_util::sync::CancellationToken;

fn local_config() -> HydraConfig {
    HydraConfig {
        in_memory: true,
        listen_host: IpAddr::V4(Ipv4Addr::LOCALHOST),
        allow_private_addrs: true,
        seed: Some([7; 32]),
        metrics_interval: Duration::from_secs(3600),
        ..Default::default()
    }
}

fn example_cid() -> Cid {
    Cid::try_from("QmbWqxBEKC3P8tqsKc98xmWNzrzDtRLMiMPL8wBuTGsMnR").unwrap()
}

fn prefix_for(cid: &Cid) -> Key {
    Key::new(format!("/providers/{}", BASE32_NOPAD.encode(&cid.hash().to_bytes())))
}

fn find_provs(metrics: &Metrics, status: Status) -> f64 {
    metrics.value("find_provs", &TagSet::status(status)).unwrap_or(0.0)
}

/// Poll `check` every 10ms until it holds or `limit` passes.
async fn within<F: FnMut() -> bool>(limit: Duration, mut check: F) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn eventually<F: FnMut() -> bool>(check: F) -> bool {
    within(Duration::from_secs(5), check).await
}

/// A standalone routing node outside the fleet.
async fn external_node(i: u32, ctx: &CancellationToken) -> (Arc<TcpHost>, DhtClient) {
    let host = Arc::new(
        TcpHost::listen(
            Keypair::derive(b"external node", i).unwrap(),
            HostConfig {
                listen: vec!["127.0.0.1:0".parse().unwrap()],
                ..HostConfig::default()
            },
            ctx.clone(),
        )
        .await
        .unwrap(),
    );
    let client = DhtClient::new(
        host.clone(),
        Arc::new(ProviderManager::new(Arc::new(MemoryDatastore::new()))),
        DhtConfig {
            filter_private: false,
            ..DhtConfig::default()
        },
    );
    client.start();
    (host, client)
}

#[tokio::test]
async fn local_hit_is_served_without_lookup() {
    let fleet = Hydra::start(local_config(), Metrics::with_default_views()).await.unwrap();
    let prefix = prefix_for(&example_cid());
    let store = fleet.datastore();
    store.put(&prefix.child("x"), b"v".to_vec()).unwrap();

    let results: Vec<_> = store.query(&Query::prefix(prefix)).unwrap().collect();
    assert_eq!(results.len(), 1);
    assert_eq!(find_provs(fleet.metrics(), Status::Local), 1.0);
    assert_eq!(fleet.finder().unwrap().pending_count(), 0);
    fleet.shutdown().await.unwrap();
}

#[tokio::test]
async fn network_hit_is_prefetched_into_the_store() {
    let ctx = CancellationToken::new();
    let (provider_host, provider) = external_node(0, &ctx).await;
    let cid = example_cid();
    assert_eq!(provider.provide(&ctx, &cid).await.unwrap(), 0);

    let config = HydraConfig {
        bootstrap_peers: vec![provider_host.addr_info()],
        ..local_config()
    };
    let fleet = Hydra::start(config, Metrics::with_default_views()).await.unwrap();
    let metrics = fleet.metrics().clone();
    assert!(
        eventually(|| metrics.value("bootstrapped_heads", &TagSet::new()) == Some(1.0)).await,
        "head never bootstrapped"
    );
    assert_eq!(fleet.routing_table_size(), 1);

    let store = fleet.datastore();
    assert_eq!(store.query(&Query::prefix(prefix_for(&cid))).unwrap().count(), 0);

    // Keys-only scans of the record namespace bypass the proxy.
    let records = || {
        store
            .query(&Query::prefix("/providers").keys_only())
            .unwrap()
            .count()
    };
    assert!(
        within(Duration::from_secs(1), || records() == 1).await,
        "provider was not cached within a second"
    );
    let cached = fleet
        .provider_store()
        .get_providers(&cid.hash().to_bytes())
        .await
        .unwrap();
    assert_eq!(cached.len(), 1);
    assert_eq!(&cached[0].id, provider_host.id());
    assert!(eventually(|| find_provs(&metrics, Status::Succeeded) >= 1.0).await);

    fleet.shutdown().await.unwrap();
    provider_host.close().await.unwrap();
    ctx.cancel();
}

#[tokio::test]
async fn network_miss_is_negatively_cached() {
    let config = HydraConfig {
        finder_timeout: Duration::from_millis(500),
        ..local_config()
    };
    let fleet = Hydra::start(config, Metrics::with_default_views()).await.unwrap();
    let cid = example_cid();
    let key = cid.hash().to_bytes();
    let query = Query::prefix(prefix_for(&cid));
    let store = fleet.datastore();
    let finder = fleet.finder().unwrap().clone();

    assert_eq!(store.query(&query).unwrap().count(), 0);
    assert!(eventually(|| finder.negative_cache().has(&key)).await);
    assert!(eventually(|| !finder.is_pending(&key)).await);
    assert_eq!(find_provs(fleet.metrics(), Status::Failed), 1.0);

    assert_eq!(store.query(&query).unwrap().count(), 0);
    assert_eq!(find_provs(fleet.metrics(), Status::FailedCached), 1.0);
    assert_eq!(finder.pending_count(), 0);
    fleet.shutdown().await.unwrap();
}

#[tokio::test]
async fn other_namespaces_never_reach_the_finder() {
    let fleet = Hydra::start(local_config(), Metrics::with_default_views()).await.unwrap();
    let store = fleet.datastore();
    assert_eq!(store.query(&Query::prefix("/notproviders/")).unwrap().count(), 0);
    assert_eq!(store.query(&Query::prefix("/providers")).unwrap().count(), 0);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let finder = fleet.finder().unwrap();
    assert_eq!(finder.pending_count(), 0);
    assert!(finder.negative_cache().is_empty());
    assert_eq!(find_provs(fleet.metrics(), Status::Local), 0.0);
    fleet.shutdown().await.unwrap();
}

#[tokio::test]
async fn one_peer_on_two_heads_counts_once() {
    let config = HydraConfig {
        nsybils: 2,
        ..local_config()
    };
    let fleet = Hydra::start(config, Metrics::with_default_views()).await.unwrap();
    assert_eq!(fleet.heads().len(), 2);
    assert_eq!(fleet.metrics().value("heads", &TagSet::new()), Some(2.0));

    let ctx = CancellationToken::new();
    let (peer, _client) = external_node(1, &ctx).await;
    let metrics = fleet.metrics().clone();
    let connected = |head: &str| {
        metrics
            .value("connected_peers", &TagSet::new().with(TagKey::Name, head))
            .unwrap_or(0.0)
    };

    peer.connect(&fleet.heads()[0].addr_info()).await.unwrap();
    assert!(eventually(|| connected("hydra-0") == 1.0).await);
    peer.connect(&fleet.heads()[1].addr_info()).await.unwrap();
    assert!(eventually(|| connected("hydra-1") == 1.0).await);

    assert_eq!(fleet.unique_peers_estimate(), 1);
    assert!(eventually(|| fleet.routing_table_size() == 2).await);

    fleet.shutdown().await.unwrap();
    peer.close().await.unwrap();
    ctx.cancel();
}

#[tokio::test]
async fn heads_get_distinct_identities_from_the_seed() {
    let config = HydraConfig {
        nsybils: 3,
        ..local_config()
    };
    let fleet = Hydra::start(config.clone(), Metrics::with_default_views()).await.unwrap();
    let first: Vec<_> = fleet.heads().iter().map(|h| h.id().clone()).collect();
    fleet.shutdown().await.unwrap();

    let again = Hydra::start(config, Metrics::with_default_views()).await.unwrap();
    let second: Vec<_> = again.heads().iter().map(|h| h.id().clone()).collect();
    again.shutdown().await.unwrap();

    assert_eq!(first, second);
    assert_ne!(first[0], first[1]);
    assert_ne!(first[1], first[2]);
}

#[tokio::test]
async fn provider_records_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = HydraConfig {
        in_memory: false,
        db_path: dir.path().join("belly"),
        ..local_config()
    };
    let key = example_cid().hash().to_bytes();
    let provider = Keypair::derive(b"external node", 5).unwrap().peer_id();

    let fleet = Hydra::start(config.clone(), Metrics::with_default_views()).await.unwrap();
    fleet
        .provider_store()
        .add_provider(
            &key,
            AddrInfo::new(provider.clone(), vec!["/ip4/1.2.3.4/tcp/4001".parse().unwrap()]),
        )
        .await
        .unwrap();
    assert_eq!(fleet.provider_record_count(), 1);
    fleet.shutdown().await.unwrap();

    let fleet = Hydra::start(config, Metrics::with_default_views()).await.unwrap();
    let found = fleet.provider_store().get_providers(&key).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, provider);
    fleet.shutdown().await.unwrap();
}

#[tokio::test]
async fn served_identity_generator_hands_out_keys() {
    let config = HydraConfig {
        idgen_listen: Some("127.0.0.1:0".parse().unwrap()),
        ..local_config()
    };
    let fleet = Hydra::start(config, Metrics::with_default_views()).await.unwrap();
    let addr = fleet.idgen_addr().unwrap();

    let remote = DelegatedGenerator::new(format!("http://{addr}"));
    let key = remote.add_balanced().await.unwrap();
    assert_ne!(&key.peer_id(), fleet.heads()[0].id());
    remote.remove(&key).await.unwrap();
    fleet.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_releases_the_datastore() {
    let fleet = Hydra::start(local_config(), Metrics::with_default_views()).await.unwrap();
    let store = Arc::downgrade(&fleet.datastore());
    fleet.shutdown().await.unwrap();
    assert!(
        eventually(|| store.strong_count() == 0).await,
        "datastore still referenced after shutdown"
    );
}

#[tokio::test]
async fn invalid_options_fail_startup() {
    let config = HydraConfig {
        nsybils: 0,
        ..local_config()
    };
    assert!(matches!(
        Hydra::start(config, Metrics::with_default_views()).await,
        Err(Error::Config(_))
    ));
}
