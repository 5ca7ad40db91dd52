//! Fleet options.
//!
//! Every flag can also be set through a `HYDRA_*` environment variable.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use hydra_dht::{ConnManagerConfig, DhtConfig, NamespacedValidator, Validator};
use hydra_identity::{AddrInfo, Multiaddr, PeerId};
use hydra_providers::FinderConfig;

use crate::error::{Error, Result};

#[derive(Parser, Debug, Clone)]
#[command(name = "hydra", about = "Run a fleet of DHT heads sharing one provider-record store")]
pub struct HydraConfig {
    /// Number of heads to run.
    #[arg(long, env = "HYDRA_NSYBILS", default_value_t = 1)]
    pub nsybils: usize,

    /// Directory of the shared RocksDB datastore.
    #[arg(long, env = "HYDRA_DB_PATH", default_value = "hydra-belly")]
    pub db_path: PathBuf,

    /// Keep the shared datastore in memory.
    #[arg(long, env = "HYDRA_IN_MEMORY")]
    pub in_memory: bool,

    /// First listen port; head `i` listens on `port_begin + i`.
    /// 0 lets the OS pick a port for every head.
    #[arg(long, env = "HYDRA_PORT_BEGIN", default_value_t = 0)]
    pub port_begin: u16,

    /// Address heads listen on.
    #[arg(long, env = "HYDRA_LISTEN_HOST", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub listen_host: IpAddr,

    /// Kademlia bucket size.
    #[arg(long, env = "HYDRA_BUCKET_SIZE", default_value_t = 20)]
    pub bucket_size: usize,

    /// Heads allowed to bootstrap at the same time.
    #[arg(long, env = "HYDRA_BOOTSTRAP_CONCURRENCY", default_value_t = 32)]
    pub bootstrap_concurrency: usize,

    /// Delay between starting consecutive heads, e.g. `500ms` or `2s`.
    #[arg(long, env = "HYDRA_STAGGER", value_parser = parse_duration, default_value = "0s")]
    pub stagger: Duration,

    /// Routing protocol prefix.
    #[arg(long, env = "HYDRA_PROTOCOL_PREFIX", default_value = "/ipfs")]
    pub protocol_prefix: String,

    /// Remote identity generator to take head keys from.
    #[arg(long, env = "HYDRA_IDGEN_ADDR")]
    pub idgen_addr: Option<String>,

    /// Serve this fleet's identity generator on the given address.
    #[arg(long, env = "HYDRA_IDGEN_LISTEN")]
    pub idgen_listen: Option<SocketAddr>,

    /// 32 byte hex seed for head identities. Random when unset.
    #[arg(long, env = "HYDRA_SEED", value_parser = parse_seed)]
    pub seed: Option<[u8; 32]>,

    /// Skip this many identities of the seed's sequence.
    #[arg(long, env = "HYDRA_ID_OFFSET", default_value_t = 0)]
    pub id_offset: u32,

    /// Comma separated `<multiaddr>/p2p/<peer-id>` peers to bootstrap from.
    #[arg(long, env = "HYDRA_BOOTSTRAP_PEERS", value_delimiter = ',', value_parser = parse_bootstrap_peer)]
    pub bootstrap_peers: Vec<AddrInfo>,

    #[arg(long, env = "HYDRA_LOW_WATER", default_value_t = 1200)]
    pub low_water: usize,

    #[arg(long, env = "HYDRA_HIGH_WATER", default_value_t = 1800)]
    pub high_water: usize,

    /// New connections are never trimmed within this period.
    #[arg(long, env = "HYDRA_GRACE_PERIOD", value_parser = parse_duration, default_value = "60s")]
    pub grace_period: Duration,

    #[arg(long, env = "HYDRA_FINDER_WORKERS", default_value_t = 1)]
    pub finder_workers: usize,

    #[arg(long, env = "HYDRA_FINDER_QUEUE_SIZE", default_value_t = 1000)]
    pub finder_queue_size: usize,

    /// Upper bound for one background provider lookup.
    #[arg(long, env = "HYDRA_FINDER_TIMEOUT", value_parser = parse_duration, default_value = "10s")]
    pub finder_timeout: Duration,

    /// How long a fruitless lookup suppresses new ones for the same key.
    #[arg(long, env = "HYDRA_NEGATIVE_TTL", value_parser = parse_duration, default_value = "60s")]
    pub negative_ttl: Duration,

    /// Do not look up providers missing from the local store.
    #[arg(long, env = "HYDRA_DISABLE_PREFETCH")]
    pub disable_prefetch: bool,

    /// Keep expired provider records.
    #[arg(long, env = "HYDRA_DISABLE_PROVIDER_GC")]
    pub disable_provider_gc: bool,

    /// Delegated routing endpoint consulted alongside the local store.
    #[arg(long, env = "HYDRA_DELEGATE_URL")]
    pub delegate_url: Option<String>,

    /// Validate `pk` and `ipns` records.
    #[arg(long, env = "HYDRA_ENABLE_VALIDATORS")]
    pub enable_validators: bool,

    /// Admit peers that only have private addresses.
    #[arg(long, env = "HYDRA_ALLOW_PRIVATE_ADDRS")]
    pub allow_private_addrs: bool,

    /// Name prefix for head labels.
    #[arg(long, env = "HYDRA_NAME", default_value = "hydra")]
    pub name: String,

    /// How often metrics are written to the log.
    #[arg(long, env = "HYDRA_METRICS_INTERVAL", value_parser = parse_duration, default_value = "60s")]
    pub metrics_interval: Duration,
}

impl Default for HydraConfig {
    fn default() -> Self {
        let conn = ConnManagerConfig::default();
        let finder = FinderConfig::default();
        Self {
            nsybils: 1,
            db_path: PathBuf::from("hydra-belly"),
            in_memory: false,
            port_begin: 0,
            listen_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            bucket_size: 20,
            bootstrap_concurrency: 32,
            stagger: Duration::ZERO,
            protocol_prefix: "/ipfs".into(),
            idgen_addr: None,
            idgen_listen: None,
            seed: None,
            id_offset: 0,
            bootstrap_peers: Vec::new(),
            low_water: conn.low_water,
            high_water: conn.high_water,
            grace_period: conn.grace_period,
            finder_workers: finder.worker_count,
            finder_queue_size: finder.queue_size,
            finder_timeout: finder.timeout,
            negative_ttl: finder.negative_ttl,
            disable_prefetch: false,
            disable_provider_gc: false,
            delegate_url: None,
            enable_validators: false,
            allow_private_addrs: false,
            name: "hydra".into(),
            metrics_interval: Duration::from_secs(60),
        }
    }
}

impl HydraConfig {
    pub fn validate(&self) -> Result<()> {
        if self.nsybils == 0 {
            return Err(Error::Config("nsybils must be at least 1".into()));
        }
        if self.port_begin != 0 && self.port_begin as usize + self.nsybils > u16::MAX as usize + 1 {
            return Err(Error::Config(format!(
                "{} heads starting at port {} exceed the port range",
                self.nsybils, self.port_begin
            )));
        }
        if self.high_water < self.low_water {
            return Err(Error::Config(format!(
                "high water {} is below low water {}",
                self.high_water, self.low_water
            )));
        }
        if self.bucket_size == 0 {
            return Err(Error::Config("bucket size must be at least 1".into()));
        }
        if self.bootstrap_concurrency == 0 {
            return Err(Error::Config("bootstrap concurrency must be at least 1".into()));
        }
        if self.finder_workers == 0 || self.finder_queue_size == 0 {
            return Err(Error::Config("finder needs at least one worker and one queue slot".into()));
        }
        Ok(())
    }

    /// Listen address of head `index`.
    pub fn listen_addr(&self, index: usize) -> SocketAddr {
        let port = if self.port_begin == 0 {
            0
        } else {
            self.port_begin + index as u16
        };
        SocketAddr::new(self.listen_host, port)
    }

    /// Label of head `index`.
    pub fn head_name(&self, index: usize) -> String {
        format!("{}-{}", self.name, index)
    }

    pub fn finder(&self) -> FinderConfig {
        FinderConfig {
            timeout: self.finder_timeout,
            queue_size: self.finder_queue_size,
            negative_ttl: self.negative_ttl,
            worker_count: self.finder_workers,
        }
    }

    pub fn conn_manager(&self) -> ConnManagerConfig {
        ConnManagerConfig {
            low_water: self.low_water,
            high_water: self.high_water,
            grace_period: self.grace_period,
        }
    }

    pub fn dht(&self) -> DhtConfig {
        DhtConfig {
            protocol_prefix: self.protocol_prefix.clone(),
            bucket_size: self.bucket_size,
            filter_private: !self.allow_private_addrs,
            validator: self
                .enable_validators
                .then(|| Arc::new(NamespacedValidator::with_defaults()) as Arc<dyn Validator>),
            ..DhtConfig::default()
        }
    }
}

/// Parse `250ms`, `10s`, `5m`, `1h`, or a bare number of seconds.
pub fn parse_duration(raw: &str) -> std::result::Result<Duration, String> {
    let raw = raw.trim();
    let split = raw.find(|c: char| !c.is_ascii_digit()).unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration {raw:?}"))?;
    let secs = |scale: u64| {
        value
            .checked_mul(scale)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration {raw:?} is out of range"))
    };
    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "" | "s" => secs(1),
        "m" => secs(60),
        "h" => secs(3600),
        other => Err(format!("unknown duration unit {other:?} in {raw:?}")),
    }
}

fn parse_seed(raw: &str) -> std::result::Result<[u8; 32], String> {
    let bytes = hex::decode(raw.trim()).map_err(|e| format!("seed is not hex: {e}"))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| format!("seed must be 32 bytes, got {}", b.len()))
}

/// Parse `<multiaddr>/p2p/<peer-id>`.
pub fn parse_bootstrap_peer(raw: &str) -> std::result::Result<AddrInfo, String> {
    let raw = raw.trim();
    let (addr, id) = raw
        .rsplit_once("/p2p/")
        .ok_or_else(|| format!("bootstrap peer {raw:?} has no /p2p/ component"))?;
    let id: PeerId = id.parse().map_err(|e| format!("bootstrap peer {raw:?}: {e}"))?;
    let addr: Multiaddr = addr.parse().map_err(|e| format!("bootstrap peer {raw:?}: {e}"))?;
    Ok(AddrInfo::new(id, vec![addr]))
}
