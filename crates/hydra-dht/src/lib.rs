//! # Hydra DHT
//!
//! The overlay each head participates in:
//!
//! - [`TcpHost`]: authenticated TCP connections speaking JSON-lines frames,
//!   with a connection manager and a hard connection limit
//! - [`DhtClient`]: Kademlia routing client in server mode over a
//!   k-bucket [`RoutingTable`]
//! - [`ProviderManager`]: provider records in the shared datastore
//! - [`Validator`]s for `pk` and `ipns` records
//!
//! Provider lookups are exposed through [`ContentRouting`], the seam the
//! prefetching finder drives.

mod client;
mod connmgr;
mod error;
mod host;
mod lookup;
mod peerstore;
mod provider;
mod routing_table;
mod validator;
pub mod wire;

pub use client::{ContentRouting, DhtClient, DhtConfig, RoutingTableInfo};
pub use connmgr::{ConnInfo, ConnManager, ConnManagerConfig};
pub use error::{Error, Result};
pub use host::{Direction, Host, HostConfig, NetworkEvent, NetworkListener, RequestHandler, TcpHost};
pub use peerstore::Peerstore;
pub use provider::{
    provider_record_key, providers_prefix, ProviderManager, ProviderStore, PROVIDERS_NAMESPACE,
    PROVIDER_GC_INTERVAL, PROVIDE_VALIDITY,
};
pub use routing_table::RoutingTable;
pub use validator::{IpnsRecord, IpnsValidator, NamespacedValidator, PublicKeyValidator, Validator};
