//! Hydra - a fleet of DHT heads
//!
//! Runs many routing identities ("heads") in one process. The heads share a
//! single provider-record store, so a record learned by any head is served
//! by all of them, and providers missing locally are looked up in the
//! background.
//!
//! # Architecture
//!
//! - **Config**: command line and `HYDRA_*` environment options
//! - **Head**: host, routing client and bootstrap for one identity
//! - **Fleet**: shared datastore, provider chain, heads and metrics
//! - **Periodic**: background metric tasks
//!
//! # Example
//!
//! ```no_run
//! use hydra::{Hydra, HydraConfig};
//! use hydra_metrics::Metrics;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = HydraConfig {
//!         nsybils: 4,
//!         in_memory: true,
//!         ..Default::default()
//!     };
//!     let fleet = Hydra::start(config, Metrics::with_default_views()).await?;
//!     tokio::signal::ctrl_c().await?;
//!     fleet.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod fleet;
pub mod head;
pub mod periodic;

pub use config::HydraConfig;
pub use error::{Error, Result};
pub use fleet::{FleetRouter, Hydra};
pub use head::{BootstrapStatus, Head, HeadOptions};
pub use periodic::{schedule, PeriodicTask};
