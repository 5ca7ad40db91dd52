//! # Hydra Providers
//!
//! The provider-record pipeline shared by every head.
//!
//! ## Store chain
//!
//! Stages implement [`hydra_dht::ProviderStore`] and compose freely:
//!
//! - [`CachingProviderStore`]: read one store, prefetch into another on a miss
//! - [`CombiningProviderStore`]: concurrent fan-out over several stores
//! - [`HttpProviderStore`]: delegated routing over HTTP, read only
//! - [`NoopProviderStore`], [`AddProviderNotSupported`]
//!
//! ## Prefetching
//!
//! [`AsyncProvidersFinder`] runs bounded, deduplicated upstream lookups with
//! a [`NegativeCache`] for recent misses. [`QueryProxy`] hooks the shared
//! datastore so that an empty local provider query starts one.

mod error;
mod finder;
mod http;
mod keys;
mod negative_cache;
mod proxy;
mod stores;
#[cfg(test)]
mod testing;

pub use error::{Error, KeyError, Result};
pub use finder::{AsyncProvidersFinder, FindOutcome, FinderConfig, OnProvider, FINDER_METRICS_INTERVAL};
pub use http::HttpProviderStore;
pub use keys::provider_key_to_cid;
pub use negative_cache::NegativeCache;
pub use proxy::QueryProxy;
pub use stores::{
    cache_writer, AddProviderNotSupported, CachingProviderStore, CombiningProviderStore, NoopProviderStore,
    RouterSlot,
};
