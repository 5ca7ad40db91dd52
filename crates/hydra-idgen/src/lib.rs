//! Hydra Identity Generation
//!
//! Heads need identities whose DHT-IDs are spread as evenly as possible over
//! the keyspace, so that the fleet as a whole is close to as many keys as
//! possible.
//!
//! [`BalancedGenerator`] uses the two-choice strategy: derive two candidate
//! keys, measure where each would land in an [`XorTrie`](hydra_trie::XorTrie)
//! of the keys already handed out, and keep the shallower one.
//!
//! Generation is deterministic. A generator built from the same seed and
//! offset produces the same sequence of keys, so a restarted fleet comes back
//! with the same peer ids.
//!
//! A fleet can also take its identities from another process through
//! [`DelegatedGenerator`], which speaks to the routes in [`http`].

mod delegate;
mod error;
mod generator;
pub mod http;

pub use delegate::DelegatedGenerator;
pub use error::{Error, Result};
pub use generator::BalancedGenerator;

use async_trait::async_trait;
use hydra_identity::Keypair;

/// A source of head identities.
#[async_trait]
pub trait IdentityGenerator: Send + Sync {
    /// Produce a new identity and record it as live.
    async fn add_balanced(&self) -> Result<Keypair>;

    /// Forget a previously produced identity.
    async fn remove(&self, key: &Keypair) -> Result<()>;
}
