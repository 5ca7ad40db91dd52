//! Hydra XOR Trie
//!
//! A binary trie over fixed-width bit keys. Keys live only in leaves; internal
//! nodes always have exactly two children and never hold a key.
//!
//! # Depth as a balance signal
//!
//! A trie holding `n` keys has depth at least `⌈log₂ n⌉`. The identity
//! generator inserts candidate keys speculatively and keeps the one that lands
//! shallowest, which keeps the population spread evenly across the keyspace.
//! The trie itself never rebalances.

mod key;
mod trie;

pub use key::BitKey;
pub use trie::XorTrie;
