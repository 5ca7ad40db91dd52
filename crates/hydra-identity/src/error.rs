//! Error types for hydra-identity.

use thiserror::Error;

/// Result type for identity operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while deriving or decoding identities.
#[derive(Debug, Error)]
pub enum Error {
    /// A key could not be decoded.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Key derivation failed.
    #[error("key derivation failed: {0}")]
    Derivation(String),

    /// A peer id could not be decoded.
    #[error("invalid peer id: {0}")]
    InvalidPeerId(String),

    /// A multihash could not be decoded.
    #[error("invalid multihash: {0}")]
    InvalidMultihash(String),

    /// A multiaddr could not be parsed.
    #[error("invalid multiaddr {addr:?}: {reason}")]
    InvalidMultiaddr { addr: String, reason: String },
}
