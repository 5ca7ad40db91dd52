//! Error types for the provider pipeline.

use thiserror::Error;

/// Result type for provider pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Ways a provider-record key fails to name a CID.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// Fewer than two path segments
    #[error("Not enough namespaces in {0}")]
    NotEnoughNamespaces(String),

    /// The multihash segment is not unpadded base32
    #[error("Invalid base32 in {key}: {reason}")]
    InvalidBase32 { key: String, reason: String },

    /// The decoded bytes are neither a multihash nor a CID
    #[error("Invalid CID in {key}: {reason}")]
    InvalidCid { key: String, reason: String },
}

/// Errors that can occur in the provider pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// Provider key codec error
    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The delegate answered with an unexpected status
    #[error("Delegate returned status {0}")]
    Status(u16),

    /// The lookup was cancelled
    #[error("Cancelled")]
    Cancelled,

    /// Identity decoding failed
    #[error("Identity error: {0}")]
    Identity(#[from] hydra_identity::Error),

    /// A provider store in the chain failed
    #[error("Provider store error: {0}")]
    Store(#[from] hydra_dht::Error),
}

impl From<Error> for hydra_dht::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Store(inner) => inner,
            Error::Cancelled => hydra_dht::Error::Cancelled,
            Error::Identity(inner) => hydra_dht::Error::Identity(inner),
            other => hydra_dht::Error::ProviderStore(other.to_string()),
        }
    }
}
