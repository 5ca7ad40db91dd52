//! Error types for the overlay.

use thiserror::Error;

/// Result type for overlay operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in overlay operations.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The remote broke the protocol
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// An operation ran out of time
    #[error("Timed out")]
    Timeout,

    /// The resource limiter refused a connection
    #[error("Connection limit reached")]
    ConnectionLimit,

    /// No live connection to the peer
    #[error("Not connected: {0}")]
    NotConnected(String),

    /// The operation was cancelled
    #[error("Cancelled")]
    Cancelled,

    /// The host has shut down
    #[error("Host closed")]
    Closed,

    /// No peer had the requested record
    #[error("Not found: {0}")]
    NotFound(String),

    /// A record failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// The store does not implement the operation
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// A provider store failed
    #[error("Provider store error: {0}")]
    ProviderStore(String),

    /// Identity decoding failed
    #[error("Identity error: {0}")]
    Identity(#[from] hydra_identity::Error),

    /// Datastore failure
    #[error("Datastore error: {0}")]
    Datastore(#[from] hydra_datastore::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Timeout
    }
}
