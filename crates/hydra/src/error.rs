//! Error types for the fleet.

use thiserror::Error;

/// Result type for fleet operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur starting or running the fleet.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid options
    #[error("Config error: {0}")]
    Config(String),

    /// The shared datastore failed
    #[error("Datastore error: {0}")]
    Datastore(#[from] hydra_datastore::Error),

    /// A head's host or routing client failed
    #[error("Network error: {0}")]
    Network(#[from] hydra_dht::Error),

    /// Identity generation failed
    #[error("Identity error: {0}")]
    Identity(#[from] hydra_idgen::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
