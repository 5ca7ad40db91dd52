//! Error types for the datastore.

use thiserror::Error;

/// Result type for datastore operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in datastore operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// The store was closed
    #[error("Datastore closed")]
    Closed,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rocksdb::Error> for Error {
    fn from(e: rocksdb::Error) -> Self {
        Error::Storage(e.to_string())
    }
}
