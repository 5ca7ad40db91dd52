//! Error types for identity generation.

use thiserror::Error;

/// Result type for identity generation.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while generating or delegating identities.
#[derive(Debug, Error)]
pub enum Error {
    /// Key derivation or decoding failed
    #[error("Identity error: {0}")]
    Identity(#[from] hydra_identity::Error),

    /// The 32-bit salt counter ran out
    #[error("Salt counter exhausted")]
    CounterExhausted,

    /// The delegate answered with an unexpected status
    #[error("Unexpected delegate status: {status}")]
    Delegate { status: u16 },

    /// Transport failure talking to the delegate
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A key on the wire could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),
}
