//! Client for a remote identity generator.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hydra_identity::Keypair;
use reqwest::StatusCode;
use tracing::debug;

use crate::error::{Error, Result};
use crate::IdentityGenerator;

/// Takes identities from another process's `/idgen` routes.
pub struct DelegatedGenerator {
    base_url: String,
    client: reqwest::Client,
}

impl DelegatedGenerator {
    /// Create a client for the generator at `base_url`, e.g.
    /// `http://127.0.0.1:7779`.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Wire form of a key: a JSON string holding base64 of the protobuf key.
pub(crate) fn encode_key(key: &Keypair) -> String {
    STANDARD.encode(key.to_protobuf())
}

pub(crate) fn decode_key(encoded: &str) -> Result<Keypair> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| Error::Decode(e.to_string()))?;
    Ok(Keypair::from_protobuf(&bytes)?)
}

#[async_trait]
impl IdentityGenerator for DelegatedGenerator {
    async fn add_balanced(&self) -> Result<Keypair> {
        let response = self.client.post(self.url("/idgen/add")).send().await?;
        if response.status() != StatusCode::OK {
            return Err(Error::Delegate {
                status: response.status().as_u16(),
            });
        }
        let encoded: String = response.json().await?;
        let key = decode_key(&encoded)?;
        debug!(peer = %key.peer_id(), "received delegated identity");
        Ok(key)
    }

    async fn remove(&self, key: &Keypair) -> Result<()> {
        let response = self
            .client
            .post(self.url("/idgen/remove"))
            .json(&encode_key(key))
            .send()
            .await?;
        if response.status() != StatusCode::NO_CONTENT {
            return Err(Error::Delegate {
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }
}
