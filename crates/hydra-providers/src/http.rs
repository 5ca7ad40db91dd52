//! Delegated routing over HTTP.
//!
//! `GET {base}/routing/v1/providers/{cid}` answers
//! `{"Providers": [{"ID": ..., "Addrs": [...]}]}`. A 404 means no providers.
//! Records whose id or addresses do not parse are skipped.

use std::time::Instant;

use async_trait::async_trait;
use hydra_dht::ProviderStore;
use hydra_identity::{cid_from_multihash_bytes, AddrInfo, Multiaddr, PeerId};
use hydra_metrics::{measures, Metrics, TagKey, TagSet};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};

const SERVICE: &str = "http";
const GET_PROVIDERS: &str = "get_providers";

#[derive(Debug, Deserialize)]
struct ProvidersResponse {
    #[serde(rename = "Providers", default)]
    providers: Option<Vec<ProviderRecord>>,
}

#[derive(Debug, Deserialize)]
struct ProviderRecord {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Addrs", default)]
    addrs: Vec<String>,
}

impl ProviderRecord {
    fn into_addr_info(self) -> Option<AddrInfo> {
        let id: PeerId = self.id.parse().ok()?;
        let addrs: Vec<Multiaddr> = self.addrs.iter().filter_map(|a| a.parse().ok()).collect();
        Some(AddrInfo::new(id, addrs))
    }
}

/// Provider store backed by a delegated routing endpoint. Read only.
pub struct HttpProviderStore {
    base_url: String,
    client: reqwest::Client,
    metrics: Metrics,
}

impl HttpProviderStore {
    pub fn new(base_url: impl Into<String>, metrics: Metrics) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            metrics,
        }
    }

    async fn fetch(&self, key: &[u8]) -> Result<(u16, usize, Vec<AddrInfo>)> {
        let cid = cid_from_multihash_bytes(key)?;
        let url = format!("{}/routing/v1/providers/{}", self.base_url, cid);
        let response = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok((status.as_u16(), 0, Vec::new()));
        }
        if status != StatusCode::OK {
            return Err(Error::Status(status.as_u16()));
        }
        let body = response.bytes().await?;
        let parsed: ProvidersResponse = serde_json::from_slice(&body)
            .map_err(|e| Error::Store(hydra_dht::Error::Serialization(e)))?;
        let providers = parsed
            .providers
            .unwrap_or_default()
            .into_iter()
            .filter_map(ProviderRecord::into_addr_info)
            .collect();
        Ok((status.as_u16(), body.len(), providers))
    }

    fn record(&self, started: Instant, http_code: u16, error_code: &str, bytes: usize) {
        let tags = TagSet::new()
            .with(TagKey::Service, SERVICE)
            .with(TagKey::Operation, GET_PROVIDERS)
            .with(TagKey::HttpCode, http_code.to_string())
            .with(TagKey::ErrorCode, error_code);
        self.metrics.increment(&measures::DELEGATE_REQUESTS, &tags);
        self.metrics.record(
            &measures::DELEGATE_LATENCY,
            started.elapsed().as_secs_f64() * 1000.0,
            &tags,
        );
        if bytes > 0 {
            self.metrics
                .record(&measures::DELEGATE_RESPONSE_BYTES, bytes as f64, &tags);
        }
    }
}

fn error_code(e: &Error) -> &'static str {
    match e {
        Error::Http(e) if e.is_timeout() => "timeout",
        Error::Http(_) => "transport",
        Error::Status(_) => "status",
        Error::Store(_) => "decode",
        Error::Identity(_) | Error::Key(_) => "bad_key",
        Error::Cancelled => "cancelled",
    }
}

#[async_trait]
impl ProviderStore for HttpProviderStore {
    async fn add_provider(&self, _key: &[u8], _provider: AddrInfo) -> hydra_dht::Result<()> {
        Err(hydra_dht::Error::Unsupported(
            "http delegated routing does not support add_provider".into(),
        ))
    }

    async fn get_providers(&self, key: &[u8]) -> hydra_dht::Result<Vec<AddrInfo>> {
        let started = Instant::now();
        match self.fetch(key).await {
            Ok((code, bytes, providers)) => {
                self.record(started, code, "none", bytes);
                debug!(found = providers.len(), "delegated provider lookup");
                Ok(providers)
            }
            Err(e) => {
                let code = match &e {
                    Error::Status(code) => *code,
                    _ => 0,
                };
                self.record(started, code, error_code(&e), 0);
                Err(e.into())
            }
        }
    }
}
