//! IPFS HTTP client plus erasure coding for premium-tier storage deals.
//! The IPFS daemon itself is an external collaborator (§1), treated as
//! a pin/block/cat HTTP API; this crate only wraps that surface and
//! implements the systematic Reed-Solomon code spec.md §4.7 describes.

pub mod erasure;

use std::time::Duration;

use async_trait::async_trait;
use relay_types::RelayError;
use reqwest::multipart::{Form, Part};
use reqwest::Client;

pub use erasure::{ChunkRef, ChunkRole, ErasureConfig, ErasureMetadata};

#[derive(Debug, Clone)]
pub struct BlockStat {
    pub size: u64,
}

/// Abstract IPFS pin/block/cat HTTP API (§1 external collaborator).
#[async_trait]
pub trait IpfsClient: Send + Sync {
    async fn add(&self, data: Vec<u8>) -> Result<String, RelayError>;
    async fn cat(&self, cid: &str) -> Result<Vec<u8>, RelayError>;
    /// Reads at most `length` bytes starting at `offset`, used for the
    /// storage-proof challenge's 256-byte sample.
    async fn cat_range(&self, cid: &str, offset: u64, length: u64) -> Result<Vec<u8>, RelayError>;
    async fn pin_add(&self, cid: &str) -> Result<(), RelayError>;
    async fn pin_ls(&self, cid: &str) -> Result<bool, RelayError>;
    async fn block_stat(&self, cid: &str) -> Result<BlockStat, RelayError>;
    fn gateway_url(&self, cid: &str) -> String;
}

pub struct HttpIpfsClient {
    client: Client,
    api_url: String,
    gateway_url: String,
}

impl HttpIpfsClient {
    pub fn new(api_url: impl Into<String>, gateway_url: impl Into<String>) -> eyre::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(15)).build()?;
        Ok(Self {
            client,
            api_url: api_url.into(),
            gateway_url: gateway_url.into(),
        })
    }

    fn upstream(e: impl std::fmt::Display) -> RelayError {
        RelayError::Upstream(format!("ipfs: {e}"))
    }
}

#[async_trait]
impl IpfsClient for HttpIpfsClient {
    async fn add(&self, data: Vec<u8>) -> Result<String, RelayError> {
        let form = Form::new().part("file", Part::bytes(data));
        let resp = self
            .client
            .post(format!("{}/api/v0/add", self.api_url))
            .timeout(Duration::from_secs(60))
            .multipart(form)
            .send()
            .await
            .map_err(Self::upstream)?;
        if !resp.status().is_success() {
            return Err(RelayError::Upstream(format!(
                "ipfs add rejected with status {}",
                resp.status()
            )));
        }
        let body: serde_json::Value = resp.json().await.map_err(Self::upstream)?;
        body.get("Hash")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| RelayError::Upstream("ipfs add response missing Hash".into()))
    }

    async fn cat(&self, cid: &str) -> Result<Vec<u8>, RelayError> {
        let resp = self
            .client
            .post(format!("{}/api/v0/cat?arg={cid}", self.api_url))
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(Self::upstream)?;
        if !resp.status().is_success() {
            return Err(RelayError::Upstream(format!(
                "ipfs cat rejected with status {}",
                resp.status()
            )));
        }
        resp.bytes().await.map(|b| b.to_vec()).map_err(Self::upstream)
    }

    async fn cat_range(&self, cid: &str, offset: u64, length: u64) -> Result<Vec<u8>, RelayError> {
        let resp = self
            .client
            .post(format!(
                "{}/api/v0/cat?arg={cid}&offset={offset}&length={length}",
                self.api_url
            ))
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(Self::upstream)?;
        if !resp.status().is_success() {
            return Err(RelayError::Upstream(format!(
                "ipfs cat range rejected with status {}",
                resp.status()
            )));
        }
        resp.bytes().await.map(|b| b.to_vec()).map_err(Self::upstream)
    }

    async fn pin_add(&self, cid: &str) -> Result<(), RelayError> {
        let resp = self
            .client
            .post(format!("{}/api/v0/pin/add?arg={cid}", self.api_url))
            .timeout(Duration::from_secs(60))
            .send()
            .await
            .map_err(Self::upstream)?;
        if !resp.status().is_success() {
            return Err(RelayError::Upstream(format!(
                "ipfs pin/add rejected with status {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn pin_ls(&self, cid: &str) -> Result<bool, RelayError> {
        let resp = self
            .client
            .post(format!("{}/api/v0/pin/ls?arg={cid}", self.api_url))
            .timeout(Duration::from_secs(15))
            .send()
            .await
            .map_err(Self::upstream)?;
        Ok(resp.status().is_success())
    }

    async fn block_stat(&self, cid: &str) -> Result<BlockStat, RelayError> {
        let resp = self
            .client
            .post(format!("{}/api/v0/block/stat?arg={cid}", self.api_url))
            .timeout(Duration::from_secs(15))
            .send()
            .await
            .map_err(Self::upstream)?;
        if !resp.status().is_success() {
            return Err(RelayError::Upstream(format!(
                "ipfs block/stat rejected with status {}",
                resp.status()
            )));
        }
        let body: serde_json::Value = resp.json().await.map_err(Self::upstream)?;
        let size = body
            .get("Size")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| RelayError::Upstream("ipfs block/stat response missing Size".into()))?;
        Ok(BlockStat { size })
    }

    fn gateway_url(&self, cid: &str) -> String {
        format!("{}/ipfs/{cid}", self.gateway_url.trim_end_matches('/'))
    }
}
