//! HTTP adapter over an external Gun peer. Gun itself is treated as an
//! abstract, eventually-consistent key-value graph exposed over HTTP
//! (put/get/list), mirroring the reqwest-JSON-query pattern the teacher
//! uses for Terra LCD lookups.

use std::time::Duration;

use async_trait::async_trait;
use relay_types::RelayError;
use reqwest::Client;

use crate::GraphStore;

pub struct GunHttpStore {
    client: Client,
    base_url: String,
}

impl GunHttpStore {
    pub fn new(base_url: impl Into<String>) -> eyre::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn node_url(&self, path: &str) -> String {
        format!("{}/node/{}", self.base_url.trim_end_matches('/'), path)
    }

    fn list_url(&self, path: &str) -> String {
        format!("{}/list/{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl GraphStore for GunHttpStore {
    async fn put_raw(&self, path: &str, value: serde_json::Value) -> Result<(), RelayError> {
        let resp = self
            .client
            .put(self.node_url(path))
            .timeout(Duration::from_secs(10))
            .json(&value)
            .send()
            .await
            .map_err(|e| RelayError::Upstream(format!("graph put failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(RelayError::Upstream(format!(
                "graph put rejected with status {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn get_raw(&self, path: &str) -> Result<Option<serde_json::Value>, RelayError> {
        let resp = self
            .client
            .get(self.node_url(path))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| RelayError::Upstream(format!("graph read failed: {e}")))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(RelayError::Upstream(format!(
                "graph read rejected with status {}",
                resp.status()
            )));
        }
        resp.json::<Option<serde_json::Value>>()
            .await
            .map_err(|e| RelayError::Upstream(format!("malformed graph response: {e}")))
    }

    async fn map_once(
        &self,
        parent_path: &str,
        timeout: Duration,
    ) -> Result<Vec<String>, RelayError> {
        let resp = self
            .client
            .get(self.list_url(parent_path))
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| RelayError::Upstream(format!("graph enumeration failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(RelayError::Upstream(format!(
                "graph enumeration rejected with status {}",
                resp.status()
            )));
        }
        resp.json::<Vec<String>>()
            .await
            .map_err(|e| RelayError::Upstream(format!("malformed enumeration response: {e}")))
    }
}
