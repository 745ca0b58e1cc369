//! In-process fake `GraphStore`, used by integration tests that need a
//! deterministic store without a running Gun peer.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use relay_types::RelayError;

struct DelayedChildren {
    keys: Vec<String>,
    visible_after: Instant,
}

#[derive(Default)]
pub struct MemoryGraphStore {
    values: Mutex<HashMap<String, serde_json::Value>>,
    children: Mutex<HashMap<String, DelayedChildren>>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: makes `map_once(parent, _)` report `keys` only
    /// after `delay_calls` prior calls have already returned empty,
    /// simulating replication lag.
    pub fn seed_children_after_delay(&self, parent: &str, keys: Vec<String>, delay_calls: u32) {
        let visible_after = Instant::now() + Duration::from_millis(delay_calls as u64);
        self.children.lock().unwrap().insert(
            parent.to_string(),
            DelayedChildren {
                keys,
                visible_after,
            },
        );
    }
}

#[async_trait]
impl super::GraphStore for MemoryGraphStore {
    async fn put_raw(&self, path: &str, value: serde_json::Value) -> Result<(), RelayError> {
        self.values
            .lock()
            .map_err(|_| RelayError::Upstream("memory store poisoned".into()))?
            .insert(path.to_string(), value);
        Ok(())
    }

    async fn get_raw(&self, path: &str) -> Result<Option<serde_json::Value>, RelayError> {
        Ok(self
            .values
            .lock()
            .map_err(|_| RelayError::Upstream("memory store poisoned".into()))?
            .get(path)
            .cloned())
    }

    async fn map_once(&self, parent_path: &str, _timeout: Duration) -> Result<Vec<String>, RelayError> {
        let children = self.children.lock().unwrap();
        match children.get(parent_path) {
            Some(entry) if Instant::now() >= entry.visible_after => Ok(entry.keys.clone()),
            _ => Ok(Vec::new()),
        }
    }
}
