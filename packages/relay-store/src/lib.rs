//! Signed-Store Adapter (C3): read/write of authored ("frozen") records
//! in the eventually-consistent graph store.

pub mod http;
pub mod memory;

use std::time::Duration;

use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use relay_types::{RecordKind, RelayError, SignedRecord};
use serde::{de::DeserializeOwned, Serialize};

pub use http::GunHttpStore;
pub use memory::MemoryGraphStore;

/// Backoff applied to `put_signed` acknowledgement retries and to
/// `map_once`'s empty-first-pass retry (§9 "initial-load race").
#[derive(Debug, Clone)]
pub struct StoreRetry {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for StoreRetry {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

/// Abstract eventually-consistent key-value graph with signed writes.
/// Trait methods are kept non-generic (raw JSON in/out) so the trait
/// stays object-safe; typed convenience wrappers live in free functions
/// below.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn put_raw(&self, path: &str, value: serde_json::Value) -> Result<(), RelayError>;
    async fn get_raw(&self, path: &str) -> Result<Option<serde_json::Value>, RelayError>;
    /// Enumerates the keys of `parent_path`'s children as observed
    /// within `timeout`. May under-report on a slow store; callers
    /// should retry a bounded number of times if the first pass returns
    /// zero entries.
    async fn map_once(&self, parent_path: &str, timeout: Duration) -> Result<Vec<String>, RelayError>;
}

/// Signs `payload`, writes it under `path`, and retries on
/// acknowledgement failure up to `retry.attempts` times with linear
/// backoff (§4.3).
pub async fn put_signed<T>(
    store: &dyn GraphStore,
    path: &str,
    kind: RecordKind,
    payload: T,
    signer: &PrivateKeySigner,
    retry: &StoreRetry,
) -> Result<(), RelayError>
where
    T: Serialize + Send + Sync + Clone,
{
    let record = SignedRecord::sign(kind, payload, signer).await?;
    let value = serde_json::to_value(&record)
        .map_err(|e| RelayError::InvalidInput(format!("unserializable record: {e}")))?;

    let mut last_err = None;
    for attempt in 0..retry.attempts {
        match store.put_raw(path, value.clone()).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                tracing::warn!(attempt, path, error = %e, "put_signed ack failed, retrying");
                last_err = Some(e);
                tokio::time::sleep(retry.backoff).await;
            }
        }
    }
    Err(last_err.unwrap_or_else(|| RelayError::Upstream("put_signed exhausted retries".into())))
}

/// Reads `path`, verifies the signature matches `expected_signer` and
/// the record kind matches `expected_kind`. On timeout or absence,
/// returns `notFound`.
pub async fn get_verified<T>(
    store: &dyn GraphStore,
    path: &str,
    expected_kind: RecordKind,
    expected_signer: Address,
) -> Result<T, RelayError>
where
    T: DeserializeOwned + Serialize + Clone,
{
    match store.get_raw(path).await? {
        Some(value) => {
            let record: SignedRecord<T> = serde_json::from_value(value)
                .map_err(|e| RelayError::InvalidInput(format!("malformed record at {path}: {e}")))?;
            record.verify(expected_kind, expected_signer)
        }
        None => Err(RelayError::NotFound(path.to_string())),
    }
}

/// `mapOnce` tolerant of an empty first pass: retries up to
/// `retry.attempts` times with backoff if the store returns zero
/// entries, per §9's "initial-load race" note.
pub async fn map_once_retrying(
    store: &dyn GraphStore,
    parent_path: &str,
    per_call_timeout: Duration,
    retry: &StoreRetry,
) -> Result<Vec<String>, RelayError> {
    for attempt in 0..retry.attempts {
        let keys = store.map_once(parent_path, per_call_timeout).await?;
        if !keys.is_empty() || attempt + 1 == retry.attempts {
            return Ok(keys);
        }
        tracing::debug!(attempt, parent_path, "map_once returned zero entries, retrying");
        tokio::time::sleep(retry.backoff).await;
    }
    Ok(Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_types::UserAddress;
    use serde::Deserialize;

    #[derive(Clone, Serialize, Deserialize, PartialEq, Debug)]
    struct Dummy {
        value: u64,
    }

    #[tokio::test]
    async fn put_then_get_verified_round_trips() {
        let store = MemoryGraphStore::new();
        let signer = PrivateKeySigner::random();
        put_signed(
            &store,
            "bridge/balances-index/0xabc",
            RecordKind::Balance,
            Dummy { value: 42 },
            &signer,
            &StoreRetry::default(),
        )
        .await
        .unwrap();

        let got: Dummy = get_verified(
            &store,
            "bridge/balances-index/0xabc",
            RecordKind::Balance,
            signer.address(),
        )
        .await
        .unwrap();
        assert_eq!(got, Dummy { value: 42 });
    }

    #[tokio::test]
    async fn get_verified_rejects_mismatched_signer() {
        let store = MemoryGraphStore::new();
        let signer = PrivateKeySigner::random();
        let other = PrivateKeySigner::random();
        put_signed(
            &store,
            "p",
            RecordKind::Balance,
            Dummy { value: 1 },
            &signer,
            &StoreRetry::default(),
        )
        .await
        .unwrap();

        let result: Result<Dummy, _> =
            get_verified(&store, "p", RecordKind::Balance, other.address()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn get_verified_reports_not_found_for_unknown_path() {
        let store = MemoryGraphStore::new();
        let result: Result<Dummy, _> =
            get_verified(&store, "nope", RecordKind::Balance, Address::ZERO).await;
        assert!(matches!(result, Err(RelayError::NotFound(_))));
    }

    #[tokio::test]
    async fn map_once_retrying_eventually_returns_late_entries() {
        let store = MemoryGraphStore::new();
        store.seed_children_after_delay("parent", vec!["a".into(), "b".into()], 2);
        let keys = map_once_retrying(
            &store,
            "parent",
            Duration::from_millis(50),
            &StoreRetry {
                attempts: 5,
                backoff: Duration::from_millis(1),
            },
        )
        .await
        .unwrap();
        assert_eq!(keys.len(), 2);
    }
}
