//! Duplicate-Request Guard (C10): a short-window idempotency filter in
//! front of mutating operations.

use std::time::Duration;

use relay_types::cache::BoundedCache;
use relay_types::RelayError;
use tokio::sync::Mutex;

const DEFAULT_WINDOW: Duration = Duration::from_secs(5);
const MAX_TRACKED_KEYS: usize = 10_000;

/// Key = `method|path|clientIP|resourceId` (§4.10). A repeat of the same
/// key within the window is refused with `conflict`; the map is
/// garbage-collected on every call via `BoundedCache`'s own eviction.
pub struct DuplicateGuard {
    seen: Mutex<BoundedCache<String, ()>>,
    window: Duration,
}

impl Default for DuplicateGuard {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl DuplicateGuard {
    pub fn new(window: Duration) -> Self {
        Self {
            seen: Mutex::new(BoundedCache::new(MAX_TRACKED_KEYS, window)),
            window,
        }
    }

    pub fn key(method: &str, path: &str, client_ip: &str, resource_id: &str) -> String {
        format!("{method}|{path}|{client_ip}|{resource_id}")
    }

    /// Returns `Ok(())` the first time `key` is seen within the window,
    /// `Err(conflict)` on a repeat. Recording happens unconditionally so
    /// the window restarts from the most recent attempt, matching the
    /// "within the window, refuse; outside it, accept" rule.
    pub async fn check(&self, key: &str) -> Result<(), RelayError> {
        let mut seen = self.seen.lock().await;
        if seen.contains(&key.to_string()) {
            return Err(RelayError::Conflict(format!("duplicate request: {key}")));
        }
        seen.insert(key.to_string(), ());
        Ok(())
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_request_within_window_is_refused() {
        let guard = DuplicateGuard::new(Duration::from_millis(50));
        let key = DuplicateGuard::key("POST", "/withdraw", "1.2.3.4", "0xabc");
        guard.check(&key).await.unwrap();
        let err = guard.check(&key).await.unwrap_err();
        assert!(matches!(err, RelayError::Conflict(_)));
    }

    #[tokio::test]
    async fn request_outside_window_is_accepted() {
        let guard = DuplicateGuard::new(Duration::from_millis(10));
        let key = DuplicateGuard::key("POST", "/withdraw", "1.2.3.4", "0xabc");
        guard.check(&key).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(guard.check(&key).await.is_ok());
    }

    #[tokio::test]
    async fn distinct_keys_never_collide() {
        let guard = DuplicateGuard::default();
        let a = DuplicateGuard::key("POST", "/withdraw", "1.2.3.4", "0xabc");
        let b = DuplicateGuard::key("POST", "/withdraw", "1.2.3.4", "0xdef");
        guard.check(&a).await.unwrap();
        assert!(guard.check(&b).await.is_ok());
    }
}
