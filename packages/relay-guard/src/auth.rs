//! Auth Gate (C11): timing-safe admin-token comparison, SHA-256 API-key
//! lookup, and a per-IP failed-attempt rate limit.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use relay_types::RelayError;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;

const DEFAULT_RATE_LIMIT_ATTEMPTS: u32 = 5;
const DEFAULT_RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct ApiKeyRecord {
    pub user: String,
    pub expires_at: Option<DateTime<Utc>>,
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Constant-time-over-equal-length comparison. Unequal-length inputs
/// are rejected immediately (the length check itself is not secret and
/// need not be constant-time; only the byte-content comparison is).
fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

struct RateWindow {
    attempts: Vec<Instant>,
}

/// Per-IP sliding-window failed-attempt tracker plus admin-token and
/// API-key verification.
pub struct AuthGate {
    admin_token_hash: String,
    api_keys: RwLock<HashMap<String, ApiKeyRecord>>,
    failed_attempts: RwLock<HashMap<String, RateWindow>>,
    rate_limit_attempts: u32,
    rate_limit_window: Duration,
}

impl AuthGate {
    pub fn new(admin_token: &str) -> Self {
        Self {
            admin_token_hash: sha256_hex(admin_token),
            api_keys: RwLock::new(HashMap::new()),
            failed_attempts: RwLock::new(HashMap::new()),
            rate_limit_attempts: DEFAULT_RATE_LIMIT_ATTEMPTS,
            rate_limit_window: DEFAULT_RATE_LIMIT_WINDOW,
        }
    }

    pub fn with_rate_limit(mut self, attempts: u32, window: Duration) -> Self {
        self.rate_limit_attempts = attempts;
        self.rate_limit_window = window;
        self
    }

    pub async fn register_api_key(&self, raw_key: &str, user: impl Into<String>, expires_at: Option<DateTime<Utc>>) {
        let hash = sha256_hex(raw_key);
        self.api_keys.write().await.insert(hash, ApiKeyRecord { user: user.into(), expires_at });
    }

    /// Extracts the admin token from an `Authorization: Bearer <t>`
    /// header value if present, else falls back to a custom `token`
    /// header value. Bearer wins when both are supplied (§4.11).
    pub fn extract_admin_token<'a>(bearer: Option<&'a str>, custom_header: Option<&'a str>) -> Option<&'a str> {
        bearer
            .and_then(|v| v.strip_prefix("Bearer "))
            .or(bearer)
            .filter(|v| !v.is_empty())
            .or(custom_header)
    }

    /// Verifies `token` against the admin secret, subject to the per-IP
    /// failed-attempt rate limit. While an IP is blocked, every attempt
    /// from it fails immediately regardless of token validity.
    pub async fn check_admin(&self, token: &str, client_ip: &str) -> Result<(), RelayError> {
        if self.is_rate_limited(client_ip).await {
            return Err(RelayError::Unauthorized("too many failed attempts, try again later".into()));
        }
        if constant_time_eq(&sha256_hex(token), &self.admin_token_hash) {
            self.clear_failures(client_ip).await;
            Ok(())
        } else {
            self.record_failure(client_ip).await;
            Err(RelayError::Unauthorized("invalid admin token".into()))
        }
    }

    /// Verifies a user API key (`shogun-api-<random>`), subject to the
    /// same per-IP rate limit. Returns the associated user identity on
    /// success.
    pub async fn check_api_key(&self, raw_key: &str, client_ip: &str) -> Result<String, RelayError> {
        if self.is_rate_limited(client_ip).await {
            return Err(RelayError::Unauthorized("too many failed attempts, try again later".into()));
        }
        let hash = sha256_hex(raw_key);
        let keys = self.api_keys.read().await;
        let record = keys.iter().find(|(stored_hash, _)| constant_time_eq(stored_hash, &hash)).map(|(_, r)| r.clone());
        drop(keys);

        match record {
            Some(r) if r.expires_at.map(|exp| exp > Utc::now()).unwrap_or(true) => {
                self.clear_failures(client_ip).await;
                Ok(r.user)
            }
            Some(_) => {
                self.record_failure(client_ip).await;
                Err(RelayError::Unauthorized("API key expired".into()))
            }
            None => {
                self.record_failure(client_ip).await;
                Err(RelayError::Unauthorized("unknown API key".into()))
            }
        }
    }

    async fn is_rate_limited(&self, client_ip: &str) -> bool {
        let mut attempts = self.failed_attempts.write().await;
        match attempts.get_mut(client_ip) {
            Some(window) => {
                let cutoff = Instant::now() - self.rate_limit_window;
                window.attempts.retain(|&t| t >= cutoff);
                window.attempts.len() >= self.rate_limit_attempts as usize
            }
            None => false,
        }
    }

    async fn record_failure(&self, client_ip: &str) {
        let mut attempts = self.failed_attempts.write().await;
        let window = attempts.entry(client_ip.to_string()).or_insert_with(|| RateWindow { attempts: Vec::new() });
        let cutoff = Instant::now() - self.rate_limit_window;
        window.attempts.retain(|&t| t >= cutoff);
        window.attempts.push(Instant::now());
    }

    async fn clear_failures(&self, client_ip: &str) {
        self.failed_attempts.write().await.remove(client_ip);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn correct_admin_token_succeeds() {
        let gate = AuthGate::new("super-secret");
        assert!(gate.check_admin("super-secret", "1.2.3.4").await.is_ok());
    }

    #[tokio::test]
    async fn wrong_admin_token_is_rejected() {
        let gate = AuthGate::new("super-secret");
        assert!(gate.check_admin("wrong", "1.2.3.4").await.is_err());
    }

    #[tokio::test]
    async fn repeated_failures_trip_the_rate_limit_even_with_the_right_token() {
        let gate = AuthGate::new("super-secret").with_rate_limit(3, Duration::from_secs(60));
        for _ in 0..3 {
            assert!(gate.check_admin("wrong", "9.9.9.9").await.is_err());
        }
        let err = gate.check_admin("super-secret", "9.9.9.9").await.unwrap_err();
        assert!(matches!(err, RelayError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn rate_limit_is_scoped_per_ip() {
        let gate = AuthGate::new("super-secret").with_rate_limit(1, Duration::from_secs(60));
        assert!(gate.check_admin("wrong", "1.1.1.1").await.is_err());
        assert!(gate.check_admin("super-secret", "2.2.2.2").await.is_ok());
    }

    #[tokio::test]
    async fn api_key_round_trips_and_rejects_unknown() {
        let gate = AuthGate::new("admin");
        gate.register_api_key("shogun-api-abc123", "alice", None).await;
        let user = gate.check_api_key("shogun-api-abc123", "1.2.3.4").await.unwrap();
        assert_eq!(user, "alice");
        assert!(gate.check_api_key("shogun-api-nope", "1.2.3.4").await.is_err());
    }

    #[tokio::test]
    async fn expired_api_key_is_rejected() {
        let gate = AuthGate::new("admin");
        gate.register_api_key("shogun-api-old", "bob", Some(Utc::now() - chrono::Duration::seconds(10))).await;
        let err = gate.check_api_key("shogun-api-old", "1.2.3.4").await.unwrap_err();
        assert!(matches!(err, RelayError::Unauthorized(_)));
    }

    #[test]
    fn extract_admin_token_prefers_bearer() {
        let token = AuthGate::extract_admin_token(Some("Bearer abc"), Some("xyz"));
        assert_eq!(token, Some("abc"));
        let token = AuthGate::extract_admin_token(None, Some("xyz"));
        assert_eq!(token, Some("xyz"));
    }

    #[test]
    fn hashing_admin_token_is_deterministic_64_hex() {
        let h = sha256_hex("some-admin-token");
        assert_eq!(h.len(), 64);
        assert_eq!(h, sha256_hex("some-admin-token"));
    }
}
