//! Generic retry/backoff helper shared by the bridge's batch submitter
//! and the deal engine's allowance-check loop.

use std::time::Duration;

use eyre::Result;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let secs =
            self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(secs.min(self.max_backoff.as_secs_f64()))
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

/// Classifies upstream (RPC/IPFS/graph) errors for retry decisions. The
/// distinction is for logging and retry policy only, never for the
/// caller beyond a retry hint (§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Permanent,
    Unknown,
}

pub fn classify_error(error: &str) -> ErrorClass {
    let lower = error.to_lowercase();
    if lower.contains("timeout")
        || lower.contains("connection")
        || lower.contains("network")
        || lower.contains("rate limit")
        || lower.contains("too many requests")
        || lower.contains("503")
        || lower.contains("502")
        || lower.contains("temporarily unavailable")
    {
        return ErrorClass::Transient;
    }
    if lower.contains("reverted")
        || lower.contains("invalid signature")
        || lower.contains("insufficient funds")
        || lower.contains("invalid parameters")
        || lower.contains("already finalized")
    {
        return ErrorClass::Permanent;
    }
    ErrorClass::Unknown
}

/// Runs `operation` up to `config.max_retries + 1` times, sleeping with
/// exponential backoff between attempts. `Permanent` errors are not
/// retried; `Transient`/`Unknown` errors are retried until exhausted.
pub async fn with_retry<F, T, Fut>(config: &RetryConfig, mut operation: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match operation(attempt).await {
            Ok(result) => return Ok(result),
            Err(e) => {
                let class = classify_error(&e.to_string());
                if class == ErrorClass::Permanent || !config.should_retry(attempt) {
                    return Err(e);
                }
                let backoff = config.backoff_for_attempt(attempt);
                warn!(attempt, ?class, ?backoff, error = %e, "retrying after backoff");
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        let config = RetryConfig::default();
        assert_eq!(config.backoff_for_attempt(0), Duration::from_secs(2));
        assert_eq!(config.backoff_for_attempt(1), Duration::from_secs(4));
        assert_eq!(config.backoff_for_attempt(2), Duration::from_secs(8));
        assert_eq!(config.backoff_for_attempt(10), Duration::from_secs(60));
    }

    #[test]
    fn classifies_known_error_strings() {
        assert_eq!(classify_error("connection timeout"), ErrorClass::Transient);
        assert_eq!(classify_error("execution reverted"), ErrorClass::Permanent);
        assert_eq!(classify_error("something odd"), ErrorClass::Unknown);
    }

    #[tokio::test]
    async fn with_retry_gives_up_on_permanent_errors() {
        let config = RetryConfig::default();
        let mut calls = 0;
        let result: Result<()> = with_retry(&config, |_attempt| {
            calls += 1;
            async { Err(eyre::eyre!("execution reverted")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn with_retry_succeeds_after_transient_failures() {
        let config = RetryConfig {
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            ..Default::default()
        };
        let mut calls = 0;
        let result = with_retry(&config, |attempt| {
            calls += 1;
            async move {
                if attempt < 2 {
                    Err(eyre::eyre!("connection timeout"))
                } else {
                    Ok(42)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls, 3);
    }
}
