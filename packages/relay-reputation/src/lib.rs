//! Reputation Scorer (C9): per-relay counters fed by the bridge (C6)
//! and the deal engine (C7) plus pulse telemetry, reduced to a tiered
//! score clients use when selecting a relay.
//!
//! Per §9's "placeholder stats" note, only counters this crate actually
//! tracks are exposed; nothing here is a fabricated/random stand-in.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::RwLock;

/// Weighted sub-scores summing to 1.0 (§4.9).
const WEIGHT_UPTIME: f64 = 0.25;
const WEIGHT_PROOF_SUCCESS: f64 = 0.25;
const WEIGHT_RESPONSE_TIME: f64 = 0.2;
const WEIGHT_PIN_FULFILMENT: f64 = 0.2;
const WEIGHT_LONGEVITY: f64 = 0.1;

/// Minimum number of observations (proofs + batches + pulses) before a
/// score is considered meaningful.
const MIN_SAMPLE_THRESHOLD: u64 = 5;

/// Caps the in-memory response-time sample window so a long-lived relay
/// doesn't grow this unbounded.
const MAX_RESPONSE_SAMPLES: usize = 256;

/// A response time beyond which the response-time sub-score bottoms out.
const RESPONSE_TIME_FLOOR_MS: u64 = 50;
const RESPONSE_TIME_CEIL_MS: u64 = 5_000;

/// Longevity reaches its maximum sub-score after this much observed
/// uptime.
const LONGEVITY_MAX: Duration = Duration::from_secs(30 * 24 * 3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Excellent,
    Good,
    Average,
    Poor,
    Unreliable,
}

impl Tier {
    fn from_score(score: f64) -> Tier {
        if score >= 85.0 {
            Tier::Excellent
        } else if score >= 70.0 {
            Tier::Good
        } else if score >= 50.0 {
            Tier::Average
        } else if score >= 30.0 {
            Tier::Poor
        } else {
            Tier::Unreliable
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoreBreakdown {
    pub uptime: f64,
    pub proof_success_rate: f64,
    pub response_time: f64,
    pub pin_fulfilment: f64,
    pub longevity: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReputationScore {
    pub score: f64,
    pub tier: Tier,
    pub breakdown: ScoreBreakdown,
    pub has_enough_data: bool,
}

#[derive(Debug, Clone, Default)]
struct RelayCounters {
    proofs_total: u64,
    proofs_success: u64,
    batches_total: u64,
    batches_success: u64,
    pulses_expected: u64,
    pulses_received: u64,
    pin_fulfilment_total: u64,
    pin_fulfilment_delivered: u64,
    deals_activated: u64,
    deals_warned: u64,
    response_time_samples_ms: Vec<u64>,
    first_seen: Option<Instant>,
    last_pulse: Option<Instant>,
}

impl RelayCounters {
    fn observation_count(&self) -> u64 {
        self.proofs_total + self.batches_total + self.pulses_received
    }

    fn touch_first_seen(&mut self) {
        self.first_seen.get_or_insert_with(Instant::now);
    }

    fn record_response_time(&mut self, ms: u64) {
        self.response_time_samples_ms.push(ms);
        if self.response_time_samples_ms.len() > MAX_RESPONSE_SAMPLES {
            self.response_time_samples_ms.remove(0);
        }
    }
}

/// Heartbeat telemetry reported by a relay. Fields with no real backing
/// counter are simply omitted rather than filled with placeholder
/// values (§9).
#[derive(Debug, Clone)]
pub struct Pulse {
    pub storage_used_mb: u64,
    pub ipfs_pins: u64,
}

#[derive(Default)]
pub struct ReputationScorer {
    relays: RwLock<HashMap<String, RelayCounters>>,
}

impl ReputationScorer {
    pub fn new() -> Self {
        Self::default()
    }

    async fn with_relay<F>(&self, host: &str, f: F)
    where
        F: FnOnce(&mut RelayCounters),
    {
        let mut relays = self.relays.write().await;
        let entry = relays.entry(host.to_string()).or_default();
        entry.touch_first_seen();
        f(entry);
    }

    pub async fn record_proof_success(&self, host: &str, response_ms: u64) {
        self.with_relay(host, |c| {
            c.proofs_total += 1;
            c.proofs_success += 1;
            c.record_response_time(response_ms);
        })
        .await;
    }

    pub async fn record_proof_failure(&self, host: &str) {
        self.with_relay(host, |c| c.proofs_total += 1).await;
    }

    pub async fn record_batch_submission_success(&self, host: &str, _withdrawal_count: Option<u64>) {
        self.with_relay(host, |c| {
            c.batches_total += 1;
            c.batches_success += 1;
        })
        .await;
    }

    pub async fn record_batch_submission_failure(&self, host: &str) {
        self.with_relay(host, |c| c.batches_total += 1).await;
    }

    pub async fn record_pin_fulfilment(&self, host: &str, delivered: bool) {
        self.with_relay(host, |c| {
            c.pin_fulfilment_total += 1;
            if delivered {
                c.pin_fulfilment_delivered += 1;
            }
        })
        .await;
    }

    pub async fn record_deal_activated(&self, host: &str) {
        self.with_relay(host, |c| c.deals_activated += 1).await;
    }

    pub async fn record_deal_warning(&self, host: &str) {
        self.with_relay(host, |c| c.deals_warned += 1).await;
    }

    pub async fn heartbeat(&self, host: &str, expected_since_last: u64, _pulse: Pulse) {
        self.with_relay(host, |c| {
            c.pulses_expected += expected_since_last.max(1);
            c.pulses_received += 1;
            c.last_pulse = Some(Instant::now());
        })
        .await;
    }

    pub async fn score(&self, host: &str) -> ReputationScore {
        let relays = self.relays.read().await;
        match relays.get(host) {
            Some(c) => Self::compute_score(c),
            None => ReputationScore {
                score: 0.0,
                tier: Tier::Unreliable,
                breakdown: ScoreBreakdown {
                    uptime: 0.0,
                    proof_success_rate: 0.0,
                    response_time: 0.0,
                    pin_fulfilment: 0.0,
                    longevity: 0.0,
                },
                has_enough_data: false,
            },
        }
    }

    fn compute_score(c: &RelayCounters) -> ReputationScore {
        let uptime = if c.pulses_expected == 0 {
            1.0
        } else {
            (c.pulses_received as f64 / c.pulses_expected as f64).min(1.0)
        };

        let proof_success_rate = if c.proofs_total == 0 {
            1.0
        } else {
            c.proofs_success as f64 / c.proofs_total as f64
        };

        let response_time = if c.response_time_samples_ms.is_empty() {
            1.0
        } else {
            let mut sorted = c.response_time_samples_ms.clone();
            sorted.sort_unstable();
            let p95_index = ((sorted.len() as f64) * 0.95).floor() as usize;
            let p95 = sorted[p95_index.min(sorted.len() - 1)] as f64;
            let clamped = p95.clamp(RESPONSE_TIME_FLOOR_MS as f64, RESPONSE_TIME_CEIL_MS as f64);
            1.0 - (clamped - RESPONSE_TIME_FLOOR_MS as f64)
                / (RESPONSE_TIME_CEIL_MS - RESPONSE_TIME_FLOOR_MS) as f64
        };

        let pin_fulfilment = if c.pin_fulfilment_total == 0 {
            1.0
        } else {
            c.pin_fulfilment_delivered as f64 / c.pin_fulfilment_total as f64
        };

        let longevity = c
            .first_seen
            .map(|t| (t.elapsed().as_secs_f64() / LONGEVITY_MAX.as_secs_f64()).min(1.0))
            .unwrap_or(0.0);

        let score = 100.0
            * (WEIGHT_UPTIME * uptime
                + WEIGHT_PROOF_SUCCESS * proof_success_rate
                + WEIGHT_RESPONSE_TIME * response_time
                + WEIGHT_PIN_FULFILMENT * pin_fulfilment
                + WEIGHT_LONGEVITY * longevity);

        ReputationScore {
            score,
            tier: Tier::from_score(score),
            breakdown: ScoreBreakdown {
                uptime,
                proof_success_rate,
                response_time,
                pin_fulfilment,
                longevity,
            },
            has_enough_data: c.observation_count() >= MIN_SAMPLE_THRESHOLD,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_relay_has_no_data_but_a_neutral_score() {
        let scorer = ReputationScorer::new();
        scorer.record_proof_success("relay-a", 100).await;
        let score = scorer.score("relay-a").await;
        assert!(!score.has_enough_data);
    }

    #[tokio::test]
    async fn enough_observations_flips_has_enough_data() {
        let scorer = ReputationScorer::new();
        for _ in 0..5 {
            scorer.record_proof_success("relay-a", 100).await;
        }
        let score = scorer.score("relay-a").await;
        assert!(score.has_enough_data);
    }

    #[tokio::test]
    async fn failures_pull_the_score_down() {
        let scorer = ReputationScorer::new();
        for _ in 0..10 {
            scorer.record_proof_success("good", 100).await;
        }
        for _ in 0..10 {
            scorer.record_proof_failure("bad").await;
        }
        let good = scorer.score("good").await;
        let bad = scorer.score("bad").await;
        assert!(good.score > bad.score);
    }

    #[tokio::test]
    async fn tiering_matches_thresholds() {
        assert_eq!(Tier::from_score(90.0), Tier::Excellent);
        assert_eq!(Tier::from_score(75.0), Tier::Good);
        assert_eq!(Tier::from_score(55.0), Tier::Average);
        assert_eq!(Tier::from_score(35.0), Tier::Poor);
        assert_eq!(Tier::from_score(10.0), Tier::Unreliable);
    }

    #[tokio::test]
    async fn unknown_relay_scores_as_unreliable_with_no_data() {
        let scorer = ReputationScorer::new();
        let score = scorer.score("ghost").await;
        assert_eq!(score.tier, Tier::Unreliable);
        assert!(!score.has_enough_data);
    }
}
