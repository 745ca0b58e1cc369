//! Prometheus metrics, surfaced at `/metrics`. Mirrors the cancel-watcher's
//! explicit registration pattern: one `IntCounter`/`IntGauge` per
//! observable, registered once at startup.

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

pub struct Metrics {
    pub withdrawals_requested_total: IntCounter,
    pub withdrawals_rejected_total: IntCounter,
    pub batches_submitted_total: IntCounter,
    pub batches_failed_total: IntCounter,
    pub deposits_credited_total: IntCounter,
    pub deals_created_total: IntCounter,
    pub deals_activated_total: IntCounter,
    pub shared_links_created_total: IntCounter,
    pub shared_link_downloads_total: IntCounter,
    pub duplicate_requests_refused_total: IntCounter,
    pub auth_failures_total: IntCounter,
    pub pending_withdrawals: IntGauge,
    pub last_batch_id: IntGauge,
    pub registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let withdrawals_requested_total = IntCounter::new(
            "relay_withdrawals_requested_total",
            "Total number of withdrawal requests accepted",
        )
        .expect("constant metric name is valid");

        let withdrawals_rejected_total = IntCounter::new(
            "relay_withdrawals_rejected_total",
            "Total number of withdrawal requests rejected",
        )
        .expect("constant metric name is valid");

        let batches_submitted_total = IntCounter::new(
            "relay_batches_submitted_total",
            "Total number of withdrawal batches submitted on-chain",
        )
        .expect("constant metric name is valid");

        let batches_failed_total = IntCounter::new(
            "relay_batches_failed_total",
            "Total number of batch submission attempts that failed",
        )
        .expect("constant metric name is valid");

        let deposits_credited_total = IntCounter::new(
            "relay_deposits_credited_total",
            "Total number of on-chain deposits credited to the ledger",
        )
        .expect("constant metric name is valid");

        let deals_created_total = IntCounter::new(
            "relay_deals_created_total",
            "Total number of storage deals created",
        )
        .expect("constant metric name is valid");

        let deals_activated_total = IntCounter::new(
            "relay_deals_activated_total",
            "Total number of storage deals activated",
        )
        .expect("constant metric name is valid");

        let shared_links_created_total = IntCounter::new(
            "relay_shared_links_created_total",
            "Total number of shared download links created",
        )
        .expect("constant metric name is valid");

        let shared_link_downloads_total = IntCounter::new(
            "relay_shared_link_downloads_total",
            "Total number of successful shared-link downloads",
        )
        .expect("constant metric name is valid");

        let duplicate_requests_refused_total = IntCounter::new(
            "relay_duplicate_requests_refused_total",
            "Total number of requests refused by the duplicate-request guard",
        )
        .expect("constant metric name is valid");

        let auth_failures_total = IntCounter::new(
            "relay_auth_failures_total",
            "Total number of failed admin-token or API-key checks",
        )
        .expect("constant metric name is valid");

        let pending_withdrawals = IntGauge::new(
            "relay_pending_withdrawals",
            "Current number of withdrawals queued but not yet batched",
        )
        .expect("constant metric name is valid");

        let last_batch_id = IntGauge::new("relay_last_batch_id", "Most recently submitted batch id")
            .expect("constant metric name is valid");

        // Registration is called exactly once at startup with constant,
        // unique metric names — expect is safe here.
        registry.register(Box::new(withdrawals_requested_total.clone())).expect("metric registration must not be called twice");
        registry.register(Box::new(withdrawals_rejected_total.clone())).expect("metric registration must not be called twice");
        registry.register(Box::new(batches_submitted_total.clone())).expect("metric registration must not be called twice");
        registry.register(Box::new(batches_failed_total.clone())).expect("metric registration must not be called twice");
        registry.register(Box::new(deposits_credited_total.clone())).expect("metric registration must not be called twice");
        registry.register(Box::new(deals_created_total.clone())).expect("metric registration must not be called twice");
        registry.register(Box::new(deals_activated_total.clone())).expect("metric registration must not be called twice");
        registry.register(Box::new(shared_links_created_total.clone())).expect("metric registration must not be called twice");
        registry.register(Box::new(shared_link_downloads_total.clone())).expect("metric registration must not be called twice");
        registry.register(Box::new(duplicate_requests_refused_total.clone())).expect("metric registration must not be called twice");
        registry.register(Box::new(auth_failures_total.clone())).expect("metric registration must not be called twice");
        registry.register(Box::new(pending_withdrawals.clone())).expect("metric registration must not be called twice");
        registry.register(Box::new(last_batch_id.clone())).expect("metric registration must not be called twice");

        Self {
            withdrawals_requested_total,
            withdrawals_rejected_total,
            batches_submitted_total,
            batches_failed_total,
            deposits_credited_total,
            deals_created_total,
            deals_activated_total,
            shared_links_created_total,
            shared_link_downloads_total,
            duplicate_requests_refused_total,
            auth_failures_total,
            pending_withdrawals,
            last_batch_id,
            registry,
        }
    }

    pub fn render(&self) -> Result<(String, Vec<u8>), prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_increment() {
        let metrics = Metrics::new();
        assert_eq!(metrics.withdrawals_requested_total.get(), 0);
        metrics.withdrawals_requested_total.inc();
        assert_eq!(metrics.withdrawals_requested_total.get(), 1);
    }

    #[test]
    fn render_produces_nonempty_prometheus_text() {
        let metrics = Metrics::new();
        metrics.deals_created_total.inc();
        let (content_type, buffer) = metrics.render().unwrap();
        assert!(content_type.contains("text"));
        assert!(!buffer.is_empty());
    }
}
