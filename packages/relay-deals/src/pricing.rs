//! Deterministic pricing table (§4.7): `price(sizeMB, durationDays,
//! tier) -> {priceUSDC, features, storageOverheadPercent,
//! replicationFactor}`. The function is pure; only the configured table
//! varies between deployments.

use std::collections::HashMap;

use alloy::primitives::U256;
use relay_types::Amount;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Standard,
    Premium,
    Enterprise,
}

impl Default for Tier {
    fn default() -> Self {
        Tier::Standard
    }
}

/// Per-tier rate card. `price_per_mb_day` is in USDC atomic units
/// (10^6 per dollar), matching `Amount`'s base-unit convention.
#[derive(Debug, Clone, Copy)]
pub struct TierRate {
    pub price_per_mb_day: u64,
    pub storage_overhead_percent: u32,
    pub replication_factor: u32,
    pub erasure_coded: bool,
}

#[derive(Debug, Clone)]
pub struct PricingConfig {
    pub rates: HashMap<Tier, TierRate>,
}

impl Default for PricingConfig {
    fn default() -> Self {
        let mut rates = HashMap::new();
        rates.insert(
            Tier::Standard,
            TierRate {
                price_per_mb_day: 10,
                storage_overhead_percent: 0,
                replication_factor: 1,
                erasure_coded: false,
            },
        );
        rates.insert(
            Tier::Premium,
            TierRate {
                price_per_mb_day: 25,
                storage_overhead_percent: 40,
                replication_factor: 3,
                erasure_coded: true,
            },
        );
        rates.insert(
            Tier::Enterprise,
            TierRate {
                price_per_mb_day: 50,
                storage_overhead_percent: 40,
                replication_factor: 5,
                erasure_coded: true,
            },
        );
        Self { rates }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceQuote {
    pub price_usdc: Amount,
    pub features: Vec<String>,
    pub storage_overhead_percent: u32,
    pub replication_factor: u32,
    pub erasure_coded: bool,
}

impl PricingConfig {
    pub fn rate_for(&self, tier: Tier) -> TierRate {
        self.rates.get(&tier).copied().unwrap_or_else(|| {
            self.rates
                .get(&Tier::Standard)
                .copied()
                .expect("standard tier rate always configured")
        })
    }

    /// Pure pricing function: `price = rate · sizeMB · durationDays`.
    pub fn price(&self, size_mb: u64, duration_days: u32, tier: Tier) -> PriceQuote {
        let rate = self.rate_for(tier);
        let price_usdc = Amount::from_u256(
            U256::from(rate.price_per_mb_day) * U256::from(size_mb) * U256::from(duration_days),
        );
        let mut features = vec![format!("{size_mb}MB"), format!("{duration_days}d")];
        if rate.erasure_coded {
            features.push("erasure-coded".to_string());
        }
        if rate.replication_factor > 1 {
            features.push(format!("{}x-replicated", rate.replication_factor));
        }
        PriceQuote {
            price_usdc,
            features,
            storage_overhead_percent: rate.storage_overhead_percent,
            replication_factor: rate.replication_factor,
            erasure_coded: rate.erasure_coded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pricing_is_deterministic_and_monotone_in_size_and_duration() {
        let config = PricingConfig::default();
        let a = config.price(100, 30, Tier::Standard);
        let b = config.price(100, 30, Tier::Standard);
        assert_eq!(a, b);

        let bigger = config.price(200, 30, Tier::Standard);
        assert!(bigger.price_usdc.as_u256() > a.price_usdc.as_u256());
    }

    #[test]
    fn premium_tier_is_erasure_coded_and_replicated() {
        let config = PricingConfig::default();
        let quote = config.price(100, 30, Tier::Premium);
        assert!(quote.erasure_coded);
        assert!(quote.replication_factor > 1);
    }

    #[test]
    fn unknown_tier_falls_back_to_standard_rate() {
        let config = PricingConfig {
            rates: HashMap::new(),
        };
        let rate = config.rate_for(Tier::Premium);
        assert_eq!(rate.price_per_mb_day, 0);
    }
}
