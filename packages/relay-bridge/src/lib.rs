//! Bridge Orchestrator (C6): deposit ingestion, the withdrawal queue, the
//! batch builder, the proof service, and reconciliation — the piece that
//! ties the Balance Ledger (C5), the Chain Client (C4), the Merkle tree
//! (§4.2), the signed store (C3) and the Reputation Scorer (C9) together.

mod batch;
mod deposits;
mod proof;
mod withdrawals;

use std::collections::HashMap;
use std::sync::Arc;

use alloy::signers::local::PrivateKeySigner;
use relay_chain::ChainClient;
use relay_ledger::BalanceLedger;
use relay_lock::KeyedLockManager;
use relay_reputation::ReputationScorer;
use relay_store::{GraphStore, StoreRetry};
use relay_types::retry::RetryConfig;
use relay_types::{Amount, Nonce, UserAddress};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

pub use batch::Batch;
pub use deposits::{DepositSyncReport, ProcessedDeposit};
pub use proof::ProofResult;
pub use withdrawals::{PendingWithdrawal, WithdrawalRequest};

/// Consecutive-failure circuit breaker, same shape as the writer
/// manager's: trips after `threshold` failures in a row and pauses the
/// affected loop for `pause_duration` before resuming.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub threshold: u32,
    pub pause_duration: std::time::Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 10,
            pause_duration: std::time::Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BridgeConfig {
    pub max_withdrawal_poll_attempts: u32,
    pub relay_host: String,
    /// Hard cap on a single withdrawal (§4.6 step 1), independent of
    /// the caller's balance.
    pub max_withdrawal: Amount,
}

impl BridgeConfig {
    fn with_host(relay_host: String) -> Self {
        Self {
            max_withdrawal_poll_attempts: 5,
            relay_host,
            max_withdrawal: Amount::from_decimal("1000000000000000000000000").unwrap_or(Amount::ZERO),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::with_host("local-relay".to_string())
    }
}

pub struct BridgeOrchestrator {
    pub(crate) ledger: Arc<BalanceLedger>,
    pub(crate) chain: Arc<dyn ChainClient>,
    pub(crate) store: Arc<dyn GraphStore>,
    pub(crate) reputation: Arc<ReputationScorer>,
    pub(crate) signer: PrivateKeySigner,
    pub(crate) retry: StoreRetry,
    pub(crate) rpc_retry: RetryConfig,
    pub(crate) config: BridgeConfig,
    pub(crate) circuit_breaker: CircuitBreakerConfig,
    pub(crate) batch_lock: KeyedLockManager<&'static str>,
    pub(crate) pending: RwLock<HashMap<String, PendingWithdrawal>>,
    pub(crate) processed_deposits: RwLock<HashMap<String, ()>>,
    pub(crate) consecutive_batch_failures: std::sync::atomic::AtomicU32,
}

impl BridgeOrchestrator {
    pub fn new(
        ledger: Arc<BalanceLedger>,
        chain: Arc<dyn ChainClient>,
        store: Arc<dyn GraphStore>,
        reputation: Arc<ReputationScorer>,
        signer: PrivateKeySigner,
        relay_host: String,
    ) -> Self {
        Self {
            ledger,
            chain,
            store,
            reputation,
            signer,
            retry: StoreRetry::default(),
            rpc_retry: RetryConfig::default(),
            config: BridgeConfig::with_host(relay_host),
            circuit_breaker: CircuitBreakerConfig::default(),
            batch_lock: KeyedLockManager::new(),
            pending: RwLock::new(HashMap::new()),
            processed_deposits: RwLock::new(HashMap::new()),
            consecutive_batch_failures: std::sync::atomic::AtomicU32::new(0),
        }
    }

    /// Rebuilds the durable in-memory caches (processed deposits, pending
    /// withdrawals) from the signed store on startup, tolerant of the
    /// "initial-load race" (§9).
    pub async fn rebuild_from_store(&self) -> eyre::Result<()> {
        let deposit_keys = relay_store::map_once_retrying(
            self.store.as_ref(),
            "bridge/processed-deposits",
            std::time::Duration::from_secs(5),
            &self.retry,
        )
        .await?;
        {
            let mut processed = self.processed_deposits.write().await;
            for key in deposit_keys {
                processed.insert(key, ());
            }
        }

        let withdrawal_keys = relay_store::map_once_retrying(
            self.store.as_ref(),
            "bridge/pending-withdrawals",
            std::time::Duration::from_secs(5),
            &self.retry,
        )
        .await?;
        let mut restored = 0usize;
        for key in withdrawal_keys {
            let path = format!("bridge/pending-withdrawals/{key}");
            match relay_store::get_verified::<PendingWithdrawal>(
                self.store.as_ref(),
                &path,
                relay_types::RecordKind::Withdrawal,
                self.signer.address(),
            )
            .await
            {
                Ok(w) => {
                    self.pending.write().await.insert(key, w);
                    restored += 1;
                }
                Err(e) => tracing::warn!(path, error = %e, "skipping unreadable pending withdrawal"),
            }
        }
        tracing::info!(restored, "bridge orchestrator rebuilt from store");
        Ok(())
    }

    fn pending_key(user: UserAddress, nonce: Nonce) -> String {
        format!("{}-{}", user.to_hex(), nonce.0)
    }
}
