//! Batch builder (§4.6): drains the pending-withdrawal set, orders it
//! canonically, builds a Merkle tree over the withdrawals, submits the
//! root on-chain, and persists the resulting batch record.

use std::sync::atomic::Ordering;

use chrono::{DateTime, Utc};
use relay_chain::OnChainWithdrawal;
use relay_merkle::MerkleTree;
use relay_types::RecordKind;
use serde::{Deserialize, Serialize};

use crate::withdrawals::PendingWithdrawal;
use crate::BridgeOrchestrator;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Batch {
    pub batch_id: u64,
    pub root: String,
    pub withdrawals: Vec<PendingWithdrawal>,
    pub timestamp: DateTime<Utc>,
    pub finalized: bool,
}

impl BridgeOrchestrator {
    /// Runs one batch-builder pass. Single-flight via `batch_lock` so a
    /// scheduled tick and a manually-triggered run never race each
    /// other onto the same on-chain nonce.
    pub async fn run_batch_builder(&self) -> eyre::Result<Option<Batch>> {
        if self.consecutive_batch_failures.load(Ordering::SeqCst) >= self.circuit_breaker.threshold {
            tracing::warn!("batch builder circuit breaker open, skipping this pass");
            return Ok(None);
        }
        let this = self;
        this.batch_lock
            .with_lock("batch", || async { this.build_and_submit_batch().await })
            .await
    }

    async fn build_and_submit_batch(&self) -> eyre::Result<Option<Batch>> {
        let mut withdrawals: Vec<PendingWithdrawal> = self.pending.read().await.values().cloned().collect();
        if withdrawals.is_empty() {
            return Ok(None);
        }
        withdrawals.sort_by(|a, b| (a.user.to_hex(), a.nonce.0).cmp(&(b.user.to_hex(), b.nonce.0)));

        let leaves: Vec<[u8; 32]> = withdrawals
            .iter()
            .map(|w| relay_merkle::leaf(w.user, w.amount, w.nonce))
            .collect();
        let tree = MerkleTree::build(leaves);
        let root = tree.root();

        let onchain_withdrawals: Vec<OnChainWithdrawal> = withdrawals
            .iter()
            .map(|w| OnChainWithdrawal {
                user: w.user,
                amount: w.amount,
                nonce: w.nonce,
            })
            .collect();

        match self.chain.submit_batch(root, &onchain_withdrawals, &[]).await {
            Ok(batch_id) => {
                let batch = Batch {
                    batch_id,
                    root: hex::encode(root),
                    withdrawals: withdrawals.clone(),
                    timestamp: Utc::now(),
                    finalized: false,
                };
                self.finish_batch(batch, &withdrawals).await
            }
            Err(e) if is_already_finalized(&e) => {
                let batch_id = self.chain.get_current_batch_id().await?;
                let info = self.chain.get_batch_info(batch_id).await?;
                let batch = Batch {
                    batch_id,
                    root: hex::encode(info.root),
                    withdrawals: withdrawals.clone(),
                    timestamp: Utc::now(),
                    finalized: info.finalized,
                };
                self.finish_batch(batch, &withdrawals).await
            }
            Err(e) => {
                self.consecutive_batch_failures.fetch_add(1, Ordering::SeqCst);
                self.reputation
                    .record_batch_submission_failure(&self.config.relay_host)
                    .await;
                Err(e.into())
            }
        }
    }

    async fn finish_batch(
        &self,
        batch: Batch,
        withdrawals: &[PendingWithdrawal],
    ) -> eyre::Result<Option<Batch>> {
        relay_store::put_signed(
            self.store.as_ref(),
            &format!("bridge/batches/{}", batch.batch_id),
            RecordKind::Batch,
            batch.clone(),
            &self.signer,
            &self.retry,
        )
        .await?;

        {
            let mut pending = self.pending.write().await;
            for w in withdrawals {
                pending.remove(&Self::pending_key(w.user, w.nonce));
            }
        }

        self.consecutive_batch_failures.store(0, Ordering::SeqCst);
        self.reputation
            .record_batch_submission_success(&self.config.relay_host, Some(withdrawals.len() as u64))
            .await;
        Ok(Some(batch))
    }
}

fn is_already_finalized(err: &relay_types::RelayError) -> bool {
    let msg = err.to_string().to_lowercase();
    msg.contains("already finalized") || msg.contains("alreadyfinalized")
}
