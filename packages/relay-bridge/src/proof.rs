//! Proof service (§4.6): resolves a withdrawal to a pending, batched,
//! already-processed, or unknown state and returns a Merkle proof
//! whenever the withdrawal has made it into a batch.

use std::time::{Duration, Instant};

use relay_merkle::MerkleTree;
use relay_types::{Amount, Nonce, RecordKind, RelayError, UserAddress};
use serde::Serialize;

use crate::batch::Batch;
use crate::BridgeOrchestrator;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ProofResult {
    Pending,
    Proof {
        proof: Vec<String>,
        batch_id: u64,
        root: String,
    },
    AlreadyProcessed,
    NotFound,
}

impl BridgeOrchestrator {
    /// `GET /bridge/proof/:user/:amount/:nonce` (§4.6).
    pub async fn get_proof(&self, user: UserAddress, amount: Amount, nonce: Nonce) -> Result<ProofResult, RelayError> {
        let start = Instant::now();
        let result = self.get_proof_inner(user, amount, nonce).await;
        match &result {
            Ok(ProofResult::Proof { .. }) => {
                self.reputation
                    .record_proof_success(&self.config.relay_host, start.elapsed().as_millis() as u64)
                    .await;
            }
            Ok(_) => {}
            Err(_) => {
                self.reputation.record_proof_failure(&self.config.relay_host).await;
            }
        }
        result
    }

    async fn get_proof_inner(
        &self,
        user: UserAddress,
        amount: Amount,
        nonce: Nonce,
    ) -> Result<ProofResult, RelayError> {
        let key = Self::pending_key(user, nonce);
        if self.pending.read().await.contains_key(&key) {
            return Ok(ProofResult::Pending);
        }

        let batch_keys =
            relay_store::map_once_retrying(self.store.as_ref(), "bridge/batches", Duration::from_secs(5), &self.retry)
                .await?;
        for batch_key in batch_keys {
            let path = format!("bridge/batches/{batch_key}");
            let batch: Batch = match relay_store::get_verified(
                self.store.as_ref(),
                &path,
                RecordKind::Batch,
                self.signer.address(),
            )
            .await
            {
                Ok(b) => b,
                Err(e) => {
                    tracing::warn!(path, error = %e, "skipping unreadable batch while searching for proof");
                    continue;
                }
            };
            if let Some(idx) = batch
                .withdrawals
                .iter()
                .position(|w| w.user == user && w.amount == amount && w.nonce == nonce)
            {
                let leaves: Vec<[u8; 32]> = batch
                    .withdrawals
                    .iter()
                    .map(|w| relay_merkle::leaf(w.user, w.amount, w.nonce))
                    .collect();
                let tree = MerkleTree::build(leaves);
                let proof = tree.proof(idx);
                return Ok(ProofResult::Proof {
                    proof: proof.iter().map(hex::encode).collect(),
                    batch_id: batch.batch_id,
                    root: batch.root,
                });
            }
        }

        if self.chain.is_withdrawal_processed(user, amount, nonce).await? {
            return Ok(ProofResult::AlreadyProcessed);
        }
        Ok(ProofResult::NotFound)
    }
}
