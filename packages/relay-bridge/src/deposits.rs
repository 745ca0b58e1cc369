//! Deposit ingestion and balance reconciliation (§4.6).

use relay_chain::DepositEvent;
use relay_types::{Amount, RecordKind, RelayError, UserAddress};
use serde::{Deserialize, Serialize};

use crate::BridgeOrchestrator;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessedDeposit {
    pub tx_hash: String,
    pub user: UserAddress,
    pub amount: Amount,
    pub block_number: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DepositSyncReport {
    pub credited: u64,
    pub skipped_already_processed: u64,
    pub failed_durability: u64,
}

fn deposit_key(tx_hash: &str, user: UserAddress, amount: Amount) -> String {
    format!("{tx_hash}:{}:{amount}", user.to_hex())
}

impl BridgeOrchestrator {
    /// Pulls `Deposited` events for `[from_block, to_block]` and credits
    /// each one exactly once.
    pub async fn sync_deposits(
        &self,
        from_block: u64,
        to_block: u64,
        user_filter: Option<UserAddress>,
    ) -> Result<DepositSyncReport, RelayError> {
        let events = self.chain.query_deposits(from_block, to_block, user_filter).await?;
        let mut report = DepositSyncReport::default();
        for event in &events {
            match self.process_deposit_event(event).await {
                Ok(true) => report.credited += 1,
                Ok(false) => report.skipped_already_processed += 1,
                Err(e) => {
                    tracing::error!(tx_hash = %event.tx_hash, error = %e, "deposit credit did not durably confirm");
                    report.failed_durability += 1;
                }
            }
        }
        Ok(report)
    }

    /// §4.6 "depositKey = txHash:user:amount" dedupe: already-processed
    /// deposits with a nonzero balance are skipped outright; deposits
    /// whose credit never durably confirmed are retried.
    async fn process_deposit_event(&self, event: &DepositEvent) -> Result<bool, RelayError> {
        let key = deposit_key(&event.tx_hash, event.user, event.amount);
        let already_processed = self.processed_deposits.read().await.contains_key(&key);
        if already_processed && !self.ledger.balance(event.user).await.is_zero() {
            return Ok(false);
        }

        self.ledger.credit(event.user, event.amount).await?;

        let mut confirmed = false;
        for _ in 0..self.config.max_withdrawal_poll_attempts {
            if self.ledger.balance(event.user).await >= event.amount {
                confirmed = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        }
        if !confirmed {
            return Err(RelayError::Upstream("deposit credit durability not confirmed".into()));
        }

        let record = ProcessedDeposit {
            tx_hash: event.tx_hash.clone(),
            user: event.user,
            amount: event.amount,
            block_number: event.block_number,
        };
        relay_store::put_signed(
            self.store.as_ref(),
            &format!("bridge/processed-deposits/{key}"),
            RecordKind::Deposit,
            record,
            &self.signer,
            &self.retry,
        )
        .await?;
        self.processed_deposits.write().await.insert(key, ());
        Ok(true)
    }

    /// Reconciliation (§4.6): recomputes the expected balance for each
    /// user from on-chain deposits minus withdrawals over the window
    /// and, on mismatch, records a signed audit-correction entry rather
    /// than silently adjusting the ledger.
    pub async fn reconcile(
        &self,
        users: &[UserAddress],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<UserAddress>, RelayError> {
        let mut corrected = Vec::new();
        for &user in users {
            let deposits = self.chain.query_deposits(from_block, to_block, Some(user)).await?;
            let withdrawals = self.chain.query_withdrawals(from_block, to_block, Some(user)).await?;
            let total_deposits = deposits
                .iter()
                .try_fold(Amount::ZERO, |acc, d| acc.checked_add(d.amount))
                .ok_or_else(|| RelayError::Upstream("deposit total overflow during reconciliation".into()))?;
            let total_withdrawals = withdrawals
                .iter()
                .try_fold(Amount::ZERO, |acc, w| acc.checked_add(w.amount))
                .ok_or_else(|| RelayError::Upstream("withdrawal total overflow during reconciliation".into()))?;
            let expected = total_deposits.checked_sub(total_withdrawals).unwrap_or(Amount::ZERO);
            let actual = self.ledger.balance(user).await;
            if actual != expected {
                tracing::warn!(
                    user = %user.to_hex(),
                    expected = %expected,
                    actual = %actual,
                    "balance reconciliation mismatch, recording audit correction"
                );
                relay_store::put_signed(
                    self.store.as_ref(),
                    &format!("bridge/audit-corrections/{}", user.to_hex()),
                    RecordKind::AuditCorrection,
                    serde_json::json!({"user": user.to_hex(), "expected": expected.to_string(), "actual": actual.to_string()}),
                    &self.signer,
                    &self.retry,
                )
                .await?;
                corrected.push(user);
            }
        }
        Ok(corrected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::orchestrator;
    use alloy::primitives::Address;

    #[tokio::test]
    async fn deposit_credits_balance_once_per_tx() {
        let (bridge, chain) = orchestrator();
        let user = UserAddress::from(Address::from([1u8; 20]));
        chain.deposits.lock().unwrap().push(DepositEvent {
            user,
            amount: Amount::from_decimal("500").unwrap(),
            tx_hash: "0xabc".into(),
            block_number: 10,
        });

        let report = bridge.sync_deposits(0, 100, None).await.unwrap();
        assert_eq!(report.credited, 1);
        assert_eq!(bridge.ledger.balance(user).await, Amount::from_decimal("500").unwrap());

        // Same event queried again (e.g. overlapping poll window): no double credit.
        let report2 = bridge.sync_deposits(0, 100, None).await.unwrap();
        assert_eq!(report2.credited, 0);
        assert_eq!(report2.skipped_already_processed, 1);
        assert_eq!(bridge.ledger.balance(user).await, Amount::from_decimal("500").unwrap());
    }

    #[tokio::test]
    async fn reconciliation_is_noop_when_balance_matches_chain_history() {
        let (bridge, chain) = orchestrator();
        let user = UserAddress::from(Address::from([2u8; 20]));
        chain.deposits.lock().unwrap().push(DepositEvent {
            user,
            amount: Amount::from_decimal("500").unwrap(),
            tx_hash: "0xdef".into(),
            block_number: 10,
        });
        bridge.sync_deposits(0, 100, None).await.unwrap();

        let corrected = bridge.reconcile(&[user], 0, 100).await.unwrap();
        assert!(corrected.is_empty());
    }

    #[tokio::test]
    async fn reconciliation_flags_a_balance_drifted_from_chain_history() {
        let (bridge, chain) = orchestrator();
        let user = UserAddress::from(Address::from([3u8; 20]));
        chain.deposits.lock().unwrap().push(DepositEvent {
            user,
            amount: Amount::from_decimal("500").unwrap(),
            tx_hash: "0x111".into(),
            block_number: 10,
        });
        bridge.sync_deposits(0, 100, None).await.unwrap();
        // Simulate drift: credit an out-of-band amount the chain history doesn't account for.
        bridge.ledger.credit(user, Amount::from_decimal("50").unwrap()).await.unwrap();

        let corrected = bridge.reconcile(&[user], 0, 100).await.unwrap();
        assert_eq!(corrected, vec![user]);
    }
}
