//! Withdrawal request handling (§4.6 steps 1-5): field validation,
//! nonce assignment/collision avoidance, on-chain replay check, the
//! ledger debit, and queueing the resulting pending withdrawal.

use chrono::{DateTime, Utc};
use relay_types::sign::verify_dual_signature;
use relay_types::{Amount, Nonce, RecordKind, RelayError, UserAddress};
use serde::{Deserialize, Serialize};

use crate::BridgeOrchestrator;

/// Raw withdrawal request as received over the API, before validation.
#[derive(Debug, Clone)]
pub struct WithdrawalRequest {
    pub user: UserAddress,
    pub amount: Amount,
    /// Caller-supplied nonce; `None` means "assign `lastNonce + 1`".
    pub nonce: Option<Nonce>,
    pub message: String,
    pub sea_signature: String,
    pub eth_signature: String,
    pub public_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingWithdrawal {
    pub user: UserAddress,
    pub amount: Amount,
    pub nonce: Nonce,
    pub timestamp: DateTime<Utc>,
    pub receipt_hash: String,
}

/// §4.6 step 1: signature format check. Matches the even-length-hex
/// shape of an EIP-191 signature (`0x`-prefix optional, same leniency
/// as `recover_eip191`) without depending on a regex crate for a
/// single-purpose check.
fn looks_like_signature(s: &str) -> bool {
    let hex_part = s.strip_prefix("0x").unwrap_or(s);
    !hex_part.is_empty() && hex_part.len() % 2 == 0 && hex_part.bytes().all(|b| b.is_ascii_hexdigit())
}

impl BridgeOrchestrator {
    /// The effective next nonce for `user`: `max(nonceMap[user], any
    /// pending withdrawal nonce for user)` per §4.5, so two clients
    /// calling `GET /bridge/nonce` back-to-back never collide on a
    /// withdrawal still sitting in the queue.
    pub async fn next_nonce(&self, user: UserAddress) -> Nonce {
        let last = self.ledger.nonce(user).await;
        let pending_max = self
            .pending
            .read()
            .await
            .values()
            .filter(|w| w.user == user)
            .map(|w| w.nonce)
            .max();
        match pending_max {
            Some(p) if p > last => p,
            _ => last,
        }
    }

    /// `{lastNonce, nextNonce}` for the `GET /bridge/nonce/:user` route.
    pub async fn nonce_info(&self, user: UserAddress) -> (Nonce, Nonce) {
        let last = self.ledger.nonce(user).await;
        let effective = self.next_nonce(user).await;
        (last, effective.next())
    }

    pub async fn pending_withdrawals(&self) -> Vec<PendingWithdrawal> {
        self.pending.read().await.values().cloned().collect()
    }

    /// §4.6 "Withdrawal request": validates, checks on-chain replay,
    /// debits the ledger, and queues the withdrawal. If queueing fails
    /// after a successful debit, the nonce has already advanced (§7/§9)
    /// and the error says so explicitly rather than rolling back.
    pub async fn request_withdrawal(&self, req: WithdrawalRequest) -> Result<PendingWithdrawal, RelayError> {
        if req.amount.is_zero() {
            return Err(RelayError::InvalidInput("withdrawal amount must be positive".into()));
        }
        if req.amount > self.config.max_withdrawal {
            return Err(RelayError::InvalidInput("withdrawal amount exceeds the configured cap".into()));
        }
        if req.message.is_empty() || req.sea_signature.is_empty() || req.eth_signature.is_empty() || req.public_key.is_empty()
        {
            return Err(RelayError::InvalidInput(
                "message, SEA signature, Ethereum signature, and public key are all required".into(),
            ));
        }
        if !looks_like_signature(&req.sea_signature) || !looks_like_signature(&req.eth_signature) {
            return Err(RelayError::InvalidInput("malformed signature format".into()));
        }
        verify_dual_signature(req.message.as_bytes(), &req.eth_signature, &req.sea_signature, req.user)?;

        let effective_last = self.next_nonce(req.user).await;
        let nonce = match req.nonce {
            Some(n) if n > effective_last => n,
            Some(_) => {
                return Err(RelayError::NonceTooLow {
                    last_nonce: effective_last.0,
                })
            }
            None => effective_last.next(),
        };

        if self.chain.is_withdrawal_processed(req.user, req.amount, nonce).await? {
            return Err(RelayError::AlreadyProcessed);
        }

        let receipt = self.ledger.debit(req.user, req.amount, nonce).await?;

        let pending = PendingWithdrawal {
            user: req.user,
            amount: req.amount,
            nonce,
            timestamp: Utc::now(),
            receipt_hash: receipt.receipt_hash,
        };
        let key = Self::pending_key(req.user, nonce);
        let path = format!("bridge/pending-withdrawals/{key}");
        match relay_store::put_signed(
            self.store.as_ref(),
            &path,
            RecordKind::Withdrawal,
            pending.clone(),
            &self.signer,
            &self.retry,
        )
        .await
        {
            Ok(()) => {
                self.pending.write().await.insert(key, pending.clone());
                Ok(pending)
            }
            Err(e) => Err(RelayError::Upstream(format!(
                "balance debited but queue write failed (receipt {}): {e}",
                pending.receipt_hash
            ))),
        }
    }
}
