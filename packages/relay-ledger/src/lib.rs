//! Balance Ledger (C5): per-user balances and the monotonic nonce map,
//! exclusively owned here and mutated only under the Lock Manager's
//! per-user critical sections.

use std::collections::HashMap;
use std::sync::Arc;

use alloy::signers::local::PrivateKeySigner;
use chrono::Utc;
use relay_lock::KeyedLockManager;
use relay_store::{get_verified, map_once_retrying, put_signed, GraphStore, StoreRetry};
use relay_types::{keccak256, Amount, Nonce, RecordKind, RelayError, UserAddress};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BalanceRecord {
    pub user: UserAddress,
    pub balance: Amount,
    pub nonce: Nonce,
}

#[derive(Debug, Clone)]
pub struct DebitReceipt {
    pub receipt_hash: String,
    pub user: UserAddress,
    pub amount: Amount,
    pub nonce: Nonce,
    pub new_balance: Amount,
}

#[derive(Debug, Clone)]
pub struct TransferReceipt {
    pub receipt_hash: String,
    pub from_balance: Amount,
    pub to_balance: Amount,
}

fn balance_path(user: &UserAddress) -> String {
    format!("bridge/balances-index/{}", user.to_hex())
}

fn receipt_hash(parts: &[&[u8]]) -> String {
    let mut buf = Vec::new();
    for p in parts {
        buf.extend_from_slice(p);
    }
    hex::encode(keccak256(&buf))
}

pub struct BalanceLedger {
    locks: KeyedLockManager<String>,
    balances: RwLock<HashMap<UserAddress, Amount>>,
    nonces: RwLock<HashMap<UserAddress, Nonce>>,
    store: Arc<dyn GraphStore>,
    signer: PrivateKeySigner,
    retry: StoreRetry,
}

impl BalanceLedger {
    pub fn new(store: Arc<dyn GraphStore>, signer: PrivateKeySigner) -> Self {
        Self {
            locks: KeyedLockManager::new(),
            balances: RwLock::new(HashMap::new()),
            nonces: RwLock::new(HashMap::new()),
            store,
            signer,
            retry: StoreRetry::default(),
        }
    }

    /// Rebuilds the in-memory maps from the signed graph store on
    /// startup, tolerant of an under-reporting first pass (§9).
    pub async fn rebuild_from_store(&self) -> Result<usize, RelayError> {
        let keys = map_once_retrying(
            self.store.as_ref(),
            "bridge/balances-index",
            std::time::Duration::from_secs(5),
            &self.retry,
        )
        .await?;
        let mut loaded = 0;
        for key in keys {
            let path = format!("bridge/balances-index/{key}");
            match get_verified::<BalanceRecord>(
                self.store.as_ref(),
                &path,
                RecordKind::Balance,
                self.signer.address(),
            )
            .await
            {
                Ok(record) => {
                    self.balances.write().await.insert(record.user, record.balance);
                    self.nonces.write().await.insert(record.user, record.nonce);
                    loaded += 1;
                }
                Err(e) => tracing::warn!(path, error = %e, "skipping unreadable balance record"),
            }
        }
        Ok(loaded)
    }

    /// Lock-free read of the last-committed balance.
    pub async fn balance(&self, user: UserAddress) -> Amount {
        self.balances.read().await.get(&user).copied().unwrap_or(Amount::ZERO)
    }

    /// Last nonce observed for `user`.
    pub async fn nonce(&self, user: UserAddress) -> Nonce {
        self.nonces.read().await.get(&user).copied().unwrap_or(Nonce::ZERO)
    }

    async fn persist(&self, user: UserAddress, balance: Amount, nonce: Nonce) -> Result<(), RelayError> {
        put_signed(
            self.store.as_ref(),
            &balance_path(&user),
            RecordKind::Balance,
            BalanceRecord { user, balance, nonce },
            &self.signer,
            &self.retry,
        )
        .await
    }

    /// `amount = 0` is a no-op that still succeeds.
    pub async fn credit(&self, user: UserAddress, amount: Amount) -> Result<Amount, RelayError> {
        self.locks
            .with_lock(user.to_hex(), || async {
                let current = self.balances.read().await.get(&user).copied().unwrap_or(Amount::ZERO);
                let new_balance = current
                    .checked_add(amount)
                    .ok_or_else(|| RelayError::InvalidInput("credit overflow".into()))?;
                let nonce = self.nonces.read().await.get(&user).copied().unwrap_or(Nonce::ZERO);
                self.persist(user, new_balance, nonce).await?;
                self.balances.write().await.insert(user, new_balance);
                Ok(new_balance)
            })
            .await
    }

    /// Debits `amount` at `nonce`, advancing the nonce map. Persistence
    /// failure after the in-memory update is NOT rolled back (§7/§9):
    /// the nonce has already advanced and the caller must be told the
    /// balance was debited but the durable write failed.
    pub async fn debit(&self, user: UserAddress, amount: Amount, nonce: Nonce) -> Result<DebitReceipt, RelayError> {
        self.locks
            .with_lock(user.to_hex(), || async {
                let current = self.balances.read().await.get(&user).copied().unwrap_or(Amount::ZERO);
                if amount > current {
                    return Err(RelayError::InsufficientBalance);
                }
                let last_nonce = self.nonces.read().await.get(&user).copied().unwrap_or(Nonce::ZERO);
                if nonce <= last_nonce {
                    return Err(RelayError::NonceTooLow { last_nonce: last_nonce.0 });
                }
                let new_balance = current
                    .checked_sub(amount)
                    .ok_or_else(|| RelayError::InvalidInput("debit underflow".into()))?;

                // In-memory update and nonce advance happen before the
                // durable write: per §9 there is no transactional
                // wrapper across this boundary.
                self.balances.write().await.insert(user, new_balance);
                self.nonces.write().await.insert(user, nonce);

                let timestamp = Utc::now().timestamp();
                let receipt_hash = receipt_hash(&[
                    user.inner().as_slice(),
                    &amount.as_u256().to_be_bytes::<32>(),
                    &nonce.0.to_be_bytes(),
                    &timestamp.to_be_bytes(),
                ]);

                self.persist(user, new_balance, nonce).await?;

                Ok(DebitReceipt {
                    receipt_hash,
                    user,
                    amount,
                    nonce,
                    new_balance,
                })
            })
            .await
    }

    /// Transfers `amount` from `from` to `to` atomically w.r.t. any
    /// other ledger operation. The caller must already have verified
    /// the dual-signature policy over the transfer message before
    /// calling this (kept out of the ledger so the ledger stays free
    /// of signature-scheme concerns; `relay-bridge` performs the check
    /// via `relay_types::sign::verify_dual_signature`).
    pub async fn transfer(
        &self,
        from: UserAddress,
        to: UserAddress,
        amount: Amount,
    ) -> Result<TransferReceipt, RelayError> {
        if from == to {
            return Err(RelayError::InvalidInput("cannot transfer to self".into()));
        }
        if amount.is_zero() {
            return Err(RelayError::InvalidInput("transfer amount must be positive".into()));
        }
        self.locks
            .with_locks(vec![from.to_hex(), to.to_hex()], || async {
                let from_balance = self.balances.read().await.get(&from).copied().unwrap_or(Amount::ZERO);
                if amount > from_balance {
                    return Err(RelayError::InsufficientBalance);
                }
                let to_balance = self.balances.read().await.get(&to).copied().unwrap_or(Amount::ZERO);
                let new_from = from_balance
                    .checked_sub(amount)
                    .ok_or_else(|| RelayError::InvalidInput("transfer underflow".into()))?;
                let new_to = to_balance
                    .checked_add(amount)
                    .ok_or_else(|| RelayError::InvalidInput("transfer overflow".into()))?;

                let from_nonce = self.nonces.read().await.get(&from).copied().unwrap_or(Nonce::ZERO);
                let to_nonce = self.nonces.read().await.get(&to).copied().unwrap_or(Nonce::ZERO);

                // persist outside holding any additional lock beyond
                // the two already acquired for this transfer (§5).
                self.persist(from, new_from, from_nonce).await?;
                self.persist(to, new_to, to_nonce).await?;

                self.balances.write().await.insert(from, new_from);
                self.balances.write().await.insert(to, new_to);

                let receipt_hash = receipt_hash(&[
                    from.inner().as_slice(),
                    to.inner().as_slice(),
                    &amount.as_u256().to_be_bytes::<32>(),
                ]);

                Ok(TransferReceipt {
                    receipt_hash,
                    from_balance: new_from,
                    to_balance: new_to,
                })
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_store::MemoryGraphStore;
    use std::sync::Arc;

    fn ledger() -> BalanceLedger {
        let store = Arc::new(MemoryGraphStore::new());
        let signer = PrivateKeySigner::random();
        BalanceLedger::new(store, signer)
    }

    fn addr(n: u8) -> UserAddress {
        let mut bytes = [0u8; 20];
        bytes[19] = n;
        UserAddress::from(alloy::primitives::Address::from(bytes))
    }

    #[tokio::test]
    async fn credit_then_debit_round_trip() {
        let ledger = ledger();
        let user = addr(1);
        ledger.credit(user, Amount::from_decimal("1000000000000000000").unwrap()).await.unwrap();
        assert_eq!(ledger.nonce(user).await, Nonce::ZERO);

        let receipt = ledger
            .debit(user, Amount::from_decimal("400000000000000000").unwrap(), Nonce(1))
            .await
            .unwrap();
        assert_eq!(receipt.new_balance, Amount::from_decimal("600000000000000000").unwrap());
        assert_eq!(ledger.balance(user).await, Amount::from_decimal("600000000000000000").unwrap());
        assert_eq!(ledger.nonce(user).await, Nonce(1));
    }

    #[tokio::test]
    async fn replay_with_same_nonce_is_refused() {
        let ledger = ledger();
        let user = addr(1);
        ledger.credit(user, Amount::from_decimal("1000000000000000000").unwrap()).await.unwrap();
        ledger
            .debit(user, Amount::from_decimal("400000000000000000").unwrap(), Nonce(1))
            .await
            .unwrap();
        let balance_before = ledger.balance(user).await;
        let result = ledger
            .debit(user, Amount::from_decimal("400000000000000000").unwrap(), Nonce(1))
            .await;
        assert!(matches!(result, Err(RelayError::NonceTooLow { last_nonce: 1 })));
        assert_eq!(ledger.balance(user).await, balance_before);
    }

    #[tokio::test]
    async fn concurrent_debits_only_one_succeeds() {
        let ledger = Arc::new(ledger());
        let user = addr(1);
        ledger.credit(user, Amount::from_decimal("1000000000000000000").unwrap()).await.unwrap();

        let mut handles = Vec::new();
        for n in 1..=10u64 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger
                    .debit(user, Amount::from_decimal("1000000000000000000").unwrap(), Nonce(n))
                    .await
            }));
        }
        let mut successes = 0;
        for h in handles {
            if h.await.unwrap().is_ok() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
        assert!(ledger.balance(user).await.is_zero());
    }

    #[tokio::test]
    async fn transfer_conserves_sum() {
        let ledger = ledger();
        let a = addr(1);
        let b = addr(2);
        ledger.credit(a, Amount::from_decimal("1000").unwrap()).await.unwrap();
        ledger.credit(b, Amount::from_decimal("500").unwrap()).await.unwrap();
        let before = ledger.balance(a).await.as_u256() + ledger.balance(b).await.as_u256();

        ledger.transfer(a, b, Amount::from_decimal("300").unwrap()).await.unwrap();

        let after = ledger.balance(a).await.as_u256() + ledger.balance(b).await.as_u256();
        assert_eq!(before, after);
        assert_eq!(ledger.balance(a).await, Amount::from_decimal("700").unwrap());
        assert_eq!(ledger.balance(b).await, Amount::from_decimal("800").unwrap());
    }

    #[tokio::test]
    async fn transfer_to_self_is_rejected() {
        let ledger = ledger();
        let a = addr(1);
        ledger.credit(a, Amount::from_decimal("100").unwrap()).await.unwrap();
        let result = ledger.transfer(a, a, Amount::from_decimal("10").unwrap()).await;
        assert!(matches!(result, Err(RelayError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn rebuild_from_store_restores_balances() {
        let store = Arc::new(MemoryGraphStore::new());
        let signer = PrivateKeySigner::random();
        let user = addr(7);
        {
            let ledger = BalanceLedger::new(store.clone(), signer.clone());
            ledger.credit(user, Amount::from_decimal("42").unwrap()).await.unwrap();
        }
        store.seed_children_after_delay("bridge/balances-index", vec![user.to_hex()], 0);

        let reloaded = BalanceLedger::new(store, signer);
        let loaded = reloaded.rebuild_from_store().await.unwrap();
        assert_eq!(loaded, 1);
        assert_eq!(reloaded.balance(user).await, Amount::from_decimal("42").unwrap());
    }
}
