//! Deal Engine (C7): storage-deal lifecycle
//! (`Pending -> Active -> (Expired | Terminated)`), pricing, premium-tier
//! erasure coding, and storage-proof challenges. Pin/replication and the
//! on-chain registry are external collaborators the engine drives but
//! does not own.

mod lookup;
mod proof;
pub mod pricing;

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use relay_chain::ChainClient;
use relay_ipfs::erasure::{self, ErasureConfig, ErasureMetadata};
use relay_ipfs::IpfsClient;
use relay_lock::KeyedLockManager;
use relay_reputation::ReputationScorer;
use relay_store::{get_verified, map_once_retrying, put_signed, GraphStore, StoreRetry};
use relay_types::cache::BoundedCache;
use relay_types::retry::{with_retry, RetryConfig};
use relay_types::{keccak256, Amount, RecordKind, RelayError, UserAddress};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

pub use lookup::{by_client, ClientDeal};
pub use pricing::{PriceQuote, PricingConfig, Tier, TierRate};
pub use proof::{StorageProofChallenge, StorageProofResult};

const DEALS_PATH: &str = "frozen-storage-deals";
pub(crate) const BY_CLIENT_PATH: &str = "deals-by-client";
const PENDING_CACHE_SIZE: usize = 1024;
const PENDING_CACHE_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DealStatus {
    Pending,
    Active,
    Expired,
    Terminated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deal {
    pub deal_id: String,
    pub cid: String,
    pub client: UserAddress,
    pub size_mb: u64,
    pub duration_days: u32,
    pub tier: Tier,
    pub status: DealStatus,
    pub price_usdc: Amount,
    pub features: Vec<String>,
    pub storage_overhead_percent: u32,
    pub replication_factor: u32,
    pub created_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub on_chain_deal_id: Option<String>,
    pub erasure_metadata: Option<ErasureMetadata>,
    pub warnings: Vec<String>,
}

fn deal_path(deal_id: &str) -> String {
    format!("{DEALS_PATH}/{deal_id}")
}

pub(crate) fn by_client_path(client: UserAddress, deal_id: &str) -> String {
    format!("{BY_CLIENT_PATH}/{}/{deal_id}", client.to_hex())
}

fn new_deal_id(cid: &str, client: UserAddress, now: DateTime<Utc>) -> String {
    let material = format!("{cid}:{}:{}", client.to_hex(), now.timestamp_nanos_opt().unwrap_or(0));
    hex::encode(keccak256(material.as_bytes()))
}

/// Drives the deal lifecycle. Every value-moving transition (`create`,
/// `activate`, `renew`) is serialized per `deal_id` through
/// `deal_locks`, mirroring the bridge orchestrator's per-key locking.
pub struct DealEngine {
    store: Arc<dyn GraphStore>,
    chain: Arc<dyn ChainClient>,
    ipfs: Arc<dyn IpfsClient>,
    reputation: Arc<ReputationScorer>,
    signer: PrivateKeySigner,
    retry: StoreRetry,
    rpc_retry: RetryConfig,
    pricing: PricingConfig,
    registry_address: Address,
    relay_host: String,
    pending_cache: Mutex<BoundedCache<String, Deal>>,
    deal_locks: KeyedLockManager<String>,
}

impl DealEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn GraphStore>,
        chain: Arc<dyn ChainClient>,
        ipfs: Arc<dyn IpfsClient>,
        reputation: Arc<ReputationScorer>,
        signer: PrivateKeySigner,
        registry_address: Address,
        relay_host: impl Into<String>,
    ) -> Self {
        Self {
            store,
            chain,
            ipfs,
            reputation,
            signer,
            retry: StoreRetry::default(),
            rpc_retry: RetryConfig::default(),
            pricing: PricingConfig::default(),
            registry_address,
            relay_host: relay_host.into(),
            pending_cache: Mutex::new(BoundedCache::new(PENDING_CACHE_SIZE, PENDING_CACHE_TTL)),
            deal_locks: KeyedLockManager::new(),
        }
    }

    fn signer_address(&self) -> Address {
        self.signer.address()
    }

    async fn get_deal(&self, deal_id: &str) -> Result<Deal, RelayError> {
        if let Some(deal) = self.pending_cache.lock().await.get(&deal_id.to_string()).cloned() {
            return Ok(deal);
        }
        get_verified::<Deal>(
            self.store.as_ref(),
            &deal_path(deal_id),
            RecordKind::Deal,
            self.signer_address(),
        )
        .await
    }

    async fn persist(&self, deal: &Deal) -> Result<(), RelayError> {
        put_signed(
            self.store.as_ref(),
            &deal_path(&deal.deal_id),
            RecordKind::Deal,
            deal.clone(),
            &self.signer,
            &self.retry,
        )
        .await?;
        put_signed(
            self.store.as_ref(),
            &by_client_path(deal.client, &deal.deal_id),
            RecordKind::Deal,
            deal.clone(),
            &self.signer,
            &self.retry,
        )
        .await
    }

    /// Creates a deal in `Pending` status. Does not touch the chain or
    /// IPFS; `activate` does the on-chain registration and pinning.
    pub async fn create(
        &self,
        cid: impl Into<String>,
        client: UserAddress,
        size_mb: u64,
        duration_days: u32,
        tier: Tier,
    ) -> Result<Deal, RelayError> {
        let cid = cid.into();
        if cid.trim().is_empty() {
            return Err(RelayError::InvalidInput("cid must not be empty".into()));
        }
        if size_mb == 0 {
            return Err(RelayError::InvalidInput("sizeMB must be positive".into()));
        }
        if duration_days == 0 {
            return Err(RelayError::InvalidInput("durationDays must be positive".into()));
        }

        let quote = self.pricing.price(size_mb, duration_days, tier);
        let now = Utc::now();
        let deal = Deal {
            deal_id: new_deal_id(&cid, client, now),
            cid,
            client,
            size_mb,
            duration_days,
            tier,
            status: DealStatus::Pending,
            price_usdc: quote.price_usdc,
            features: quote.features,
            storage_overhead_percent: quote.storage_overhead_percent,
            replication_factor: quote.replication_factor,
            created_at: now,
            activated_at: None,
            expires_at: None,
            on_chain_deal_id: None,
            erasure_metadata: None,
            warnings: Vec::new(),
        };

        self.persist(&deal).await?;
        self.pending_cache.lock().await.insert(deal.deal_id.clone(), deal.clone());
        Ok(deal)
    }

    /// Activates a pending deal: verifies the client's USDC allowance,
    /// registers the deal on-chain, and spawns a best-effort
    /// pin/erasure task. Pin and replication failures never roll back
    /// activation; they are recorded as warnings on a follow-up update.
    pub async fn activate(&self, deal_id: &str) -> Result<Deal, RelayError> {
        let deal_id = deal_id.to_string();
        let engine = self;
        engine
            .deal_locks
            .with_lock(deal_id.clone(), || async move { engine.activate_locked(&deal_id).await })
            .await
    }

    async fn activate_locked(&self, deal_id: &str) -> Result<Deal, RelayError> {
        let mut deal = self.get_deal(deal_id).await?;
        if deal.status != DealStatus::Pending {
            return Err(RelayError::Conflict(format!("deal {deal_id} is not pending")));
        }

        let registry_address = self.registry_address;
        let allowance = with_retry(&self.rpc_retry, |_attempt| async {
            self.chain
                .allowance_of(deal.client, registry_address)
                .await
                .map_err(Into::into)
        })
        .await
        .map_err(|e| RelayError::Upstream(format!("allowance lookup failed: {e}")))?;

        if allowance < deal.price_usdc {
            return Err(RelayError::InvalidInput(
                "client has not approved enough USDC".into(),
            ));
        }

        let deal_id_bytes = keccak256(deal.deal_id.as_bytes());
        let on_chain_id = self
            .chain
            .register_deal(
                deal_id_bytes,
                deal.client,
                &deal.cid,
                deal.size_mb,
                deal.price_usdc,
                deal.duration_days,
                Amount::ZERO,
            )
            .await?;

        let now = Utc::now();
        deal.status = DealStatus::Active;
        deal.activated_at = Some(now);
        deal.expires_at = Some(now + ChronoDuration::days(deal.duration_days as i64));
        deal.on_chain_deal_id = Some(on_chain_id.to_string());
        self.persist(&deal).await?;
        self.pending_cache.lock().await.remove(&deal.deal_id.to_string());
        self.reputation.record_deal_activated(&self.relay_host).await;

        if deal.tier != Tier::Standard {
            self.spawn_pin_and_erasure(deal.clone());
        } else {
            let cid = deal.cid.clone();
            let ipfs = self.ipfs.clone();
            tokio::spawn(async move {
                if let Err(e) = ipfs.pin_add(&cid).await {
                    tracing::warn!(cid = %cid, error = %e, "pin_add failed for standard-tier deal");
                }
            });
        }

        Ok(deal)
    }

    fn spawn_pin_and_erasure(&self, deal: Deal) {
        let ipfs = self.ipfs.clone();
        let store = self.store.clone();
        let signer_pk = self.signer.clone();
        let retry = self.retry.clone();
        let reputation = self.reputation.clone();
        let relay_host = self.relay_host.clone();
        tokio::spawn(async move {
            let config = ErasureConfig::default();
            let mut deal = deal;
            match erasure::encode_and_upload(ipfs.as_ref(), &deal.cid, &config).await {
                Ok(metadata) => {
                    deal.erasure_metadata = Some(metadata);
                }
                Err(e) => {
                    tracing::warn!(deal_id = %deal.deal_id, error = %e, "erasure encoding failed");
                    deal.warnings.push(format!("erasure encoding failed: {e}"));
                    reputation.record_deal_warning(&relay_host).await;
                }
            }
            if let Err(e) = put_signed(
                store.as_ref(),
                &deal_path(&deal.deal_id),
                RecordKind::Deal,
                deal.clone(),
                &signer_pk,
                &retry,
            )
            .await
            {
                tracing::warn!(deal_id = %deal.deal_id, error = %e, "failed to persist erasure metadata");
            }
        });
    }

    /// Extends a deal's expiry by `additional_days`, re-verifying
    /// allowance for the incremental price but without a second
    /// on-chain registration call.
    pub async fn renew(&self, deal_id: &str, additional_days: u32) -> Result<Deal, RelayError> {
        let deal_id = deal_id.to_string();
        let engine = self;
        engine
            .deal_locks
            .with_lock(deal_id.clone(), || async move {
                engine.renew_locked(&deal_id, additional_days).await
            })
            .await
    }

    async fn renew_locked(&self, deal_id: &str, additional_days: u32) -> Result<Deal, RelayError> {
        let mut deal = self.get_deal(deal_id).await?;
        if deal.status != DealStatus::Active {
            return Err(RelayError::Conflict(format!("deal {deal_id} is not active")));
        }
        if additional_days == 0 {
            return Err(RelayError::InvalidInput("additionalDays must be positive".into()));
        }

        let incremental = self.pricing.price(deal.size_mb, additional_days, deal.tier);
        let allowance = self
            .chain
            .allowance_of(deal.client, self.registry_address)
            .await?;
        if allowance < incremental.price_usdc {
            return Err(RelayError::InvalidInput(
                "client has not approved enough USDC".into(),
            ));
        }

        deal.duration_days += additional_days;
        deal.price_usdc = deal
            .price_usdc
            .checked_add(incremental.price_usdc)
            .ok_or_else(|| RelayError::InvalidInput("renewal price overflow".into()))?;
        let base = deal.expires_at.unwrap_or_else(Utc::now);
        deal.expires_at = Some(base + ChronoDuration::days(additional_days as i64));

        self.persist(&deal).await?;
        Ok(deal)
    }

    /// Terminates a deal immediately, regardless of its current status.
    pub async fn terminate(&self, deal_id: &str) -> Result<Deal, RelayError> {
        let deal_id = deal_id.to_string();
        let engine = self;
        engine
            .deal_locks
            .with_lock(deal_id.clone(), || async move { engine.terminate_locked(&deal_id).await })
            .await
    }

    async fn terminate_locked(&self, deal_id: &str) -> Result<Deal, RelayError> {
        let mut deal = self.get_deal(deal_id).await?;
        deal.status = DealStatus::Terminated;
        self.persist(&deal).await?;
        self.pending_cache.lock().await.remove(&deal.deal_id.to_string());
        Ok(deal)
    }

    pub async fn get(&self, deal_id: &str) -> Result<Deal, RelayError> {
        self.get_deal(deal_id).await
    }

    /// Marks deals whose `expires_at` has passed as `Expired`. Intended
    /// to be driven by a periodic background sweep; pure state
    /// transition, no chain interaction.
    pub async fn sweep_expired(&self) -> Result<Vec<String>, RelayError> {
        let ids = map_once_retrying(self.store.as_ref(), DEALS_PATH, Duration::from_secs(5), &self.retry).await?;
        let mut expired = Vec::new();
        let now = Utc::now();
        for deal_id in ids {
            let mut deal = match self.get_deal(&deal_id).await {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!(deal_id, error = %e, "skipping unreadable deal during expiry sweep");
                    continue;
                }
            };
            if deal.status == DealStatus::Active && deal.expires_at.map(|exp| exp <= now).unwrap_or(false) {
                deal.status = DealStatus::Expired;
                if self.persist(&deal).await.is_ok() {
                    expired.push(deal.deal_id.clone());
                }
            }
        }
        Ok(expired)
    }

    /// Returns the client's deals, reconciling the on-chain registry
    /// against local records (§4.7 `byClient`).
    pub async fn by_client(&self, client: UserAddress) -> Result<Vec<ClientDeal>, RelayError> {
        lookup::by_client(self.chain.as_ref(), self.store.as_ref(), &self.retry, client).await
    }

    /// Returns every locally-known deal pinning `cid`. Unlike
    /// `by_client` this has no on-chain reconciliation step — the
    /// registry does not index deals by CID — so it is a plain scan of
    /// the local deal set.
    pub async fn by_cid(&self, cid: &str) -> Result<Vec<Deal>, RelayError> {
        let ids = map_once_retrying(self.store.as_ref(), DEALS_PATH, Duration::from_secs(5), &self.retry).await?;
        let mut matches = Vec::new();
        for deal_id in ids {
            match self.get_deal(&deal_id).await {
                Ok(deal) if deal.cid == cid => matches.push(deal),
                Ok(_) => {}
                Err(e) => tracing::warn!(deal_id, error = %e, "skipping unreadable deal during by-cid scan"),
            }
        }
        Ok(matches)
    }

    /// Issues a storage-proof challenge and verifies the relay's
    /// response against its current IPFS content (§4.7).
    pub async fn storage_proof(
        &self,
        deal_id: &str,
        challenge: &[u8],
    ) -> Result<StorageProofResult, RelayError> {
        let deal = self.get_deal(deal_id).await?;
        proof::challenge_and_verify(self.ipfs.as_ref(), &self.reputation, &self.relay_host, &deal, challenge).await
    }
}

#[cfg(test)]
mod test_support {
    use super::*;
    use std::collections::HashMap as StdHashMap;
    use std::sync::Mutex as StdMutex;

    use alloy::primitives::U256;
    use async_trait::async_trait;
    use relay_chain::{BatchInfo, DepositEvent, OnChainWithdrawal, RelayInfo, WithdrawalEvent};
    use relay_store::MemoryGraphStore;

    pub struct FakeChain {
        pub allowances: StdMutex<StdHashMap<UserAddress, Amount>>,
        pub registered: StdMutex<Vec<(UserAddress, String)>>,
        pub client_deals: StdMutex<StdHashMap<UserAddress, Vec<U256>>>,
        pub next_deal_id: StdMutex<u64>,
    }

    impl Default for FakeChain {
        fn default() -> Self {
            Self {
                allowances: StdMutex::new(StdHashMap::new()),
                registered: StdMutex::new(Vec::new()),
                client_deals: StdMutex::new(StdHashMap::new()),
                next_deal_id: StdMutex::new(1),
            }
        }
    }

    #[async_trait]
    impl ChainClient for FakeChain {
        async fn get_current_state_root(&self) -> Result<[u8; 32], RelayError> {
            Ok([0u8; 32])
        }
        async fn get_current_batch_id(&self) -> Result<u64, RelayError> {
            Ok(0)
        }
        async fn get_batch_info(&self, batch_id: u64) -> Result<BatchInfo, RelayError> {
            Ok(BatchInfo { batch_id, root: [0u8; 32], finalized: true })
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
        ) -> Result<Vec<DepositEvent>, RelayError> {
            Ok(Vec::new())
        }
        async fn query_withdrawals(
            &self,
            _from_block: u64,
            _to_block: u64,
            _user_filter: Option<UserAddress>,
        ) -> Result<Vec<WithdrawalEvent>, RelayError> {
            Ok(Vec::new())
        }
        async fn submit_batch(
            &self,
            _root: [u8; 32],
            _withdrawals: &[OnChainWithdrawal],
            _signatures: &[String],
        ) -> Result<u64, RelayError> {
            Ok(0)
        }
        async fn register_deal(
            &self,
            _deal_id: [u8; 32],
            client: UserAddress,
            cid: &str,
            _size_mb: u64,
            _price_usdc: Amount,
            _duration_days: u32,
            _client_stake: Amount,
        ) -> Result<U256, RelayError> {
            let mut next = self.next_deal_id.lock().unwrap();
            let id = U256::from(*next);
            *next += 1;
            self.registered.lock().unwrap().push((client, cid.to_string()));
            self.client_deals.lock().unwrap().entry(client).or_default().push(id);
            Ok(id)
        }
        async fn allowance_of(&self, owner: UserAddress, _spender: Address) -> Result<Amount, RelayError> {
            Ok(self.allowances.lock().unwrap().get(&owner).copied().unwrap_or(Amount::ZERO))
        }
        async fn get_relay_info(&self, address: Address) -> Result<RelayInfo, RelayError> {
            Ok(RelayInfo { address, stake: Amount::ZERO, active: true })
        }
        async fn get_client_deals(&self, client: UserAddress) -> Result<Vec<U256>, RelayError> {
            Ok(self.client_deals.lock().unwrap().get(&client).cloned().unwrap_or_default())
        }
    }

    pub struct FakeIpfs;

    #[async_trait]
    impl IpfsClient for FakeIpfs {
        async fn add(&self, data: Vec<u8>) -> Result<String, RelayError> {
            Ok(hex::encode(keccak256(&data)))
        }
        async fn cat(&self, _cid: &str) -> Result<Vec<u8>, RelayError> {
            Ok(vec![7u8; 64])
        }
        async fn cat_range(&self, _cid: &str, _offset: u64, length: u64) -> Result<Vec<u8>, RelayError> {
            Ok(vec![7u8; length as usize])
        }
        async fn pin_add(&self, _cid: &str) -> Result<(), RelayError> {
            Ok(())
        }
        async fn pin_ls(&self, _cid: &str) -> Result<bool, RelayError> {
            Ok(true)
        }
        async fn block_stat(&self, _cid: &str) -> Result<relay_ipfs::BlockStat, RelayError> {
            Ok(relay_ipfs::BlockStat { size: 64 })
        }
        fn gateway_url(&self, cid: &str) -> String {
            format!("https://gateway.example/ipfs/{cid}")
        }
    }

    pub fn engine() -> (DealEngine, Arc<FakeChain>) {
        let chain = Arc::new(FakeChain::default());
        let engine = DealEngine::new(
            Arc::new(MemoryGraphStore::new()),
            chain.clone(),
            Arc::new(FakeIpfs),
            Arc::new(ReputationScorer::new()),
            PrivateKeySigner::random(),
            Address::repeat_byte(0x11),
            "test-relay",
        );
        (engine, chain)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::engine;
    use super::*;

    fn client() -> UserAddress {
        UserAddress::from(Address::repeat_byte(0x42))
    }

    #[tokio::test]
    async fn create_produces_a_pending_deal_with_a_price_quote() {
        let (engine, _chain) = engine();
        let deal = engine.create("bafy-example", client(), 100, 30, Tier::Standard).await.unwrap();
        assert_eq!(deal.status, DealStatus::Pending);
        assert!(!deal.price_usdc.is_zero());
    }

    #[tokio::test]
    async fn activation_without_sufficient_allowance_is_refused_and_deal_stays_pending() {
        let (engine, _chain) = engine();
        let deal = engine.create("bafy-example", client(), 100, 30, Tier::Standard).await.unwrap();

        let err = engine.activate(&deal.deal_id).await.unwrap_err();
        assert!(matches!(err, RelayError::InvalidInput(ref msg) if msg.contains("not approved enough USDC")));

        let reloaded = engine.get(&deal.deal_id).await.unwrap();
        assert_eq!(reloaded.status, DealStatus::Pending);
    }

    #[tokio::test]
    async fn activation_with_sufficient_allowance_registers_on_chain_and_activates() {
        let (engine, chain) = engine();
        let deal = engine.create("bafy-example", client(), 100, 30, Tier::Standard).await.unwrap();
        chain
            .allowances
            .lock()
            .unwrap()
            .insert(client(), Amount::from_decimal("1000000000").unwrap());

        let activated = engine.activate(&deal.deal_id).await.unwrap();
        assert_eq!(activated.status, DealStatus::Active);
        assert!(activated.on_chain_deal_id.is_some());
        assert!(activated.expires_at.is_some());
    }

    #[tokio::test]
    async fn activating_a_non_pending_deal_is_refused() {
        let (engine, chain) = engine();
        let deal = engine.create("bafy-example", client(), 100, 30, Tier::Standard).await.unwrap();
        chain
            .allowances
            .lock()
            .unwrap()
            .insert(client(), Amount::from_decimal("1000000000").unwrap());
        engine.activate(&deal.deal_id).await.unwrap();

        let err = engine.activate(&deal.deal_id).await.unwrap_err();
        assert!(matches!(err, RelayError::Conflict(_)));
    }

    #[tokio::test]
    async fn terminate_flips_status_regardless_of_current_state() {
        let (engine, _chain) = engine();
        let deal = engine.create("bafy-example", client(), 100, 30, Tier::Standard).await.unwrap();
        let terminated = engine.terminate(&deal.deal_id).await.unwrap();
        assert_eq!(terminated.status, DealStatus::Terminated);
    }

    #[tokio::test]
    async fn by_cid_finds_only_deals_pinning_that_cid() {
        let (engine, _chain) = engine();
        let wanted = engine.create("bafy-wanted", client(), 100, 30, Tier::Standard).await.unwrap();
        engine.create("bafy-other", client(), 100, 30, Tier::Standard).await.unwrap();

        let matches = engine.by_cid("bafy-wanted").await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].deal_id, wanted.deal_id);
    }
}
