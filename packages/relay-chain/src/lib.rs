//! Chain Client (C4): a thin, non-stateful wrapper around an Ethereum
//! JSON-RPC endpoint plus ABI decoders for the settlement contract. The
//! contract itself is an external collaborator — this crate only
//! exposes the read/write surface spec.md §4.4 names and decodes its
//! events; it caches nothing but the ABI bindings.

mod contracts;

use std::time::Duration;

use alloy::network::EthereumWallet;
use alloy::primitives::{Address, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::Filter;
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use relay_types::{Amount, Nonce, RelayError, UserAddress};

pub use contracts::{Registry, ERC20};

/// Withdrawal tuple as queried/submitted on-chain, independent of the
/// in-process `Withdrawal` record the bridge orchestrator owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnChainWithdrawal {
    pub user: UserAddress,
    pub amount: Amount,
    pub nonce: Nonce,
}

#[derive(Debug, Clone)]
pub struct DepositEvent {
    pub user: UserAddress,
    pub amount: Amount,
    pub tx_hash: String,
    pub block_number: u64,
}

#[derive(Debug, Clone)]
pub struct WithdrawalEvent {
    pub user: UserAddress,
    pub amount: Amount,
    pub nonce: Nonce,
    pub tx_hash: String,
    pub block_number: u64,
}

#[derive(Debug, Clone)]
pub struct BatchInfo {
    pub batch_id: u64,
    pub root: [u8; 32],
    pub finalized: bool,
}

#[derive(Debug, Clone)]
pub struct RelayInfo {
    pub address: Address,
    pub stake: Amount,
    pub active: bool,
}

/// Non-stateful wrapper around an Ethereum JSON-RPC endpoint plus ABI
/// decoders. Implementors must not cache chain state other than ABIs;
/// callers are responsible for freshness.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn get_current_state_root(&self) -> Result<[u8; 32], RelayError>;
    async fn get_current_batch_id(&self) -> Result<u64, RelayError>;
    async fn get_batch_info(&self, batch_id: u64) -> Result<BatchInfo, RelayError>;
    async fn is_withdrawal_processed(
        &self,
        user: UserAddress,
        amount: Amount,
        nonce: Nonce,
    ) -> Result<bool, RelayError>;
    async fn query_deposits(
        &self,
        from_block: u64,
        to_block: u64,
        user_filter: Option<UserAddress>,
    ) -> Result<Vec<DepositEvent>, RelayError>;
    async fn query_withdrawals(
        &self,
        from_block: u64,
        to_block: u64,
        user_filter: Option<UserAddress>,
    ) -> Result<Vec<WithdrawalEvent>, RelayError>;
    async fn submit_batch(
        &self,
        root: [u8; 32],
        withdrawals: &[OnChainWithdrawal],
        signatures: &[String],
    ) -> Result<u64, RelayError>;
    async fn register_deal(
        &self,
        deal_id: [u8; 32],
        client: UserAddress,
        cid: &str,
        size_mb: u64,
        price_usdc: Amount,
        duration_days: u32,
        client_stake: Amount,
    ) -> Result<U256, RelayError>;
    async fn allowance_of(&self, owner: UserAddress, spender: Address) -> Result<Amount, RelayError>;
    async fn get_relay_info(&self, address: Address) -> Result<RelayInfo, RelayError>;
    async fn get_client_deals(&self, client: UserAddress) -> Result<Vec<U256>, RelayError>;
}

const RPC_TIMEOUT: Duration = Duration::from_secs(15);

/// `alloy`-backed implementation over the settlement contract's RPC
/// surface (`deposit/withdraw/submitBatch/registerDeal/grief`).
pub struct AlloyChainClient {
    registry_address: Address,
    usdc_address: Address,
    signer_address: Address,
    rpc_url: String,
    signer: PrivateKeySigner,
}

impl AlloyChainClient {
    pub fn new(
        rpc_url: impl Into<String>,
        registry_address: Address,
        usdc_address: Address,
        private_key: &str,
    ) -> eyre::Result<Self> {
        let signer: PrivateKeySigner = private_key
            .parse()
            .map_err(|e| eyre::eyre!("invalid relay private key: {e}"))?;
        Ok(Self {
            registry_address,
            usdc_address,
            signer_address: signer.address(),
            rpc_url: rpc_url.into(),
            signer,
        })
    }

    fn wallet_provider(
        &self,
    ) -> eyre::Result<impl Provider + Clone> {
        let wallet = EthereumWallet::from(self.signer.clone());
        let url = self
            .rpc_url
            .parse()
            .map_err(|e| eyre::eyre!("invalid RPC URL: {e}"))?;
        Ok(ProviderBuilder::new().wallet(wallet).on_http(url))
    }

    fn readonly_provider(&self) -> eyre::Result<impl Provider + Clone> {
        let url = self
            .rpc_url
            .parse()
            .map_err(|e| eyre::eyre!("invalid RPC URL: {e}"))?;
        Ok(ProviderBuilder::new().on_http(url))
    }

    fn upstream(err: impl std::fmt::Display) -> RelayError {
        RelayError::Upstream(err.to_string())
    }
}

#[async_trait]
impl ChainClient for AlloyChainClient {
    async fn get_current_state_root(&self) -> Result<[u8; 32], RelayError> {
        let provider = self.readonly_provider().map_err(Self::upstream)?;
        let registry = Registry::new(self.registry_address, provider);
        let root = tokio::time::timeout(RPC_TIMEOUT, registry.currentStateRoot().call())
            .await
            .map_err(|_| RelayError::Upstream("getCurrentStateRoot timed out".into()))?
            .map_err(Self::upstream)?;
        Ok(root._0.0)
    }

    async fn get_current_batch_id(&self) -> Result<u64, RelayError> {
        let provider = self.readonly_provider().map_err(Self::upstream)?;
        let registry = Registry::new(self.registry_address, provider);
        let id = tokio::time::timeout(RPC_TIMEOUT, registry.currentBatchId().call())
            .await
            .map_err(|_| RelayError::Upstream("getCurrentBatchId timed out".into()))?
            .map_err(Self::upstream)?;
        Ok(id._0.to::<u64>())
    }

    async fn get_batch_info(&self, batch_id: u64) -> Result<BatchInfo, RelayError> {
        let provider = self.readonly_provider().map_err(Self::upstream)?;
        let registry = Registry::new(self.registry_address, provider);
        let info = tokio::time::timeout(
            RPC_TIMEOUT,
            registry.getBatchInfo(U256::from(batch_id)).call(),
        )
        .await
        .map_err(|_| RelayError::Upstream("getBatchInfo timed out".into()))?
        .map_err(Self::upstream)?;
        Ok(BatchInfo {
            batch_id,
            root: info.root.0,
            finalized: info.finalized,
        })
    }

    async fn is_withdrawal_processed(
        &self,
        user: UserAddress,
        amount: Amount,
        nonce: Nonce,
    ) -> Result<bool, RelayError> {
        let provider = self.readonly_provider().map_err(Self::upstream)?;
        let registry = Registry::new(self.registry_address, provider);
        let processed = tokio::time::timeout(
            RPC_TIMEOUT,
            registry
                .isWithdrawalProcessed(user.inner(), amount.as_u256(), U256::from(nonce.0))
                .call(),
        )
        .await
        .map_err(|_| RelayError::Upstream("isWithdrawalProcessed timed out".into()))?
        .map_err(Self::upstream)?;
        Ok(processed._0)
    }

    async fn query_deposits(
        &self,
        from_block: u64,
        to_block: u64,
        user_filter: Option<UserAddress>,
    ) -> Result<Vec<DepositEvent>, RelayError> {
        let provider = self.readonly_provider().map_err(Self::upstream)?;
        let mut filter = Filter::new()
            .address(self.registry_address)
            .event_signature(Registry::Deposited::SIGNATURE_HASH)
            .from_block(from_block)
            .to_block(to_block);
        if let Some(user) = user_filter {
            filter = filter.topic1(user.inner());
        }
        let logs = tokio::time::timeout(RPC_TIMEOUT, provider.get_logs(&filter))
            .await
            .map_err(|_| RelayError::Upstream("queryDeposits timed out".into()))?
            .map_err(Self::upstream)?;
        let mut events = Vec::with_capacity(logs.len());
        for log in logs {
            let tx_hash = log.transaction_hash.map(|h| h.to_string()).unwrap_or_default();
            let block_number = log.block_number.unwrap_or_default();
            let decoded = log
                .log_decode::<Registry::Deposited>()
                .map_err(|e| RelayError::Upstream(format!("malformed Deposited log: {e}")))?;
            let inner = decoded.inner.data;
            events.push(DepositEvent {
                user: UserAddress::from(inner.user),
                amount: Amount::from_u256(inner.amount),
                tx_hash,
                block_number,
            });
        }
        Ok(events)
    }

    async fn query_withdrawals(
        &self,
        from_block: u64,
        to_block: u64,
        user_filter: Option<UserAddress>,
    ) -> Result<Vec<WithdrawalEvent>, RelayError> {
        let provider = self.readonly_provider().map_err(Self::upstream)?;
        let mut filter = Filter::new()
            .address(self.registry_address)
            .event_signature(Registry::BatchSubmitted::SIGNATURE_HASH)
            .from_block(from_block)
            .to_block(to_block);
        if let Some(user) = user_filter {
            filter = filter.topic1(user.inner());
        }
        let logs = tokio::time::timeout(RPC_TIMEOUT, provider.get_logs(&filter))
            .await
            .map_err(|_| RelayError::Upstream("queryWithdrawals timed out".into()))?
            .map_err(Self::upstream)?;
        let mut events = Vec::with_capacity(logs.len());
        for log in logs {
            let tx_hash = log.transaction_hash.map(|h| h.to_string()).unwrap_or_default();
            let block_number = log.block_number.unwrap_or_default();
            let decoded = log
                .log_decode::<Registry::BatchSubmitted>()
                .map_err(|e| RelayError::Upstream(format!("malformed BatchSubmitted log: {e}")))?;
            let inner = decoded.inner.data;
            events.push(WithdrawalEvent {
                user: UserAddress::from(inner.firstUser),
                amount: Amount::from_u256(inner.firstAmount),
                nonce: Nonce(inner.firstNonce.to::<u64>()),
                tx_hash,
                block_number,
            });
        }
        Ok(events)
    }

    async fn submit_batch(
        &self,
        root: [u8; 32],
        withdrawals: &[OnChainWithdrawal],
        signatures: &[String],
    ) -> Result<u64, RelayError> {
        let provider = self.wallet_provider().map_err(Self::upstream)?;
        let registry = Registry::new(self.registry_address, provider);
        let users: Vec<Address> = withdrawals.iter().map(|w| w.user.inner()).collect();
        let amounts: Vec<U256> = withdrawals.iter().map(|w| w.amount.as_u256()).collect();
        let nonces: Vec<U256> = withdrawals.iter().map(|w| U256::from(w.nonce.0)).collect();
        let sig_bytes: Vec<alloy::primitives::Bytes> = signatures
            .iter()
            .map(|s| {
                hex::decode(s.trim_start_matches("0x"))
                    .map(alloy::primitives::Bytes::from)
                    .map_err(|_| RelayError::InvalidInput("malformed batch signature hex".into()))
            })
            .collect::<Result<_, _>>()?;

        let pending = registry
            .submitBatch(root.into(), users, amounts, nonces, sig_bytes)
            .send()
            .await
            .map_err(Self::upstream)?;
        let receipt = pending.get_receipt().await.map_err(Self::upstream)?;
        for log in receipt.inner.logs() {
            if let Ok(decoded) = log.log_decode::<Registry::BatchSubmitted>() {
                return Ok(decoded.inner.data.batchId.to::<u64>());
            }
        }
        Err(RelayError::Upstream(
            "submitBatch receipt carried no BatchSubmitted event".into(),
        ))
    }

    async fn register_deal(
        &self,
        deal_id: [u8; 32],
        client: UserAddress,
        cid: &str,
        size_mb: u64,
        price_usdc: Amount,
        duration_days: u32,
        client_stake: Amount,
    ) -> Result<U256, RelayError> {
        let provider = self.wallet_provider().map_err(Self::upstream)?;
        let registry = Registry::new(self.registry_address, provider);
        let pending = registry
            .registerDeal(
                deal_id.into(),
                client.inner(),
                cid.to_string(),
                U256::from(size_mb),
                price_usdc.as_u256(),
                U256::from(duration_days),
                client_stake.as_u256(),
            )
            .send()
            .await
            .map_err(Self::upstream)?;
        let receipt = pending.get_receipt().await.map_err(Self::upstream)?;
        for log in receipt.inner.logs() {
            if let Ok(decoded) = log.log_decode::<Registry::DealRegistered>() {
                return Ok(decoded.inner.data.onChainDealId);
            }
        }
        Err(RelayError::Upstream(
            "registerDeal receipt carried no DealRegistered event".into(),
        ))
    }

    async fn allowance_of(&self, owner: UserAddress, spender: Address) -> Result<Amount, RelayError> {
        let provider = self.readonly_provider().map_err(Self::upstream)?;
        let usdc = ERC20::new(self.usdc_address, provider);
        let allowance = tokio::time::timeout(
            RPC_TIMEOUT,
            usdc.allowance(owner.inner(), spender).call(),
        )
        .await
        .map_err(|_| RelayError::Upstream("allowanceOf timed out".into()))?
        .map_err(Self::upstream)?;
        Ok(Amount::from_u256(allowance._0))
    }

    async fn get_relay_info(&self, address: Address) -> Result<RelayInfo, RelayError> {
        let provider = self.readonly_provider().map_err(Self::upstream)?;
        let registry = Registry::new(self.registry_address, provider);
        let info = tokio::time::timeout(RPC_TIMEOUT, registry.getRelayInfo(address).call())
            .await
            .map_err(|_| RelayError::Upstream("getRelayInfo timed out".into()))?
            .map_err(Self::upstream)?;
        Ok(RelayInfo {
            address,
            stake: Amount::from_u256(info.stake),
            active: info.active,
        })
    }

    async fn get_client_deals(&self, client: UserAddress) -> Result<Vec<U256>, RelayError> {
        let provider = self.readonly_provider().map_err(Self::upstream)?;
        let registry = Registry::new(self.registry_address, provider);
        let ids = tokio::time::timeout(RPC_TIMEOUT, registry.getClientDeals(client.inner()).call())
            .await
            .map_err(|_| RelayError::Upstream("getClientDeals timed out".into()))?
            .map_err(Self::upstream)?;
        Ok(ids._0)
    }
}

impl AlloyChainClient {
    pub fn signer_address(&self) -> Address {
        self.signer_address
    }
}
