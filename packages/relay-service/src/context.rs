//! Wires C1-C11 into a single shared context the HTTP layer (C12) is
//! handed as Axum state. Nothing here is business logic; it is
//! construction and startup rebuild only.

use std::str::FromStr;
use std::sync::Arc;

use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use relay_bridge::BridgeOrchestrator;
use relay_chain::{AlloyChainClient, ChainClient};
use relay_deals::DealEngine;
use relay_guard::{AuthGate, DuplicateGuard};
use relay_ipfs::{HttpIpfsClient, IpfsClient};
use relay_ledger::BalanceLedger;
use relay_links::SharedLinkService;
use relay_reputation::ReputationScorer;
use relay_store::{GraphStore, GunHttpStore};
use sqlx::PgPool;

use crate::config::Config;
use crate::metrics::Metrics;

pub struct RelayContext {
    pub store: Arc<dyn GraphStore>,
    pub chain: Arc<dyn ChainClient>,
    pub ipfs: Arc<dyn IpfsClient>,
    pub ledger: Arc<BalanceLedger>,
    pub bridge: Arc<BridgeOrchestrator>,
    pub deals: Arc<DealEngine>,
    pub links: Arc<SharedLinkService>,
    pub reputation: Arc<ReputationScorer>,
    pub auth: Arc<AuthGate>,
    pub guard: Arc<DuplicateGuard>,
    pub db: PgPool,
    pub metrics: Arc<Metrics>,
    pub relay_host: String,
    pub chain_id: u64,
}

impl RelayContext {
    pub async fn build(config: &Config, db: PgPool) -> eyre::Result<Self> {
        let signer: PrivateKeySigner = config
            .chain
            .relay_private_key
            .parse()
            .map_err(|e| eyre::eyre!("invalid relay private key: {e}"))?;

        let registry_address = Address::from_str(&config.chain.registry_address)
            .map_err(|e| eyre::eyre!("invalid registry address: {e}"))?;
        let usdc_address = Address::from_str(&config.chain.usdc_address)
            .map_err(|e| eyre::eyre!("invalid usdc address: {e}"))?;

        let store: Arc<dyn GraphStore> = Arc::new(GunHttpStore::new(config.store.base_url.clone())?);
        let chain: Arc<dyn ChainClient> = Arc::new(AlloyChainClient::new(
            config.chain.rpc_url.clone(),
            registry_address,
            usdc_address,
            &config.chain.relay_private_key,
        )?);
        let ipfs: Arc<dyn IpfsClient> =
            Arc::new(HttpIpfsClient::new(config.ipfs.api_url.clone(), config.ipfs.gateway_url.clone())?);

        let reputation = Arc::new(ReputationScorer::new());
        let ledger = Arc::new(BalanceLedger::new(store.clone(), signer.clone()));
        let bridge = Arc::new(BridgeOrchestrator::new(
            ledger.clone(),
            chain.clone(),
            store.clone(),
            reputation.clone(),
            signer.clone(),
            config.chain.relay_host.clone(),
        ));
        let deals = Arc::new(DealEngine::new(
            store.clone(),
            chain.clone(),
            ipfs.clone(),
            reputation.clone(),
            signer.clone(),
            registry_address,
            config.chain.relay_host.clone(),
        ));
        let links = Arc::new(SharedLinkService::new(store.clone(), ipfs.clone(), signer.clone()));

        let auth = Arc::new(
            AuthGate::new(&config.auth.admin_token)
                .with_rate_limit(config.auth.rate_limit_attempts, config.auth.rate_limit_window),
        );
        let guard = Arc::new(DuplicateGuard::new(config.guard.duplicate_window));
        let metrics = Arc::new(Metrics::new());

        let ctx = Self {
            store,
            chain,
            ipfs,
            ledger,
            bridge,
            deals,
            links,
            reputation,
            auth,
            guard,
            db,
            metrics,
            relay_host: config.chain.relay_host.clone(),
            chain_id: config.chain.chain_id,
        };

        ctx.rebuild_from_store().await?;
        Ok(ctx)
    }

    /// Replays the signed graph store into every in-memory cache the
    /// ledger and bridge orchestrator own. Tolerant of the "initial-load
    /// race" (§9): callers that query immediately after startup may
    /// still see an under-reported view until the store catches up.
    async fn rebuild_from_store(&self) -> eyre::Result<()> {
        let restored = self.ledger.rebuild_from_store().await?;
        tracing::info!(restored, "balance ledger rebuilt from store");
        self.bridge.rebuild_from_store().await?;
        Ok(())
    }
}
