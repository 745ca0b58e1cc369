//! Bridge routes (§6): balances, the withdrawal queue, batching, proofs,
//! deposit ingestion, and transfers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Json;
use relay_bridge::{DepositSyncReport, ProofResult, WithdrawalRequest};
use relay_chain::ChainClient;
use relay_types::{Amount, Nonce, RelayError, UserAddress};
use serde::{Deserialize, Serialize};

use crate::context::RelayContext;
use crate::db::{self, NewWithdrawalRow};
use crate::http::client_ip;
use crate::http::error::{ApiError, ApiResult};

fn parse_user(raw: &str) -> Result<UserAddress, ApiError> {
    UserAddress::from_hex(raw).map_err(ApiError::from)
}

fn parse_amount(raw: &str) -> Result<Amount, ApiError> {
    Amount::from_decimal(raw).map_err(ApiError::from)
}

#[derive(Serialize)]
pub struct BalanceResponse {
    user: String,
    balance: String,
}

pub async fn balance(State(ctx): State<Arc<RelayContext>>, Path(user): Path<String>) -> ApiResult<Json<BalanceResponse>> {
    let user = parse_user(&user)?;
    let balance = ctx.ledger.balance(user).await;
    Ok(Json(BalanceResponse { user: user.to_hex(), balance: balance.to_string() }))
}

#[derive(Serialize)]
pub struct BalanceInfoResponse {
    user: String,
    balance: String,
    last_nonce: u64,
    next_nonce: u64,
}

pub async fn balance_info(
    State(ctx): State<Arc<RelayContext>>,
    Path(user): Path<String>,
) -> ApiResult<Json<BalanceInfoResponse>> {
    let user = parse_user(&user)?;
    let balance = ctx.ledger.balance(user).await;
    let (last, next) = ctx.bridge.nonce_info(user).await;
    Ok(Json(BalanceInfoResponse {
        user: user.to_hex(),
        balance: balance.to_string(),
        last_nonce: last.0,
        next_nonce: next.0,
    }))
}

#[derive(Serialize)]
pub struct NonceInfoResponse {
    user: String,
    last_nonce: u64,
    next_nonce: u64,
}

pub async fn nonce(State(ctx): State<Arc<RelayContext>>, Path(user): Path<String>) -> ApiResult<Json<NonceInfoResponse>> {
    let user = parse_user(&user)?;
    let (last, next) = ctx.bridge.nonce_info(user).await;
    Ok(Json(NonceInfoResponse { user: user.to_hex(), last_nonce: last.0, next_nonce: next.0 }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawBody {
    pub user: String,
    pub amount: String,
    pub nonce: Option<u64>,
    pub message: String,
    pub sea_signature: String,
    pub eth_signature: String,
    pub public_key: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawResponse {
    pub user: String,
    pub amount: String,
    pub nonce: u64,
    pub receipt_hash: String,
}

pub async fn withdraw(
    State(ctx): State<Arc<RelayContext>>,
    headers: HeaderMap,
    Json(body): Json<WithdrawBody>,
) -> ApiResult<Json<WithdrawResponse>> {
    let ip = client_ip(&headers);
    let user = parse_user(&body.user)?;
    let amount = parse_amount(&body.amount)?;

    let resource_id = format!("{}:{}:{:?}", user.to_hex(), amount, body.nonce);
    let key = relay_guard::DuplicateGuard::key("POST", "/api/v1/bridge/withdraw", &ip, &resource_id);
    ctx.guard.check(&key).await?;

    let request = WithdrawalRequest {
        user,
        amount,
        nonce: body.nonce.map(Nonce),
        message: body.message,
        sea_signature: body.sea_signature,
        eth_signature: body.eth_signature,
        public_key: body.public_key,
    };

    ctx.metrics.withdrawals_requested_total.inc();
    match ctx.bridge.request_withdrawal(request).await {
        Ok(pending) => {
            ctx.metrics.pending_withdrawals.set(ctx.bridge.pending_withdrawals().await.len() as i64);
            let row = NewWithdrawalRow {
                receipt_hash: pending.receipt_hash.clone(),
                user_address: pending.user.to_hex(),
                amount: pending.amount.to_string(),
                nonce: pending.nonce.0 as i64,
            };
            if let Err(e) = db::upsert_pending_withdrawal(&ctx.db, &row).await {
                tracing::warn!(error = %e, "failed to index pending withdrawal in operational database");
            }
            Ok(Json(WithdrawResponse {
                user: pending.user.to_hex(),
                amount: pending.amount.to_string(),
                nonce: pending.nonce.0,
                receipt_hash: pending.receipt_hash,
            }))
        }
        Err(e) => {
            ctx.metrics.withdrawals_rejected_total.inc();
            Err(e.into())
        }
    }
}

#[derive(Serialize)]
pub struct PendingWithdrawalView {
    user: String,
    amount: String,
    nonce: u64,
    receipt_hash: String,
}

pub async fn pending_withdrawals(State(ctx): State<Arc<RelayContext>>) -> Json<Vec<PendingWithdrawalView>> {
    let pending = ctx.bridge.pending_withdrawals().await;
    Json(
        pending
            .into_iter()
            .map(|w| PendingWithdrawalView {
                user: w.user.to_hex(),
                amount: w.amount.to_string(),
                nonce: w.nonce.0,
                receipt_hash: w.receipt_hash,
            })
            .collect(),
    )
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitBatchResponse {
    pub batch_id: Option<u64>,
    pub root: Option<String>,
    pub withdrawal_count: usize,
}

pub async fn submit_batch(State(ctx): State<Arc<RelayContext>>) -> ApiResult<Json<SubmitBatchResponse>> {
    match ctx.bridge.run_batch_builder().await {
        Ok(Some(batch)) => {
            ctx.metrics.batches_submitted_total.inc();
            ctx.metrics.last_batch_id.set(batch.batch_id as i64);
            ctx.metrics.pending_withdrawals.set(ctx.bridge.pending_withdrawals().await.len() as i64);
            if let Err(e) = db::upsert_batch(&ctx.db, batch.batch_id as i64, &batch.root, batch.withdrawals.len() as i32, batch.finalized).await
            {
                tracing::warn!(error = %e, "failed to index batch in operational database");
            }
            let receipt_hashes: Vec<String> = batch.withdrawals.iter().map(|w| w.receipt_hash.clone()).collect();
            if let Err(e) = db::mark_withdrawals_batched(&ctx.db, &receipt_hashes, batch.batch_id as i64).await {
                tracing::warn!(error = %e, "failed to mark withdrawals batched in operational database");
            }
            Ok(Json(SubmitBatchResponse {
                batch_id: Some(batch.batch_id),
                root: Some(batch.root),
                withdrawal_count: batch.withdrawals.len(),
            }))
        }
        Ok(None) => Ok(Json(SubmitBatchResponse { batch_id: None, root: None, withdrawal_count: 0 })),
        Err(e) => {
            ctx.metrics.batches_failed_total.inc();
            Err(ApiError::from(RelayError::Upstream(e.to_string())))
        }
    }
}

pub async fn proof(
    State(ctx): State<Arc<RelayContext>>,
    Path((user, amount, nonce)): Path<(String, String, u64)>,
) -> ApiResult<(axum::http::StatusCode, Json<ProofResult>)> {
    let user = parse_user(&user)?;
    let amount = parse_amount(&amount)?;
    let result = ctx.bridge.get_proof(user, amount, Nonce(nonce)).await?;
    let status = match &result {
        ProofResult::Pending => axum::http::StatusCode::ACCEPTED,
        ProofResult::NotFound => axum::http::StatusCode::NOT_FOUND,
        ProofResult::Proof { .. } | ProofResult::AlreadyProcessed => axum::http::StatusCode::OK,
    };
    Ok((status, Json(result)))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStateResponse {
    pub chain_id: u64,
    pub current_state_root: String,
    pub current_batch_id: u64,
    pub relay_host: String,
    pub pending_withdrawal_count: usize,
}

pub async fn state(State(ctx): State<Arc<RelayContext>>) -> ApiResult<Json<BridgeStateResponse>> {
    let root = ctx.chain.get_current_state_root().await?;
    let batch_id = ctx.chain.get_current_batch_id().await?;
    Ok(Json(BridgeStateResponse {
        chain_id: ctx.chain_id,
        current_state_root: format!("0x{}", hex::encode(root)),
        current_batch_id: batch_id,
        relay_host: ctx.relay_host.clone(),
        pending_withdrawal_count: ctx.bridge.pending_withdrawals().await.len(),
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncDepositsBody {
    pub from_block: u64,
    pub to_block: u64,
    pub user: Option<String>,
}

pub async fn sync_deposits(
    State(ctx): State<Arc<RelayContext>>,
    headers: HeaderMap,
    Json(body): Json<SyncDepositsBody>,
) -> ApiResult<Json<DepositSyncReport>> {
    require_admin(&ctx, &headers).await?;
    let user_filter = body.user.as_deref().map(UserAddress::from_hex).transpose()?;
    let report = ctx.bridge.sync_deposits(body.from_block, body.to_block, user_filter).await?;
    ctx.metrics.deposits_credited_total.inc_by(report.credited);
    Ok(Json(report))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessDepositBody {
    pub block_number: u64,
    pub user: String,
}

/// Forces a single-block deposit sync for one user — the admin-facing
/// equivalent of waiting for the next scheduled `sync_deposits` pass
/// to pick up a deposit that a client reports as missing.
pub async fn process_deposit(
    State(ctx): State<Arc<RelayContext>>,
    headers: HeaderMap,
    Json(body): Json<ProcessDepositBody>,
) -> ApiResult<Json<DepositSyncReport>> {
    require_admin(&ctx, &headers).await?;
    let user = parse_user(&body.user)?;
    let report = ctx.bridge.sync_deposits(body.block_number, body.block_number, Some(user)).await?;
    ctx.metrics.deposits_credited_total.inc_by(report.credited);
    Ok(Json(report))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferBody {
    pub from: String,
    pub to: String,
    pub amount: String,
    pub message: String,
    pub sea_signature: String,
    pub eth_signature: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferResponse {
    pub receipt_hash: String,
    pub from_balance: String,
    pub to_balance: String,
}

pub async fn transfer(
    State(ctx): State<Arc<RelayContext>>,
    headers: HeaderMap,
    Json(body): Json<TransferBody>,
) -> ApiResult<Json<TransferResponse>> {
    let ip = client_ip(&headers);
    let from = parse_user(&body.from)?;
    let to = parse_user(&body.to)?;
    let amount = parse_amount(&body.amount)?;

    let resource_id = format!("{}:{}:{}", from.to_hex(), to.to_hex(), amount);
    let key = relay_guard::DuplicateGuard::key("POST", "/api/v1/bridge/transfer", &ip, &resource_id);
    ctx.guard.check(&key).await?;

    relay_types::sign::verify_dual_signature(body.message.as_bytes(), &body.eth_signature, &body.sea_signature, from)?;

    let receipt = ctx.ledger.transfer(from, to, amount).await?;
    Ok(Json(TransferResponse {
        receipt_hash: receipt.receipt_hash,
        from_balance: receipt.from_balance.to_string(),
        to_balance: receipt.to_balance.to_string(),
    }))
}

async fn require_admin(ctx: &RelayContext, headers: &HeaderMap) -> Result<(), ApiError> {
    let ip = client_ip(headers);
    let bearer = headers.get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok());
    let custom = headers.get("x-admin-token").and_then(|v| v.to_str().ok());
    let token = relay_guard::AuthGate::extract_admin_token(bearer, custom)
        .ok_or_else(|| RelayError::Unauthorized("missing admin token".into()))?;
    if let Err(e) = ctx.auth.check_admin(token, &ip).await {
        ctx.metrics.auth_failures_total.inc();
        return Err(e.into());
    }
    Ok(())
}
