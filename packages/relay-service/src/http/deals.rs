//! Storage-deal routes (§6): pricing, creation, activation, renewal,
//! cancellation, lookup, and storage-proof challenges.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::Json;
use relay_deals::{Deal, Tier};
use relay_types::UserAddress;
use serde::{Deserialize, Serialize};

use crate::context::RelayContext;
use crate::db::{self, NewDealRow};
use crate::http::error::ApiResult;

fn deal_row(deal: &Deal) -> NewDealRow {
    NewDealRow {
        deal_id: deal.deal_id.clone(),
        cid: deal.cid.clone(),
        client: deal.client.to_hex(),
        tier: format!("{:?}", deal.tier).to_ascii_lowercase(),
        status: format!("{:?}", deal.status).to_ascii_lowercase(),
        price_usdc: deal.price_usdc.to_string(),
        expires_at: deal.expires_at,
    }
}

fn parse_tier(raw: &str) -> Tier {
    match raw.to_ascii_lowercase().as_str() {
        "premium" => Tier::Premium,
        "enterprise" => Tier::Enterprise,
        _ => Tier::Standard,
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDealBody {
    pub cid: String,
    pub client: String,
    pub size_mb: u64,
    pub duration_days: u32,
    #[serde(default)]
    pub tier: Option<String>,
}

pub async fn create(State(ctx): State<Arc<RelayContext>>, Json(body): Json<CreateDealBody>) -> ApiResult<Json<Deal>> {
    let client = UserAddress::from_hex(&body.client)?;
    let tier = body.tier.as_deref().map(parse_tier).unwrap_or_default();
    let deal = ctx.deals.create(body.cid, client, body.size_mb, body.duration_days, tier).await?;
    ctx.metrics.deals_created_total.inc();
    if let Err(e) = db::upsert_deal(&ctx.db, &deal_row(&deal)).await {
        tracing::warn!(error = %e, "failed to index deal in operational database");
    }
    Ok(Json(deal))
}

pub async fn activate(State(ctx): State<Arc<RelayContext>>, Path(deal_id): Path<String>) -> ApiResult<Json<Deal>> {
    let deal = ctx.deals.activate(&deal_id).await?;
    ctx.metrics.deals_activated_total.inc();
    if let Err(e) = db::upsert_deal(&ctx.db, &deal_row(&deal)).await {
        tracing::warn!(error = %e, "failed to index deal in operational database");
    }
    Ok(Json(deal))
}

pub async fn get(State(ctx): State<Arc<RelayContext>>, Path(deal_id): Path<String>) -> ApiResult<Json<Deal>> {
    Ok(Json(ctx.deals.get(&deal_id).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewBody {
    pub additional_days: u32,
}

pub async fn renew(
    State(ctx): State<Arc<RelayContext>>,
    Path(deal_id): Path<String>,
    Json(body): Json<RenewBody>,
) -> ApiResult<Json<Deal>> {
    let deal = ctx.deals.renew(&deal_id, body.additional_days).await?;
    if let Err(e) = db::upsert_deal(&ctx.db, &deal_row(&deal)).await {
        tracing::warn!(error = %e, "failed to index deal in operational database");
    }
    Ok(Json(deal))
}

/// Consistency check: the deal's recorded status alongside whether its
/// expiry has already passed, without mutating anything (the actual
/// `Pending -> Expired` transition happens in the background sweep).
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub deal_id: String,
    pub status: String,
    pub past_expiry: bool,
}

pub async fn verify(State(ctx): State<Arc<RelayContext>>, Path(deal_id): Path<String>) -> ApiResult<Json<VerifyResponse>> {
    let deal = ctx.deals.get(&deal_id).await?;
    let past_expiry = deal.expires_at.map(|exp| exp <= chrono::Utc::now()).unwrap_or(false);
    Ok(Json(VerifyResponse {
        deal_id: deal.deal_id,
        status: format!("{:?}", deal.status),
        past_expiry,
    }))
}

#[derive(Deserialize)]
pub struct VerifyProofQuery {
    pub challenge: String,
}

pub async fn verify_proof(
    State(ctx): State<Arc<RelayContext>>,
    Path(deal_id): Path<String>,
    Query(query): Query<VerifyProofQuery>,
) -> ApiResult<Json<relay_deals::StorageProofResult>> {
    let challenge = hex::decode(query.challenge.trim_start_matches("0x"))
        .map_err(|_| relay_types::RelayError::InvalidInput("challenge must be hex-encoded".into()))?;
    Ok(Json(ctx.deals.storage_proof(&deal_id, &challenge).await?))
}

pub async fn cancel(State(ctx): State<Arc<RelayContext>>, Path(deal_id): Path<String>) -> ApiResult<Json<Deal>> {
    let deal = ctx.deals.terminate(&deal_id).await?;
    if let Err(e) = db::upsert_deal(&ctx.db, &deal_row(&deal)).await {
        tracing::warn!(error = %e, "failed to index deal in operational database");
    }
    Ok(Json(deal))
}

pub async fn by_client(
    State(ctx): State<Arc<RelayContext>>,
    Path(address): Path<String>,
) -> ApiResult<Json<Vec<relay_deals::ClientDeal>>> {
    let client = UserAddress::from_hex(&address)?;
    Ok(Json(ctx.deals.by_client(client).await?))
}

pub async fn by_cid(State(ctx): State<Arc<RelayContext>>, Path(cid): Path<String>) -> ApiResult<Json<Vec<Deal>>> {
    Ok(Json(ctx.deals.by_cid(&cid).await?))
}

#[derive(Deserialize)]
pub struct PricingQuery {
    pub size_mb: u64,
    pub duration_days: u32,
    #[serde(default)]
    pub tier: Option<String>,
}

pub async fn pricing(Query(query): Query<PricingQuery>) -> Json<relay_deals::PriceQuote> {
    let tier = query.tier.as_deref().map(parse_tier).unwrap_or_default();
    let quote = relay_deals::PricingConfig::default().price(query.size_mb, query.duration_days, tier);
    Json(quote)
}
