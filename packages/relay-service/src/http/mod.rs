//! Public HTTP Surface (C12): the relay's only externally reachable
//! component. Health and metrics mirror the cancel-watcher's server, the
//! bridge/deals/files route groups are new.

pub mod bridge;
pub mod deals;
pub mod error;
pub mod files;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use eyre::eyre;
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;

use crate::context::RelayContext;

/// Best-effort client IP: `X-Forwarded-For`'s first hop if the relay
/// sits behind a proxy, else `unknown`. Not a security boundary by
/// itself — the duplicate-request guard and rate limiter both key on
/// it to scope abuse per source, not to authenticate it.
pub fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("unknown")
        .to_string()
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    relay_host: String,
    chain_id: u64,
}

async fn health(axum::extract::State(ctx): axum::extract::State<Arc<RelayContext>>) -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy", relay_host: ctx.relay_host.clone(), chain_id: ctx.chain_id })
}

async fn liveness() -> &'static str {
    "OK"
}

async fn readiness(axum::extract::State(ctx): axum::extract::State<Arc<RelayContext>>) -> &'static str {
    if ctx.db.is_closed() {
        "NOT_READY"
    } else {
        "OK"
    }
}

async fn prometheus_metrics(axum::extract::State(ctx): axum::extract::State<Arc<RelayContext>>) -> Response {
    let encoder = TextEncoder::new();
    let metric_families = ctx.metrics.registry.gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics").into_response();
    }
    match Response::builder().header(header::CONTENT_TYPE, encoder.format_type()).body(axum::body::Body::from(buffer)) {
        Ok(resp) => resp,
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "failed to build metrics response").into_response(),
    }
}

pub fn build_router(ctx: Arc<RelayContext>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/healthz", get(liveness))
        .route("/readyz", get(readiness))
        .route("/metrics", get(prometheus_metrics))
        .route("/api/v1/bridge/balance/{user}", get(bridge::balance))
        .route("/api/v1/bridge/balance-info/{user}", get(bridge::balance_info))
        .route("/api/v1/bridge/nonce/{user}", get(bridge::nonce))
        .route("/api/v1/bridge/withdraw", post(bridge::withdraw))
        .route("/api/v1/bridge/pending-withdrawals", get(bridge::pending_withdrawals))
        .route("/api/v1/bridge/submit-batch", post(bridge::submit_batch))
        .route("/api/v1/bridge/proof/{user}/{amount}/{nonce}", get(bridge::proof))
        .route("/api/v1/bridge/state", get(bridge::state))
        .route("/api/v1/bridge/sync-deposits", post(bridge::sync_deposits))
        .route("/api/v1/bridge/process-deposit", post(bridge::process_deposit))
        .route("/api/v1/bridge/transfer", post(bridge::transfer))
        .route("/api/v1/deals/create", post(deals::create))
        .route("/api/v1/deals/pricing", get(deals::pricing))
        .route("/api/v1/deals/by-client/{address}", get(deals::by_client))
        .route("/api/v1/deals/by-cid/{cid}", get(deals::by_cid))
        .route("/api/v1/deals/{dealId}/activate", post(deals::activate))
        .route("/api/v1/deals/{dealId}", get(deals::get))
        .route("/api/v1/deals/{dealId}/renew", post(deals::renew))
        .route("/api/v1/deals/{dealId}/verify", get(deals::verify))
        .route("/api/v1/deals/{dealId}/verify-proof", get(deals::verify_proof))
        .route("/api/v1/deals/{dealId}/cancel", post(deals::cancel))
        .route("/api/files/create-share-link", post(files::create_share_link))
        .route(
            "/api/files/share/{token}",
            get(files::access_share_link).delete(files::revoke_share_link),
        )
        .route("/api/files/share/{token}/info", get(files::share_link_info))
        .with_state(ctx)
}

pub async fn start_server(bind_address: &str, port: u16, ctx: Arc<RelayContext>) -> eyre::Result<()> {
    let app = build_router(ctx);
    let addr: SocketAddr =
        format!("{bind_address}:{port}").parse().map_err(|e| eyre!("invalid bind address {bind_address}:{port}: {e}"))?;
    tracing::info!(%addr, "HTTP server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
