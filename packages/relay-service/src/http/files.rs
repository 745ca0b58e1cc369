//! Shared-link download routes (§6): creation, redemption, metadata, and
//! revocation. File resolution (turning a `fileId` into a local path or
//! CID) is an external collaborator's job; callers hand the resolved
//! descriptor straight to the create route.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Redirect, Response};
use relay_links::{AccessOutcome, FileDescriptor, SharedLinkInfo};
use relay_types::RelayError;
use serde::{Deserialize, Serialize};

use crate::context::RelayContext;
use crate::db;
use crate::http::client_ip;
use crate::http::error::{ApiError, ApiResult};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateShareLinkBody {
    pub file_id: String,
    pub file_name: String,
    pub file_size: u64,
    pub file_mime: String,
    #[serde(default)]
    pub local_path: Option<String>,
    #[serde(default)]
    pub cid: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub expires_in_secs: Option<u64>,
    #[serde(default)]
    pub max_downloads: Option<u64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateShareLinkResponse {
    pub token: String,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

pub async fn create_share_link(
    State(ctx): State<Arc<RelayContext>>,
    headers: HeaderMap,
    Json(body): Json<CreateShareLinkBody>,
) -> ApiResult<Json<CreateShareLinkResponse>> {
    let api_key = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| RelayError::Unauthorized("missing API key".into()))?;
    let ip = client_ip(&headers);
    let user = match ctx.auth.check_api_key(api_key, &ip).await {
        Ok(user) => user,
        Err(e) => {
            ctx.metrics.auth_failures_total.inc();
            return Err(e.into());
        }
    };

    let descriptor = FileDescriptor {
        file_id: body.file_id,
        file_name: body.file_name,
        file_size: body.file_size,
        file_mime: body.file_mime,
        local_path: body.local_path,
        cid: body.cid,
    };
    let link = ctx
        .links
        .create(
            descriptor,
            body.password.as_deref(),
            body.expires_in_secs.map(std::time::Duration::from_secs),
            body.max_downloads,
            user,
        )
        .await?;
    ctx.metrics.shared_links_created_total.inc();
    if let Err(e) = db::upsert_shared_link(&ctx.db, &link.token, &link.file_name, 0, "active").await {
        tracing::warn!(error = %e, "failed to index shared link in operational database");
    }
    Ok(Json(CreateShareLinkResponse { token: link.token, expires_at: link.expires_at }))
}

#[derive(Deserialize)]
pub struct AccessQuery {
    #[serde(default)]
    pub password: Option<String>,
}

pub async fn access_share_link(
    State(ctx): State<Arc<RelayContext>>,
    Path(token): Path<String>,
    Query(query): Query<AccessQuery>,
) -> ApiResult<Response> {
    let outcome = ctx.links.access(&token, query.password.as_deref()).await?;
    let response = match outcome {
        AccessOutcome::Local { path, file_name, file_mime } => {
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| ApiError::from(RelayError::Upstream(format!("failed to read {path}: {e}"))))?;
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, file_mime),
                    (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{file_name}\"")),
                ],
                Body::from(bytes),
            )
                .into_response()
        }
        AccessOutcome::GatewayRedirect { url } => Redirect::temporary(&url).into_response(),
    };
    ctx.metrics.shared_link_downloads_total.inc();
    if let Ok(info) = ctx.links.info(&token).await {
        let status = format!("{:?}", info.status).to_ascii_lowercase();
        if let Err(e) = db::upsert_shared_link(&ctx.db, &token, &info.file_name, info.download_count as i64, &status).await {
            tracing::warn!(error = %e, "failed to index shared link in operational database");
        }
    }
    Ok(response)
}

pub async fn share_link_info(
    State(ctx): State<Arc<RelayContext>>,
    Path(token): Path<String>,
) -> ApiResult<Json<SharedLinkInfo>> {
    Ok(Json(ctx.links.info(&token).await?))
}

pub async fn revoke_share_link(
    State(ctx): State<Arc<RelayContext>>,
    headers: HeaderMap,
    Path(token): Path<String>,
) -> ApiResult<StatusCode> {
    let api_key = headers.get("x-api-key").and_then(|v| v.to_str().ok());
    let ip = client_ip(&headers);
    let requester = match api_key {
        Some(key) => Some(ctx.auth.check_api_key(key, &ip).await?),
        None => None,
    };
    ctx.links.revoke(&token, requester.as_deref()).await?;
    if let Ok(info) = ctx.links.info(&token).await {
        if let Err(e) = db::upsert_shared_link(&ctx.db, &token, &info.file_name, info.download_count as i64, "revoked").await {
            tracing::warn!(error = %e, "failed to index shared link in operational database");
        }
    }
    Ok(StatusCode::NO_CONTENT)
}
