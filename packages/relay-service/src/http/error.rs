//! Maps the relay's error taxonomy (§7) onto HTTP status codes. `RelayError`
//! and `IntoResponse` both live outside this crate, so `ApiError` is a thin
//! newtype wrapper every handler converts into via `?`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use relay_types::RelayError;
use serde::Serialize;

pub struct ApiError(pub RelayError);

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        ApiError(err)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

fn status_for(err: &RelayError) -> StatusCode {
    match err {
        RelayError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        RelayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        RelayError::InsufficientBalance => StatusCode::PAYMENT_REQUIRED,
        RelayError::NonceTooLow { .. } => StatusCode::BAD_REQUEST,
        RelayError::Replay => StatusCode::CONFLICT,
        RelayError::AlreadyProcessed => StatusCode::CONFLICT,
        RelayError::Pending(_) => StatusCode::ACCEPTED,
        RelayError::NotFound(_) => StatusCode::NOT_FOUND,
        RelayError::Expired(_) => StatusCode::GONE,
        RelayError::Upstream(_) => StatusCode::BAD_GATEWAY,
        RelayError::Conflict(_) => StatusCode::CONFLICT,
        RelayError::InvalidSignatures => StatusCode::UNAUTHORIZED,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if !matches!(status, StatusCode::ACCEPTED) {
            tracing::warn!(kind = self.0.kind(), error = %self.0, "request failed");
        }
        let body = ErrorBody {
            error: self.0.kind(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
