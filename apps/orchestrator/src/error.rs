// [apps/orchestrator/src/error.rs]
//! `ApiError` maps every failure surfaced to a client onto the error
//! envelope `{detail, error:{code, message, request_id}}`, following the
//! teacher's `DbError` enum shape but targeted at `axum::IntoResponse`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use cmdb_infra_db::DbError;
use serde::Serialize;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    RequestFailed(String),
    #[error("Content-Length header is required")]
    LengthRequired,
    #[error("Content-Length header is invalid")]
    InvalidContentLength,
    #[error("payload exceeds the configured size limit")]
    PayloadTooLarge,
    #[error("rate limit exceeded")]
    RateLimited,
    #[error("{0}")]
    ServiceUnavailable(String),
    #[error("request exceeded its wall-clock timeout")]
    RequestTimeout,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "VALIDATION_ERROR",
            ApiError::RequestFailed(_) => "REQUEST_FAILED",
            ApiError::LengthRequired => "LENGTH_REQUIRED",
            ApiError::InvalidContentLength => "INVALID_CONTENT_LENGTH",
            ApiError::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            ApiError::RateLimited => "RATE_LIMITED",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            ApiError::RequestTimeout => "REQUEST_TIMEOUT",
            ApiError::NotFound(_) => "REQUEST_FAILED",
            ApiError::Conflict(_) => "REQUEST_FAILED",
            ApiError::Forbidden(_) => "REQUEST_FAILED",
            ApiError::Unauthorized => "REQUEST_FAILED",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::RequestFailed(_) => StatusCode::BAD_REQUEST,
            ApiError::LengthRequired => StatusCode::LENGTH_REQUIRED,
            ApiError::InvalidContentLength => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::RequestTimeout => StatusCode::GATEWAY_TIMEOUT,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
    request_id: String,
}

/// Request-scoped id threaded through via the correlation-id middleware;
/// handlers that don't have one (background tasks) pass `"-"`.
pub fn to_response(err: &ApiError, request_id: &str) -> Response {
    let status = err.status();
    let body = ErrorBody {
        detail: err.to_string(),
        error: ErrorDetail { code: err.code(), message: err.to_string(), request_id: request_id.to_string() },
    };
    (status, Json(json!(body))).into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        to_response(&self, "-")
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(msg) => ApiError::NotFound(msg),
            DbError::Conflict(msg) => ApiError::Conflict(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

/// Strips everything outside `[a-z0-9_.:-]`, lowercases, and truncates to
/// 200 chars so internal exception text never leaks into `last_error`.
pub fn sanitize_error_slug(raw: &str) -> String {
    let lowered = raw.to_ascii_lowercase();
    let cleaned: String = lowered
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '-') { c } else { '_' })
        .collect();
    cleaned.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_strips_and_truncates() {
        let raw = "Connection refused (os error 111) at 10.0.0.5:5432!!";
        let slug = sanitize_error_slug(raw);
        assert!(slug.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '.' | ':' | '-')));
        assert!(slug.len() <= 200);
    }
}
