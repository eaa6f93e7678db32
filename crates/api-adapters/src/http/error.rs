//! Domain error → HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use domains::{DenialReason, DomainError, ErrorKind};
use serde_json::json;
use tracing::error;

#[derive(Debug)]
pub enum ApiError {
    Domain(DomainError),
    Unauthorized,
    Forbidden,
    BadRequest(String),
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Domain(err)
    }
}

pub fn status_for(err: &DomainError) -> StatusCode {
    match err.kind() {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::DeniedByPolicy if err.denial() == Some(DenialReason::QuotaExhausted) => {
            StatusCode::TOO_MANY_REQUESTS
        }
        ErrorKind::DeniedByPolicy | ErrorKind::NoBoundariesConfigured => StatusCode::CONFLICT,
        ErrorKind::Persistence => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Domain(err) => {
                let status = status_for(&err);
                if status == StatusCode::SERVICE_UNAVAILABLE {
                    error!(error = %err, "storage failure");
                }
                let mut body = json!({ "error": err.kind().code(), "message": err.to_string() });
                if let Some(reason) = err.denial() {
                    body["reason"] = json!(reason.as_str());
                }
                (status, body)
            }
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                json!({ "error": "unauthorized", "message": "admin token missing or invalid" }),
            ),
            ApiError::Forbidden => (
                StatusCode::FORBIDDEN,
                json!({ "error": "forbidden", "message": "acting player is not a moderator or admin" }),
            ),
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, json!({ "error": ErrorKind::Validation.code(), "message": message }))
            }
        };
        (status, Json(body)).into_response()
    }
}
