//! Route handlers and shared utilities.

pub mod auth;
pub mod health;
pub mod root;

use axum::{
    http::{header::RETRY_AFTER, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::error;
use utoipa::ToSchema;

use crate::auth::AuthError;

/// Stable machine-readable error body. `retry_after` is only present on
/// rate-limited responses.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub error_code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

/// Handler-level failure. Wraps [`AuthError`] so handlers can use `?`
/// and still produce the stable error body; `BadRequest` covers shape
/// errors caught before the orchestrator is involved.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Auth(AuthError),
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        Self::Auth(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let auth_err = match self {
            Self::BadRequest(message) => {
                let body = ErrorResponse {
                    error_code: "invalid_request".to_string(),
                    message,
                    retry_after: None,
                };
                return (StatusCode::BAD_REQUEST, Json(body)).into_response();
            }
            Self::Auth(err) => err,
        };

        let (status, error_code, message) = match &auth_err {
            AuthError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                "invalid_credentials",
                "Invalid credentials".to_string(),
            ),
            AuthError::InvalidToken | AuthError::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                "unauthenticated",
                "Not authenticated".to_string(),
            ),
            AuthError::Inactive => (
                StatusCode::FORBIDDEN,
                "account_inactive",
                "Account is inactive".to_string(),
            ),
            AuthError::AlreadyExists => (
                StatusCode::CONFLICT,
                "already_exists",
                "Email already registered".to_string(),
            ),
            AuthError::WeakPassword(rejection) => (
                StatusCode::BAD_REQUEST,
                "weak_password",
                rejection.to_string(),
            ),
            AuthError::RateLimited { retry_after } => {
                let secs = retry_after.as_secs().max(1);
                let body = ErrorResponse {
                    error_code: "rate_limited".to_string(),
                    message: "Too many requests".to_string(),
                    retry_after: Some(secs),
                };
                return (
                    StatusCode::TOO_MANY_REQUESTS,
                    [(RETRY_AFTER, secs.to_string())],
                    Json(body),
                )
                    .into_response();
            }
            AuthError::Unavailable(detail) => {
                error!("dependency unavailable: {detail}");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "unavailable",
                    "Service temporarily unavailable".to_string(),
                )
            }
            AuthError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                "Internal error".to_string(),
            ),
        };

        let body = ErrorResponse {
            error_code: error_code.to_string(),
            message,
            retry_after: None,
        };
        (status, Json(body)).into_response()
    }
}

static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is valid")
});

/// Lightweight email sanity check used before persisting data.
pub fn valid_email(email: &str) -> bool {
    EMAIL_REGEX.is_match(email)
}

/// Pull the token out of an `Authorization: Bearer` header.
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Extract a client IP for rate limiting from common proxy headers.
pub fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
