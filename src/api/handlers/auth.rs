//! Register, login, refresh, logout, password change, and the `/me` gate.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use utoipa::ToSchema;

use super::{extract_bearer_token, extract_client_ip, valid_email, ApiError, ErrorResponse};
use crate::auth::{AuthError, AuthService, PublicProfile};

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub display_name: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TokenPairResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub profile: PublicProfile,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct AccessTokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LogoutRequest {
    pub refresh_token: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Acknowledged {
    pub message: String,
}

/// Rate-limit identity for this request. Unknown clients share one bucket
/// rather than bypassing the limiter.
fn client_identifier(headers: &HeaderMap) -> String {
    extract_client_ip(headers).unwrap_or_else(|| "unknown".to_string())
}

#[utoipa::path(
    post,
    path = "/v1/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Credential created", body = PublicProfile),
        (status = 400, description = "Invalid email or weak password", body = ErrorResponse),
        (status = 409, description = "Email already registered", body = ErrorResponse),
        (status = 429, description = "Rate limited", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn register(
    headers: HeaderMap,
    auth: Extension<Arc<AuthService>>,
    payload: Option<Json<RegisterRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(bad_request("Missing payload"));
    };

    let email = request.email.trim().to_lowercase();
    if !valid_email(&email) {
        return Err(bad_request("Invalid email"));
    }

    let profile = auth
        .register(
            &email,
            &request.password,
            request.display_name.as_deref(),
            &client_identifier(&headers),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(profile)))
}

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Authenticated", body = TokenPairResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 403, description = "Account inactive", body = ErrorResponse),
        (status = 429, description = "Rate limited", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    auth: Extension<Arc<AuthService>>,
    payload: Option<Json<LoginRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(bad_request("Missing payload"));
    };

    let outcome = auth
        .login(
            &request.email,
            &request.password,
            &client_identifier(&headers),
        )
        .await?;

    Ok(Json(TokenPairResponse {
        access_token: outcome.access_token,
        refresh_token: outcome.refresh_token,
        token_type: "bearer".to_string(),
        expires_in: outcome.expires_in,
        profile: outcome.profile,
    }))
}

#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "New access token", body = AccessTokenResponse),
        (status = 401, description = "Invalid, expired, or revoked refresh token", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn refresh(
    auth: Extension<Arc<AuthService>>,
    payload: Option<Json<RefreshRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(bad_request("Missing payload"));
    };

    let outcome = auth.refresh(&request.refresh_token).await?;

    Ok(Json(AccessTokenResponse {
        access_token: outcome.access_token,
        token_type: "bearer".to_string(),
        expires_in: outcome.expires_in,
    }))
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    request_body = LogoutRequest,
    responses(
        (status = 200, description = "Tokens revoked best-effort", body = Acknowledged)
    ),
    tag = "auth"
)]
// Always 200: revocation is best-effort and a missing bearer is a no-op.
pub async fn logout(
    headers: HeaderMap,
    auth: Extension<Arc<AuthService>>,
    payload: Option<Json<LogoutRequest>>,
) -> impl IntoResponse {
    let refresh_token = payload.and_then(|Json(request)| request.refresh_token);

    if let Some(access_token) = extract_bearer_token(&headers) {
        auth.logout(access_token, refresh_token.as_deref()).await;
    } else {
        debug!("logout without bearer token");
    }

    Json(Acknowledged {
        message: "Logged out".to_string(),
    })
}

#[utoipa::path(
    post,
    path = "/v1/auth/password",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed", body = Acknowledged),
        (status = 400, description = "New password too weak", body = ErrorResponse),
        (status = 401, description = "Not authenticated or wrong current password", body = ErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn change_password(
    headers: HeaderMap,
    auth: Extension<Arc<AuthService>>,
    payload: Option<Json<ChangePasswordRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let credential = authorize_bearer(&headers, &auth).await?;

    let Some(Json(request)) = payload else {
        return Err(bad_request("Missing payload"));
    };

    auth.change_password(
        credential.id,
        &request.current_password,
        &request.new_password,
    )
    .await?;

    Ok(Json(Acknowledged {
        message: "Password changed".to_string(),
    }))
}

#[utoipa::path(
    get,
    path = "/v1/auth/me",
    responses(
        (status = 200, description = "The authenticated profile", body = PublicProfile),
        (status = 401, description = "Not authenticated", body = ErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn me(
    headers: HeaderMap,
    auth: Extension<Arc<AuthService>>,
) -> Result<impl IntoResponse, ApiError> {
    let credential = authorize_bearer(&headers, &auth).await?;
    Ok(Json(PublicProfile::from(&credential)))
}

async fn authorize_bearer(
    headers: &HeaderMap,
    auth: &AuthService,
) -> Result<crate::auth::Credential, ApiError> {
    let token = extract_bearer_token(headers).ok_or(AuthError::Unauthenticated)?;
    Ok(auth.authorize(token).await?)
}

fn bad_request(message: &str) -> ApiError {
    ApiError::BadRequest(message.to_string())
}
