use axum::{response::IntoResponse, Json};
use utoipa::OpenApi;

use crate::api::handlers::{auth, health, ErrorResponse};
use crate::auth::{BreakerStats, CircuitState, PublicProfile};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "gardisto",
        description = "Authentication and request-protection core",
        license(name = "BSD-3-Clause")
    ),
    paths(
        health::health,
        health::db,
        health::breakers,
        auth::register,
        auth::login,
        auth::refresh,
        auth::logout,
        auth::change_password,
        auth::me
    ),
    components(schemas(
        ErrorResponse,
        PublicProfile,
        BreakerStats,
        CircuitState,
        health::Health,
        health::DbHealth,
        auth::RegisterRequest,
        auth::LoginRequest,
        auth::TokenPairResponse,
        auth::RefreshRequest,
        auth::AccessTokenResponse,
        auth::LogoutRequest,
        auth::ChangePasswordRequest,
        auth::Acknowledged
    )),
    tags(
        (name = "auth", description = "Sessions: registration, login, refresh, revocation"),
        (name = "health", description = "Liveness and dependency health")
    )
)]
struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

// axum handler serving the generated document at /openapi.json
pub async fn serve() -> impl IntoResponse {
    Json(openapi())
}
