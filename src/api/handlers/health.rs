use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use sqlx::{Connection, PgPool};
use std::sync::Arc;
use tracing::{error, info_span, Instrument};
use utoipa::ToSchema;

use crate::auth::{BreakerError, BreakerStats, CircuitBreaker};

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    name: String,
    version: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct DbHealth {
    database: String,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is running", body = Health)
    ),
    tag = "health"
)]
// Liveness only; dependency health lives under /v1/health.
pub async fn health() -> impl IntoResponse {
    Json(Health {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[utoipa::path(
    get,
    path = "/v1/health/db",
    responses(
        (status = 200, description = "Database is reachable", body = DbHealth),
        (status = 503, description = "Database is unreachable or the breaker is open", body = DbHealth)
    ),
    tag = "health"
)]
pub async fn db(
    pool: Extension<PgPool>,
    breaker: Extension<Arc<CircuitBreaker>>,
) -> impl IntoResponse {
    let result = breaker.call(|| ping(&pool)).await;

    let (status, database) = match result {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(BreakerError::Open { .. }) => (StatusCode::SERVICE_UNAVAILABLE, "open-circuit"),
        Err(BreakerError::Inner(err)) => {
            error!("database health check failed: {err}");
            (StatusCode::SERVICE_UNAVAILABLE, "error")
        }
    };

    (
        status,
        Json(DbHealth {
            database: database.to_string(),
        }),
    )
}

#[utoipa::path(
    get,
    path = "/v1/health/breakers",
    responses(
        (status = 200, description = "Circuit breaker statistics", body = [BreakerStats])
    ),
    tag = "health"
)]
pub async fn breakers(breaker: Extension<Arc<CircuitBreaker>>) -> impl IntoResponse {
    Json(vec![breaker.stats()])
}

async fn ping(pool: &PgPool) -> Result<(), sqlx::Error> {
    let acquire_span = info_span!(
        "db.acquire",
        db.system = "postgresql",
        db.operation = "ACQUIRE"
    );
    let mut conn = pool.acquire().instrument(acquire_span).await?;

    let ping_span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
    conn.ping().instrument(ping_span).await
}
