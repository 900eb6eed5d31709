use crate::{
    api::handlers::{auth, health, root},
    auth::{AuthService, CircuitBreaker, PgCredentialRepo},
    cli::{actions::server, globals::GlobalArgs},
    kv::RedisStore,
};
use anyhow::{anyhow, Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, Request,
    },
    routing::{get, post},
    Extension, Router,
};
use chrono::Duration as ChronoDuration;
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;
use url::Url;

pub mod handlers;
mod openapi;

pub use openapi::openapi;

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(args: &server::Args, globals: &GlobalArgs) -> Result<()> {
    // Connect to database
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&args.dsn)
        .await
        .context("Failed to connect to database")?;

    let store = RedisStore::connect(&args.redis_url)
        .await
        .context("Failed to connect to redis")?;

    let tokens = crate::auth::TokenService::new(&globals.token_secret)
        .with_access_ttl(ChronoDuration::days(args.access_ttl_days))
        .with_refresh_ttl(ChronoDuration::days(args.refresh_ttl_days));

    let auth_service = Arc::new(
        AuthService::new(
            Arc::new(PgCredentialRepo::new(pool.clone())),
            Arc::new(store),
            &globals.token_secret,
        )
        .with_token_service(tokens),
    );

    // One breaker per protected dependency, for the process lifetime.
    let db_breaker = Arc::new(CircuitBreaker::new("database"));

    let cors_origin = cors_origin(&globals.cors_origin)?;
    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(AllowOrigin::exact(cors_origin))
        .allow_credentials(true);

    let app = router().layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(cors)
            .layer(Extension(auth_service))
            .layer(Extension(db_breaker))
            .layer(Extension(pool)),
    );

    let listener = TcpListener::bind(format!("::0:{}", args.port)).await?;

    info!("Listening on [::]:{}", args.port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

/// Build the API router. Routes documented in the `OpenAPI` spec live in
/// `openapi.rs` as `#[utoipa::path]` annotations on the handlers; `/` is
/// intentionally undocumented.
#[must_use]
pub fn router() -> Router {
    Router::new()
        .route("/", get(root::root))
        .route("/health", get(health::health))
        .route("/v1/health/db", get(health::db))
        .route("/v1/health/breakers", get(health::breakers))
        .route("/v1/auth/register", post(auth::register))
        .route("/v1/auth/login", post(auth::login))
        .route("/v1/auth/refresh", post(auth::refresh))
        .route("/v1/auth/logout", post(auth::logout))
        .route("/v1/auth/password", post(auth::change_password))
        .route("/v1/auth/me", get(auth::me))
        .route("/openapi.json", get(openapi::serve))
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn cors_origin(origin: &str) -> Result<HeaderValue> {
    let parsed =
        Url::parse(origin).with_context(|| format!("Invalid CORS origin: {origin}"))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("CORS origin must include a valid host: {origin}"))?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let exact = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&exact).context("Failed to build CORS origin header")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cors_origin_strips_path_and_keeps_port() -> Result<()> {
        let origin = cors_origin("http://localhost:3000/some/path")?;
        assert_eq!(origin, HeaderValue::from_static("http://localhost:3000"));

        let origin = cors_origin("https://app.example.com")?;
        assert_eq!(origin, HeaderValue::from_static("https://app.example.com"));
        Ok(())
    }

    #[test]
    fn cors_origin_rejects_garbage() {
        assert!(cors_origin("not a url").is_err());
    }
}
