use crate::cli::{
    actions::{server::Args, Action},
    commands::{auth, redis},
};
use anyhow::{Context, Result};
use secrecy::SecretString;

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;
    let redis_url = matches
        .get_one::<String>(redis::ARG_REDIS_URL)
        .cloned()
        .context("missing required argument: --redis-url")?;
    let token_secret = matches
        .get_one::<String>(auth::ARG_TOKEN_SECRET)
        .cloned()
        .map(SecretString::from)
        .context("missing required argument: --token-secret")?;
    let cors_origin = matches
        .get_one::<String>("cors-origin")
        .cloned()
        .unwrap_or_else(|| "http://localhost:3000".to_string());
    let access_ttl_days = matches
        .get_one::<i64>(auth::ARG_ACCESS_TTL_DAYS)
        .copied()
        .unwrap_or(7);
    let refresh_ttl_days = matches
        .get_one::<i64>(auth::ARG_REFRESH_TTL_DAYS)
        .copied()
        .unwrap_or(30);

    Ok(Action::Server(Args {
        port,
        dsn,
        redis_url,
        token_secret,
        cors_origin,
        access_ttl_days,
        refresh_ttl_days,
    }))
}
