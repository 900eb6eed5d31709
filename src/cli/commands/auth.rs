use clap::{Arg, Command};

pub const ARG_TOKEN_SECRET: &str = "token-secret";
pub const ARG_ACCESS_TTL_DAYS: &str = "access-ttl-days";
pub const ARG_REFRESH_TTL_DAYS: &str = "refresh-ttl-days";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_TOKEN_SECRET)
                .long(ARG_TOKEN_SECRET)
                .help("Secret used to sign access and refresh tokens (rotating it invalidates all outstanding tokens)")
                .env("GARDISTO_TOKEN_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_ACCESS_TTL_DAYS)
                .long(ARG_ACCESS_TTL_DAYS)
                .help("Access token lifetime in days")
                .default_value("7")
                .env("GARDISTO_ACCESS_TTL_DAYS")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_REFRESH_TTL_DAYS)
                .long(ARG_REFRESH_TTL_DAYS)
                .help("Refresh token lifetime in days")
                .default_value("30")
                .env("GARDISTO_REFRESH_TTL_DAYS")
                .value_parser(clap::value_parser!(i64)),
        )
}
