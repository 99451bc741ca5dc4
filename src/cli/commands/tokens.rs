use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_ACCESS_TOKEN_SECRET: &str = "access-token-secret";
pub const ARG_ACCESS_TOKEN_TTL_SECONDS: &str = "access-token-ttl-seconds";
pub const ARG_REFRESH_TOKEN_TTL_SECONDS: &str = "refresh-token-ttl-seconds";

/// Upper bound for either lifetime: ten years.
pub const MAX_TTL_SECONDS: u64 = 10 * 365 * 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct Options {
    pub access_token_secret: Option<SecretString>,
    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_seconds: i64,
}

impl Options {
    /// Parse token arguments from matches.
    ///
    /// # Errors
    /// Returns an error if a TTL is missing or out of range.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let ttl = |id: &str| -> anyhow::Result<i64> {
            let seconds = matches
                .get_one::<u64>(id)
                .copied()
                .ok_or_else(|| anyhow::anyhow!("missing required argument: --{id}"))?;
            i64::try_from(seconds).map_err(|_| anyhow::anyhow!("--{id} is out of range"))
        };

        Ok(Self {
            access_token_secret: matches
                .get_one::<String>(ARG_ACCESS_TOKEN_SECRET)
                .filter(|v| !v.trim().is_empty())
                .map(|v| SecretString::from(v.clone())),
            access_token_ttl_seconds: ttl(ARG_ACCESS_TOKEN_TTL_SECONDS)?,
            refresh_token_ttl_seconds: ttl(ARG_REFRESH_TOKEN_TTL_SECONDS)?,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ACCESS_TOKEN_SECRET)
                .long(ARG_ACCESS_TOKEN_SECRET)
                .help("HS256 secret for access tokens (random per process if unset)")
                .env("TEXGATE_ACCESS_TOKEN_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_ACCESS_TOKEN_TTL_SECONDS)
                .long(ARG_ACCESS_TOKEN_TTL_SECONDS)
                .help("Access token lifetime in seconds")
                .default_value("900")
                .env("TEXGATE_ACCESS_TOKEN_TTL_SECONDS")
                .value_parser(clap::value_parser!(u64).range(1..=MAX_TTL_SECONDS)),
        )
        .arg(
            Arg::new(ARG_REFRESH_TOKEN_TTL_SECONDS)
                .long(ARG_REFRESH_TOKEN_TTL_SECONDS)
                .help("Refresh session lifetime in seconds")
                .default_value("604800")
                .env("TEXGATE_REFRESH_TOKEN_TTL_SECONDS")
                .value_parser(clap::value_parser!(u64).range(1..=MAX_TTL_SECONDS)),
        )
}
