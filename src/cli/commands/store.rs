use clap::{Arg, ArgMatches, Command};
use std::time::Duration;

pub const ARG_REDIS_URL: &str = "redis-url";
pub const ARG_STORE_TIMEOUT_MS: &str = "store-timeout-ms";

#[derive(Debug, Clone)]
pub struct Options {
    pub redis_url: Option<String>,
    pub timeout: Duration,
}

impl Options {
    /// Parse store arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the timeout is missing.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let timeout_ms = matches
            .get_one::<u64>(ARG_STORE_TIMEOUT_MS)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("missing required argument: --{ARG_STORE_TIMEOUT_MS}"))?;

        Ok(Self {
            redis_url: matches
                .get_one::<String>(ARG_REDIS_URL)
                .cloned()
                .filter(|v| !v.trim().is_empty()),
            timeout: Duration::from_millis(timeout_ms),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_REDIS_URL)
                .long(ARG_REDIS_URL)
                .help("Redis URL for sessions, revocation and distributed rate limiting")
                .long_help(
                    "Redis URL (redis:// or rediss://). When set and the server answers PING at startup,\nRedis holds refresh sessions and the revocation list, and backs distributed rate limiting.",
                )
                .env("TEXGATE_REDIS_URL"),
        )
        .arg(
            Arg::new(ARG_STORE_TIMEOUT_MS)
                .long(ARG_STORE_TIMEOUT_MS)
                .help("Timeout for every remote store call, in milliseconds")
                .default_value("2000")
                .env("TEXGATE_STORE_TIMEOUT_MS")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}
