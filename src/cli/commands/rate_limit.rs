use crate::auth::rate_limit::RateLimitMode;
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::net::IpAddr;

pub const ARG_RATE_LIMIT_ENABLED: &str = "rate-limit-enabled";
pub const ARG_RATE_LIMIT_RPS: &str = "rate-limit-rps";
pub const ARG_RATE_LIMIT_BURST: &str = "rate-limit-burst";
pub const ARG_RATE_LIMIT_MODE: &str = "rate-limit-mode";
pub const ARG_RATE_LIMIT_WINDOW_SECONDS: &str = "rate-limit-window-seconds";
pub const ARG_TRUSTED_PROXIES: &str = "trusted-proxies";

#[derive(Debug, Clone)]
pub struct Options {
    pub enabled: bool,
    pub rps: u32,
    pub burst: u32,
    pub mode: RateLimitMode,
    pub window_seconds: u64,
    pub trusted_proxies: Vec<IpAddr>,
}

impl Options {
    /// Parse rate limit arguments from matches.
    ///
    /// # Errors
    /// Returns an error if a value is missing or the mode is unknown.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let get_u32 = |id: &str| {
            matches
                .get_one::<u32>(id)
                .copied()
                .ok_or_else(|| anyhow::anyhow!("missing required argument: --{id}"))
        };

        let mode = matches
            .get_one::<String>(ARG_RATE_LIMIT_MODE)
            .map_or(Ok(RateLimitMode::Local), |mode| mode.parse())
            .map_err(anyhow::Error::msg)?;

        Ok(Self {
            enabled: matches.get_flag(ARG_RATE_LIMIT_ENABLED),
            rps: get_u32(ARG_RATE_LIMIT_RPS)?,
            burst: get_u32(ARG_RATE_LIMIT_BURST)?,
            mode,
            window_seconds: matches
                .get_one::<u64>(ARG_RATE_LIMIT_WINDOW_SECONDS)
                .copied()
                .unwrap_or(60),
            trusted_proxies: matches
                .get_many::<IpAddr>(ARG_TRUSTED_PROXIES)
                .map(|proxies| proxies.copied().collect())
                .unwrap_or_default(),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_RATE_LIMIT_ENABLED)
                .long(ARG_RATE_LIMIT_ENABLED)
                .help("Enable per-identity request admission")
                .env("TEXGATE_RATE_LIMIT_ENABLED")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_RATE_LIMIT_RPS)
                .long(ARG_RATE_LIMIT_RPS)
                .help("Sustained requests per second per identity")
                .default_value("10")
                .env("TEXGATE_RATE_LIMIT_RPS")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_RATE_LIMIT_BURST)
                .long(ARG_RATE_LIMIT_BURST)
                .help("Bucket capacity per identity")
                .default_value("20")
                .env("TEXGATE_RATE_LIMIT_BURST")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_RATE_LIMIT_MODE)
                .long(ARG_RATE_LIMIT_MODE)
                .help("Where buckets live")
                .long_help(
                    "Where buckets live: `local` keeps token buckets in this process, `distributed` shares\nfixed-window counters through Redis (requires --redis-url).",
                )
                .default_value("local")
                .env("TEXGATE_RATE_LIMIT_MODE")
                .value_parser(["local", "distributed"]),
        )
        .arg(
            Arg::new(ARG_RATE_LIMIT_WINDOW_SECONDS)
                .long(ARG_RATE_LIMIT_WINDOW_SECONDS)
                .help("Window length for distributed mode, in seconds")
                .default_value("60")
                .env("TEXGATE_RATE_LIMIT_WINDOW_SECONDS")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_TRUSTED_PROXIES)
                .long(ARG_TRUSTED_PROXIES)
                .help("Comma separated proxy addresses whose X-Forwarded-For is believed")
                .long_help(
                    "Comma separated proxy addresses. Requests are keyed by the connected peer; only when
that peer is listed are X-Forwarded-For (right-most untrusted hop) and X-Real-IP used.",
                )
                .env("TEXGATE_TRUSTED_PROXIES")
                .value_delimiter(',')
                .action(ArgAction::Append)
                .value_parser(clap::value_parser!(IpAddr)),
        )
}
