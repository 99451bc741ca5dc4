//! Map validated CLI arguments to the action to run.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{oidc, rate_limit, store, tokens};
use anyhow::Result;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .filter(|v| !v.trim().is_empty());

    let store_opts = store::Options::parse(matches)?;
    let oidc_opts = oidc::Options::parse(matches)?;
    let token_opts = tokens::Options::parse(matches)?;
    let rate_limit_opts = rate_limit::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        redis_url: store_opts.redis_url,
        store_timeout: store_opts.timeout,
        oidc_issuer: oidc_opts.issuer,
        oidc_client_id: oidc_opts.client_id,
        insecure_verifier: oidc_opts.insecure,
        access_token_secret: token_opts.access_token_secret,
        access_token_ttl_seconds: token_opts.access_token_ttl_seconds,
        refresh_token_ttl_seconds: token_opts.refresh_token_ttl_seconds,
        rate_limit_enabled: rate_limit_opts.enabled,
        rate_limit_mode: rate_limit_opts.mode,
        rate_limit_rps: rate_limit_opts.rps,
        rate_limit_burst: rate_limit_opts.burst,
        rate_limit_window_seconds: rate_limit_opts.window_seconds,
        trusted_proxies: rate_limit_opts.trusted_proxies,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::rate_limit::RateLimitMode;

    #[test]
    fn maps_arguments_to_server_args() {
        temp_env::with_vars(
            [
                ("TEXGATE_DSN", None::<&str>),
                ("TEXGATE_REDIS_URL", None),
                ("TEXGATE_OIDC_ISSUER", None),
                ("TEXGATE_OIDC_CLIENT_ID", None),
                ("TEXGATE_INSECURE_VERIFIER", None),
                ("TEXGATE_RATE_LIMIT_MODE", None),
                ("TEXGATE_TRUSTED_PROXIES", None),
            ],
            || {
                let matches = crate::cli::commands::new().get_matches_from(vec![
                    "texgate",
                    "--port",
                    "8181",
                    "--redis-url",
                    "redis://localhost:6379",
                    "--insecure-verifier",
                    "--rate-limit-enabled",
                    "--rate-limit-mode",
                    "distributed",
                    "--trusted-proxies",
                    "10.0.0.1,::1",
                ]);
                let Ok(Action::Server(args)) = handler(&matches) else {
                    panic!("dispatch should produce a server action");
                };
                assert_eq!(args.port, 8181);
                assert_eq!(args.dsn, None);
                assert_eq!(args.redis_url.as_deref(), Some("redis://localhost:6379"));
                assert!(args.insecure_verifier);
                assert!(args.rate_limit_enabled);
                assert_eq!(args.rate_limit_mode, RateLimitMode::Distributed);
                assert_eq!(
                    args.trusted_proxies,
                    vec![
                        std::net::IpAddr::from([10, 0, 0, 1]),
                        std::net::IpAddr::from(std::net::Ipv6Addr::LOCALHOST),
                    ]
                );
            },
        );
    }

    #[test]
    fn empty_dsn_is_unset() {
        temp_env::with_vars(
            [
                ("TEXGATE_DSN", Some("")),
                ("TEXGATE_OIDC_ISSUER", None),
                ("TEXGATE_OIDC_CLIENT_ID", None),
            ],
            || {
                let matches = crate::cli::commands::new().get_matches_from(vec!["texgate"]);
                let Ok(Action::Server(args)) = handler(&matches) else {
                    panic!("dispatch should produce a server action");
                };
                assert_eq!(args.dsn, None);
            },
        );
    }
}
