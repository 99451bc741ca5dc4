//! Startup: pick backends, assemble [`AuthState`] and serve.
//!
//! Flow Overview:
//! 1) Redis, when configured and answering `PING`, becomes the session store
//!    and backs revocation and distributed rate limiting.
//! 2) PostgreSQL, when `--dsn` is set, holds users; it also holds sessions when
//!    Redis was not selected.
//! 3) Every degradation is logged once as a [`StartupError`] and the service
//!    starts with whatever is left.

use crate::{
    api::{self, AuthState},
    auth::{
        AccessTokens, DurableSessionStore, InsecureVerifier, OidcVerifier, PgUserDirectory,
        RevocationList, SCHEMA_SQL, SessionService, SessionStore, StartupError, UserDirectory,
        Verifier, VolatileSessionStore,
        rate_limit::{
            DistributedRateLimiter, LocalRateLimiter, NoopRateLimiter, RateLimitConfig,
            RateLimitMode, RateLimiter,
        },
    },
    cli::telemetry,
    store::{ExpiringStore, RedisStore},
};
use anyhow::{Context, Result};
use rand::{RngCore, rngs::OsRng};
use secrecy::SecretString;
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::{net::IpAddr, sync::Arc, time::Duration};
use tracing::{error, info, warn};

const ACCESS_SECRET_BYTES: usize = 32;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<String>,
    pub redis_url: Option<String>,
    pub store_timeout: Duration,
    pub oidc_issuer: Option<String>,
    pub oidc_client_id: Option<String>,
    pub insecure_verifier: bool,
    pub access_token_secret: Option<SecretString>,
    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_seconds: i64,
    pub rate_limit_enabled: bool,
    pub rate_limit_mode: RateLimitMode,
    pub rate_limit_rps: u32,
    pub rate_limit_burst: u32,
    pub rate_limit_window_seconds: u64,
    pub trusted_proxies: Vec<IpAddr>,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the access token secret cannot be generated or the
/// server fails to bind or serve.
pub async fn execute(args: Args) -> Result<()> {
    let redis = connect_redis(args.redis_url.as_deref(), args.store_timeout).await;
    let pool = connect_postgres(args.dsn.as_deref(), args.store_timeout).await;

    let sessions = select_session_store(redis.as_ref(), pool.as_ref(), args.store_timeout)
        .map(SessionService::new);
    match &sessions {
        Some(service) => info!(backend = service.backend(), "Session store selected"),
        None => warn!(
            "{}; session routes are disabled",
            StartupError::ConfigurationMissing("session store")
        ),
    }

    let directory = pool.clone().map(|pool| {
        Arc::new(PgUserDirectory::new(pool).with_timeout(args.store_timeout))
            as Arc<dyn UserDirectory>
    });

    let verifier = build_verifier(&args).await;

    let revocation = RevocationList::new(redis.clone());
    if !revocation.is_enabled() {
        warn!("Revocation list has no backing store; revoked tokens are not tracked");
    }

    let rate_limiter = build_rate_limiter(&args, redis.as_ref());

    let access_secret = match args.access_token_secret {
        Some(secret) => secret,
        None => {
            warn!("No access token secret configured; generated a per-process secret");
            random_secret()?
        }
    };
    let access = AccessTokens::new(
        &access_secret,
        ttl_from_seconds(args.access_token_ttl_seconds).context("Invalid access token TTL")?,
    );
    let refresh_ttl =
        ttl_from_seconds(args.refresh_token_ttl_seconds).context("Invalid refresh token TTL")?;

    let state = AuthState::new(access)
        .with_verifier(verifier)
        .with_sessions(sessions)
        .with_directory(directory)
        .with_revocation(revocation)
        .with_rate_limiter(rate_limiter)
        .with_refresh_ttl(refresh_ttl)
        .with_trusted_proxies(args.trusted_proxies);

    let result = api::new(args.port, Arc::new(state)).await;

    telemetry::shutdown();

    result
}

async fn connect_redis(url: Option<&str>, timeout: Duration) -> Option<Arc<dyn ExpiringStore>> {
    let url = url?;
    match RedisStore::connect(url, timeout).await {
        Ok(store) => {
            info!("Connected to redis");
            Some(Arc::new(store))
        }
        Err(err) => {
            error!(
                "{}",
                StartupError::BackendUnavailable {
                    backend: "redis",
                    reason: format!("{err:#}"),
                }
            );
            None
        }
    }
}

async fn connect_postgres(dsn: Option<&str>, timeout: Duration) -> Option<PgPool> {
    let dsn = dsn?;
    let connect = async {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(5)
            .max_lifetime(Duration::from_secs(60 * 2))
            .acquire_timeout(timeout)
            .test_before_acquire(true)
            .connect(dsn)
            .await
            .context("Failed to connect to database")?;

        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&pool)
            .await
            .context("Failed to bootstrap schema")?;

        Ok::<_, anyhow::Error>(pool)
    };

    match connect.await {
        Ok(pool) => {
            info!("Connected to database");
            Some(pool)
        }
        Err(err) => {
            error!(
                "{}",
                StartupError::BackendUnavailable {
                    backend: "postgres",
                    reason: format!("{err:#}"),
                }
            );
            None
        }
    }
}

/// Redis first, then PostgreSQL. Returns `None` when neither is usable.
fn select_session_store(
    redis: Option<&Arc<dyn ExpiringStore>>,
    pool: Option<&PgPool>,
    timeout: Duration,
) -> Option<Arc<dyn SessionStore>> {
    if let Some(redis) = redis {
        return Some(Arc::new(VolatileSessionStore::new(Arc::clone(redis))));
    }
    pool.map(|pool| {
        Arc::new(DurableSessionStore::new(pool.clone()).with_timeout(timeout))
            as Arc<dyn SessionStore>
    })
}

/// Positive lifetime that stays representable as a `chrono::Duration`.
fn ttl_from_seconds(seconds: i64) -> Result<chrono::Duration> {
    if seconds <= 0 {
        anyhow::bail!("{seconds}s is not a positive lifetime");
    }
    chrono::Duration::try_seconds(seconds)
        .ok_or_else(|| anyhow::anyhow!("{seconds}s is out of range"))
}

async fn build_verifier(args: &Args) -> Option<Arc<dyn Verifier>> {
    if args.insecure_verifier {
        return Some(Arc::new(InsecureVerifier::enable()));
    }

    let (Some(issuer), Some(client_id)) = (&args.oidc_issuer, &args.oidc_client_id) else {
        warn!(
            "{}; login is disabled",
            StartupError::ConfigurationMissing("--oidc-issuer")
        );
        return None;
    };

    match OidcVerifier::discover(issuer, client_id).await {
        Ok(verifier) => Some(Arc::new(verifier)),
        Err(err) => {
            error!(
                "{}; login is disabled",
                StartupError::BackendUnavailable {
                    backend: "oidc",
                    reason: format!("{err:#}"),
                }
            );
            None
        }
    }
}

fn build_rate_limiter(
    args: &Args,
    redis: Option<&Arc<dyn ExpiringStore>>,
) -> Arc<dyn RateLimiter> {
    if !args.rate_limit_enabled {
        return Arc::new(NoopRateLimiter);
    }

    let config = RateLimitConfig::new(args.rate_limit_rps, args.rate_limit_burst)
        .with_window(Duration::from_secs(args.rate_limit_window_seconds));

    match (args.rate_limit_mode, redis) {
        (RateLimitMode::Distributed, Some(redis)) => {
            info!(limit = config.window_limit(), "Distributed rate limiting enabled");
            Arc::new(DistributedRateLimiter::new(config, Arc::clone(redis)))
        }
        (RateLimitMode::Distributed, None) => {
            error!(
                "{}; falling back to local rate limiting",
                StartupError::ConfigurationMissing("--redis-url")
            );
            Arc::new(LocalRateLimiter::new(config))
        }
        (RateLimitMode::Local, _) => {
            info!(
                rps = config.rate(),
                burst = config.burst(),
                "Local rate limiting enabled"
            );
            Arc::new(LocalRateLimiter::new(config))
        }
    }
}

fn random_secret() -> Result<SecretString> {
    let mut bytes = [0u8; ACCESS_SECRET_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("Failed to generate access token secret")?;
    Ok(SecretString::from(hex::encode(bytes)))
}
