use super::{DEFAULT_SESSION_TTL, Session, SessionError, SessionStore};
use crate::{
    auth::tokens::hash_token,
    store::{DEFAULT_STORE_TIMEOUT, bounded_query},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::Instrument;

/// PostgreSQL session store. Has no native expiry: the session service deletes
/// stale rows lazily when it reads them. Every query is bounded by the store
/// timeout.
#[derive(Clone, Debug)]
pub struct DurableSessionStore {
    pool: PgPool,
    timeout: Duration,
}

impl DurableSessionStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Rows persisted without an expiry get the default window instead of living
/// forever. An explicit expiry is kept even when it is already past.
fn row_expiry(created_at: DateTime<Utc>, expires_at: Option<DateTime<Utc>>) -> DateTime<Utc> {
    expires_at.unwrap_or(created_at + DEFAULT_SESSION_TTL)
}

#[async_trait]
impl SessionStore for DurableSessionStore {
    async fn create(&self, session: &Session) -> Result<(), SessionError> {
        let query = r"
            INSERT INTO sessions (token_hash, sub, created_at, expires_at)
            VALUES ($1, $2, $3, $4)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let insert = sqlx::query(query)
            .bind(hash_token(&session.refresh_token))
            .bind(&session.sub)
            .bind(session.created_at)
            .bind(session.expires_at)
            .execute(&self.pool)
            .instrument(span);
        bounded_query::<_, SessionError, _>(self.timeout, insert).await?;
        Ok(())
    }

    async fn get_by_refresh(&self, refresh_token: &str) -> Result<Option<Session>, SessionError> {
        let query = "SELECT sub, created_at, expires_at FROM sessions WHERE token_hash = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let select = sqlx::query(query)
            .bind(hash_token(refresh_token))
            .fetch_optional(&self.pool)
            .instrument(span);
        let row = bounded_query::<_, SessionError, _>(self.timeout, select).await?;

        Ok(row.map(|row| {
            let created_at = row.get("created_at");
            Session {
                refresh_token: refresh_token.to_string(),
                sub: row.get("sub"),
                created_at,
                expires_at: row_expiry(created_at, row.get("expires_at")),
            }
        }))
    }

    async fn delete_by_refresh(&self, refresh_token: &str) -> Result<(), SessionError> {
        let query = "DELETE FROM sessions WHERE token_hash = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let delete = sqlx::query(query)
            .bind(hash_token(refresh_token))
            .execute(&self.pool)
            .instrument(span);
        bounded_query::<_, SessionError, _>(self.timeout, delete).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "durable"
    }
}
