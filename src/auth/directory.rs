//! User directory: idempotent mapping from verified claims to a durable user.
//!
//! Flow Overview:
//! 1) Claims without a subject are a no-op (`Ok(None)`), not an error.
//! 2) Otherwise a single atomic find-or-create-then-update keyed by subject
//!    sets email/name and refreshes `updated_at`.
//! 3) `sub` and `created_at` never change after the first write.

use super::{claims::Claims, error::DirectoryError};
use crate::store::{DEFAULT_STORE_TIMEOUT, bounded_query};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use sqlx::{PgPool, Row, postgres::PgRow};
use std::{collections::HashMap, time::Duration};
use tracing::Instrument;
use utoipa::ToSchema;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct User {
    pub sub: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Create or refresh the user for `claims`.
    ///
    /// # Errors
    /// Returns the store error; a missing subject is `Ok(None)`.
    async fn upsert_from_claims(&self, claims: &Claims) -> Result<Option<User>, DirectoryError>;

    /// # Errors
    /// Returns the store error; an unknown subject is `Ok(None)`.
    async fn find_by_subject(&self, sub: &str) -> Result<Option<User>, DirectoryError>;
}

/// PostgreSQL-backed directory (`users` table).
#[derive(Clone, Debug)]
pub struct PgUserDirectory {
    pool: PgPool,
    timeout: Duration,
}

impl PgUserDirectory {
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

fn user_from_row(row: &PgRow) -> User {
    User {
        sub: row.get("sub"),
        name: row.get("name"),
        email: row.get("email"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn upsert_from_claims(&self, claims: &Claims) -> Result<Option<User>, DirectoryError> {
        let Some(sub) = claims.sub() else {
            return Ok(None);
        };

        // One statement so concurrent logins for the same subject cannot lose
        // updates; created_at is only written by the INSERT branch.
        let query = r"
            INSERT INTO users (sub, email, name, created_at, updated_at)
            VALUES ($1, $2, $3, NOW(), NOW())
            ON CONFLICT (sub) DO UPDATE
                SET email = EXCLUDED.email,
                    name = EXCLUDED.name,
                    updated_at = GREATEST(NOW(), users.updated_at)
            RETURNING sub, email, name, created_at, updated_at
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPSERT",
            db.statement = query
        );
        let upsert = sqlx::query(query)
            .bind(sub)
            .bind(claims.email())
            .bind(claims.name())
            .fetch_one(&self.pool)
            .instrument(span);
        let row = bounded_query::<_, DirectoryError, _>(self.timeout, upsert).await?;

        Ok(Some(user_from_row(&row)))
    }

    async fn find_by_subject(&self, sub: &str) -> Result<Option<User>, DirectoryError> {
        let query = "SELECT sub, email, name, created_at, updated_at FROM users WHERE sub = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let select = sqlx::query(query)
            .bind(sub)
            .fetch_optional(&self.pool)
            .instrument(span);
        let row = bounded_query::<_, DirectoryError, _>(self.timeout, select).await?;

        Ok(row.as_ref().map(user_from_row))
    }
}

/// In-process directory. The whole upsert runs under one lock, which gives the
/// same atomicity as the single SQL statement.
#[derive(Debug, Default)]
pub struct MemoryUserDirectory {
    users: Mutex<HashMap<String, User>>,
}

impl MemoryUserDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.users.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn upsert_from_claims(&self, claims: &Claims) -> Result<Option<User>, DirectoryError> {
        let Some(sub) = claims.sub() else {
            return Ok(None);
        };

        let now = Utc::now();
        let mut users = self.users.lock();
        let user = users.entry(sub.to_string()).or_insert_with(|| User {
            sub: sub.to_string(),
            name: None,
            email: None,
            created_at: now,
            updated_at: now,
        });
        user.email = claims.email().map(ToString::to_string);
        user.name = claims.name().map(ToString::to_string);
        user.updated_at = now.max(user.updated_at);

        Ok(Some(user.clone()))
    }

    async fn find_by_subject(&self, sub: &str) -> Result<Option<User>, DirectoryError> {
        Ok(self.users.lock().get(sub).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use std::sync::Arc;

    fn claims(value: Value) -> Claims {
        Claims::new(value.as_object().cloned().unwrap_or_default())
    }

    #[tokio::test]
    async fn missing_subject_is_a_noop() {
        let directory = MemoryUserDirectory::new();
        let result = directory
            .upsert_from_claims(&claims(json!({"sub": "", "email": "a@b.com"})))
            .await;

        assert!(matches!(result, Ok(None)));
        assert!(directory.is_empty());
    }

    #[tokio::test]
    async fn upsert_is_idempotent_and_refreshes_updated_at() {
        let directory = MemoryUserDirectory::new();
        let claims = claims(json!({"sub": "sub-1", "email": "a@b.com", "name": "Ada"}));

        let first = directory.upsert_from_claims(&claims).await.ok().flatten();
        let second = directory.upsert_from_claims(&claims).await.ok().flatten();

        let (Some(first), Some(second)) = (first, second) else {
            panic!("upsert returned no user");
        };
        assert_eq!(first.created_at, second.created_at);
        assert!(second.updated_at >= first.updated_at);
        assert_eq!(second.email.as_deref(), Some("a@b.com"));
        assert_eq!(directory.len(), 1);
    }

    #[tokio::test]
    async fn later_logins_update_mutable_fields() {
        let directory = MemoryUserDirectory::new();
        let _ = directory
            .upsert_from_claims(&claims(json!({"sub": "s", "email": "old@b.com"})))
            .await;
        let updated = directory
            .upsert_from_claims(&claims(json!({"sub": "s", "email": "new@b.com"})))
            .await
            .ok()
            .flatten();

        assert_eq!(
            updated.and_then(|user| user.email),
            Some("new@b.com".to_string())
        );
        let found = directory.find_by_subject("s").await.ok().flatten();
        assert_eq!(found.map(|user| user.sub), Some("s".to_string()));
    }

    #[tokio::test]
    async fn concurrent_upserts_keep_one_record() {
        let directory = Arc::new(MemoryUserDirectory::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let directory = Arc::clone(&directory);
            handles.push(tokio::spawn(async move {
                let claims = claims(json!({"sub": "same", "email": format!("u{i}@b.com")}));
                directory.upsert_from_claims(&claims).await.ok().flatten()
            }));
        }

        let mut created = Vec::new();
        for handle in handles {
            if let Ok(Some(user)) = handle.await {
                created.push(user.created_at);
            }
        }

        assert_eq!(directory.len(), 1);
        assert_eq!(created.len(), 16);
        assert!(created.windows(2).all(|pair| pair[0] == pair[1]));
    }

    #[tokio::test]
    async fn postgres_upsert_keeps_created_at() {
        let Ok(dsn) = std::env::var("TEXGATE_TEST_DSN") else {
            eprintln!("Skipping postgres test: TEXGATE_TEST_DSN not set");
            return;
        };
        let Ok(pool) = PgPool::connect(&dsn).await else {
            eprintln!("Skipping postgres test: cannot connect");
            return;
        };
        if let Err(err) = sqlx::raw_sql(crate::auth::SCHEMA_SQL).execute(&pool).await {
            panic!("failed to apply schema: {err}");
        }

        let directory = PgUserDirectory::new(pool);
        let sub = format!("it-{}", ulid::Ulid::new());
        let claims = claims(json!({"sub": sub, "email": "pg@b.com"}));

        let first = directory.upsert_from_claims(&claims).await.ok().flatten();
        let second = directory.upsert_from_claims(&claims).await.ok().flatten();
        let (Some(first), Some(second)) = (first, second) else {
            panic!("upsert returned no user");
        };
        assert_eq!(first.created_at, second.created_at);
        assert!(second.updated_at >= first.updated_at);
    }
}
