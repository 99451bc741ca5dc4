//! Refresh sessions: record type, store contract and the two backends.
//!
//! Exactly one [`SessionStore`] is active per process, selected at startup:
//! [`VolatileSessionStore`] (Redis) first, then [`DurableSessionStore`]
//! (PostgreSQL). Both key records by the SHA-256 of the refresh token so the
//! raw credential never reaches a store.

mod durable;
mod service;
mod volatile;

pub use durable::DurableSessionStore;
pub use service::{RefreshState, SessionService};
pub use volatile::VolatileSessionStore;

use super::error::SessionError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fallback lifetime for sessions persisted without an explicit expiry.
pub const DEFAULT_SESSION_TTL: chrono::Duration = chrono::Duration::days(7);

/// One active refresh credential.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Raw refresh token; never serialized into a store payload.
    #[serde(skip)]
    pub refresh_token: String,
    pub sub: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Valid iff `now < expires_at`.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// # Errors
    /// Returns the backend error.
    async fn create(&self, session: &Session) -> Result<(), SessionError>;

    /// Look up a session by its raw refresh token. Missing is `Ok(None)`.
    ///
    /// # Errors
    /// Returns the backend error.
    async fn get_by_refresh(&self, refresh_token: &str) -> Result<Option<Session>, SessionError>;

    /// Idempotent delete.
    ///
    /// # Errors
    /// Returns the backend error.
    async fn delete_by_refresh(&self, refresh_token: &str) -> Result<(), SessionError>;

    /// Backend label for logs and health output.
    fn backend(&self) -> &'static str;
}
