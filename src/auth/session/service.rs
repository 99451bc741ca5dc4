//! Session lifecycle orchestration.
//!
//! State machine for a refresh credential:
//! `ISSUED -> VALID -> (EXPIRED | REVOKED)`; both end states are terminal.
//! Expiry is enforced here by lazy delete-on-read, so backends without native
//! expiry stay correct.

use super::{Session, SessionError, SessionStore};
use crate::auth::tokens::{generate_refresh_token, valid_refresh_token};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error};

/// Detailed outcome of a refresh-token lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefreshState {
    Valid(Session),
    Expired,
    NotFound,
}

#[derive(Clone)]
pub struct SessionService {
    store: Arc<dyn SessionStore>,
}

impl std::fmt::Debug for SessionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionService")
            .field("backend", &self.store.backend())
            .finish()
    }
}

impl SessionService {
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    #[must_use]
    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    /// Issue a new refresh session for `sub` and return its raw token.
    ///
    /// # Errors
    /// `InvalidTtl` unless `ttl` is positive and the expiry is representable,
    /// `TokenGeneration` if the OS random source fails (not retried), or the
    /// store error.
    pub async fn create_session(
        &self,
        sub: &str,
        ttl: chrono::Duration,
    ) -> Result<String, SessionError> {
        if ttl <= chrono::Duration::zero() {
            return Err(SessionError::InvalidTtl(format!("{ttl} is not positive")));
        }
        let now = Utc::now();
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or_else(|| SessionError::InvalidTtl(format!("{ttl} overflows the clock")))?;

        let refresh_token = generate_refresh_token().map_err(|err| {
            error!("Random source failure while generating refresh token: {err}");
            SessionError::TokenGeneration(err.to_string())
        })?;

        let session = Session {
            refresh_token,
            sub: sub.to_string(),
            created_at: now,
            expires_at,
        };
        self.store.create(&session).await?;

        debug!(sub, backend = self.store.backend(), "Session issued");
        Ok(session.refresh_token)
    }

    /// Look up `refresh_token`, distinguishing expired from unknown tokens.
    /// Expired records are deleted as a side effect.
    ///
    /// # Errors
    /// Returns the store error.
    pub async fn inspect_refresh(&self, refresh_token: &str) -> Result<RefreshState, SessionError> {
        if !valid_refresh_token(refresh_token) {
            return Ok(RefreshState::NotFound);
        }

        let Some(session) = self.store.get_by_refresh(refresh_token).await? else {
            return Ok(RefreshState::NotFound);
        };

        if session.is_valid_at(Utc::now()) {
            Ok(RefreshState::Valid(session))
        } else {
            self.store.delete_by_refresh(refresh_token).await?;
            debug!(sub = %session.sub, "Expired session removed on read");
            Ok(RefreshState::Expired)
        }
    }

    /// Return the session for `refresh_token` if it is still valid. Unknown and
    /// expired tokens are both `Ok(None)`.
    ///
    /// # Errors
    /// Returns the store error.
    pub async fn validate_refresh(
        &self,
        refresh_token: &str,
    ) -> Result<Option<Session>, SessionError> {
        match self.inspect_refresh(refresh_token).await? {
            RefreshState::Valid(session) => Ok(Some(session)),
            RefreshState::Expired | RefreshState::NotFound => Ok(None),
        }
    }

    /// Idempotent: deleting an unknown token is not an error.
    ///
    /// # Errors
    /// Returns the store error.
    pub async fn delete_refresh(&self, refresh_token: &str) -> Result<(), SessionError> {
        self.store.delete_by_refresh(refresh_token).await
    }
}
