//! Per-process auth components shared by every handler.

use crate::auth::{
    AccessTokens, RevocationList, SessionService, UserDirectory, Verifier,
    rate_limit::{NoopRateLimiter, RateLimiter},
    session::DEFAULT_SESSION_TTL,
};
use std::{net::IpAddr, sync::Arc};

/// Components are optional where startup may legitimately leave them out; the
/// router only registers routes whose components are present.
pub struct AuthState {
    access: AccessTokens,
    verifier: Option<Arc<dyn Verifier>>,
    sessions: Option<SessionService>,
    directory: Option<Arc<dyn UserDirectory>>,
    revocation: RevocationList,
    rate_limiter: Arc<dyn RateLimiter>,
    refresh_ttl: chrono::Duration,
    trusted_proxies: Vec<IpAddr>,
}

impl std::fmt::Debug for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthState")
            .field("verifier", &self.verifier_kind())
            .field("sessions", &self.session_backend())
            .field("directory", &self.directory.is_some())
            .field("revocation", &self.revocation)
            .field("rate_limit", &self.rate_limiter.mode())
            .field("refresh_ttl", &self.refresh_ttl)
            .field("trusted_proxies", &self.trusted_proxies)
            .finish_non_exhaustive()
    }
}

impl AuthState {
    #[must_use]
    pub fn new(access: AccessTokens) -> Self {
        Self {
            access,
            verifier: None,
            sessions: None,
            directory: None,
            revocation: RevocationList::disabled(),
            rate_limiter: Arc::new(NoopRateLimiter),
            refresh_ttl: DEFAULT_SESSION_TTL,
            trusted_proxies: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_verifier(mut self, verifier: Option<Arc<dyn Verifier>>) -> Self {
        self.verifier = verifier;
        self
    }

    #[must_use]
    pub fn with_sessions(mut self, sessions: Option<SessionService>) -> Self {
        self.sessions = sessions;
        self
    }

    #[must_use]
    pub fn with_directory(mut self, directory: Option<Arc<dyn UserDirectory>>) -> Self {
        self.directory = directory;
        self
    }

    #[must_use]
    pub fn with_revocation(mut self, revocation: RevocationList) -> Self {
        self.revocation = revocation;
        self
    }

    #[must_use]
    pub fn with_rate_limiter(mut self, rate_limiter: Arc<dyn RateLimiter>) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    #[must_use]
    pub fn with_refresh_ttl(mut self, refresh_ttl: chrono::Duration) -> Self {
        self.refresh_ttl = refresh_ttl;
        self
    }

    /// Peers whose forwarding headers are believed when keying the limiter.
    #[must_use]
    pub fn with_trusted_proxies(mut self, trusted_proxies: Vec<IpAddr>) -> Self {
        self.trusted_proxies = trusted_proxies;
        self
    }

    #[must_use]
    pub fn access(&self) -> &AccessTokens {
        &self.access
    }

    #[must_use]
    pub fn verifier(&self) -> Option<&Arc<dyn Verifier>> {
        self.verifier.as_ref()
    }

    #[must_use]
    pub fn sessions(&self) -> Option<&SessionService> {
        self.sessions.as_ref()
    }

    #[must_use]
    pub fn directory(&self) -> Option<&Arc<dyn UserDirectory>> {
        self.directory.as_ref()
    }

    #[must_use]
    pub fn revocation(&self) -> &RevocationList {
        &self.revocation
    }

    #[must_use]
    pub fn rate_limiter(&self) -> &Arc<dyn RateLimiter> {
        &self.rate_limiter
    }

    #[must_use]
    pub fn refresh_ttl(&self) -> chrono::Duration {
        self.refresh_ttl
    }

    #[must_use]
    pub fn trusted_proxies(&self) -> &[IpAddr] {
        &self.trusted_proxies
    }

    #[must_use]
    pub fn verifier_kind(&self) -> &'static str {
        self.verifier.as_ref().map_or("none", |verifier| verifier.kind())
    }

    #[must_use]
    pub fn session_backend(&self) -> &'static str {
        self.sessions
            .as_ref()
            .map_or("none", SessionService::backend)
    }

    /// `/auth/login` needs both a verifier and a session store.
    #[must_use]
    pub fn serves_login(&self) -> bool {
        self.verifier.is_some() && self.sessions.is_some()
    }

    /// `/auth/refresh` and `/auth/logout` need a session store.
    #[must_use]
    pub fn serves_sessions(&self) -> bool {
        self.sessions.is_some()
    }
}
