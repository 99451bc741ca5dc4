//! HTTP client for the session endpoints.
//!
//! Holds the token pair returned by login and keeps the access token fresh
//! with a [`RefreshTimer`]. Manual refresh and logout cancel the pending timer
//! before doing anything else.

mod timer;

pub use timer::{DEFAULT_REFRESH_MARGIN, MIN_REFRESH_DELAY, RefreshTimer, refresh_delay};

use crate::{
    APP_USER_AGENT,
    api::{LoginRequest, RefreshRequest, RefreshResponse, TokenResponse},
};
use anyhow::{Context, Result, anyhow};
use parking_lot::RwLock;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use std::{
    sync::{Arc, Weak},
    time::Duration,
};
use tracing::{debug, warn};
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

struct TokenPair {
    access_token: SecretString,
    refresh_token: SecretString,
}

struct Inner {
    http: Client,
    base_url: Url,
    tokens: RwLock<Option<TokenPair>>,
    timer: RefreshTimer,
}

#[derive(Clone)]
pub struct SessionClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClient")
            .field("base_url", &self.inner.base_url.as_str())
            .field("logged_in", &self.inner.tokens.read().is_some())
            .finish_non_exhaustive()
    }
}

impl SessionClient {
    /// # Errors
    /// Returns an error if `base_url` is not a valid URL or the HTTP client
    /// cannot be built.
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_margin(base_url, DEFAULT_REFRESH_MARGIN)
    }

    /// Like [`SessionClient::new`] with a custom refresh margin.
    ///
    /// # Errors
    /// Returns an error if `base_url` is not a valid URL or the HTTP client
    /// cannot be built.
    pub fn with_margin(base_url: &str, margin: Duration) -> Result<Self> {
        let base_url =
            Url::parse(base_url).with_context(|| format!("Invalid base URL: {base_url}"))?;
        let http = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                base_url,
                tokens: RwLock::new(None),
                timer: RefreshTimer::new(margin),
            }),
        })
    }

    /// Exchange an identity token for a session and start auto-refresh.
    ///
    /// # Errors
    /// Returns an error if the request fails or the server rejects the token.
    pub async fn login(&self, id_token: &str) -> Result<()> {
        let url = self.inner.endpoint("auth/login")?;
        let response: TokenResponse = self
            .inner
            .http
            .post(url)
            .json(&LoginRequest {
                id_token: id_token.to_string(),
            })
            .send()
            .await
            .context("Login request failed")?
            .error_for_status()
            .context("Login rejected")?
            .json()
            .await
            .context("Invalid login response")?;

        *self.inner.tokens.write() = Some(TokenPair {
            access_token: SecretString::from(response.access_token),
            refresh_token: SecretString::from(response.refresh_token),
        });
        self.inner.schedule_refresh(response.expires_in);
        Ok(())
    }

    /// Refresh the access token now, replacing any scheduled refresh.
    ///
    /// # Errors
    /// Returns an error if there is no session or the server rejects it.
    pub async fn refresh(&self) -> Result<()> {
        self.inner.timer.cancel();
        self.inner.refresh().await
    }

    /// End the session: cancel auto-refresh, delete the server session and
    /// revoke the current access token.
    ///
    /// # Errors
    /// Returns an error if the request fails; local state is cleared anyway.
    pub async fn logout(&self) -> Result<()> {
        self.inner.timer.cancel();
        let tokens = self.inner.tokens.write().take();
        let Some(tokens) = tokens else {
            return Ok(());
        };

        let url = self.inner.endpoint("auth/logout")?;
        self.inner
            .http
            .post(url)
            .bearer_auth(tokens.access_token.expose_secret())
            .json(&RefreshRequest {
                refresh_token: tokens.refresh_token.expose_secret().to_string(),
            })
            .send()
            .await
            .context("Logout request failed")?
            .error_for_status()
            .context("Logout rejected")?;
        Ok(())
    }

    /// Current access token, if logged in.
    #[must_use]
    pub fn access_token(&self) -> Option<String> {
        self.inner
            .tokens
            .read()
            .as_ref()
            .map(|tokens| tokens.access_token.expose_secret().to_string())
    }

    #[must_use]
    pub fn refresh_scheduled(&self) -> bool {
        self.inner.timer.is_scheduled()
    }
}

impl Inner {
    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("Invalid endpoint path: {path}"))
    }

    async fn refresh(self: &Arc<Self>) -> Result<()> {
        let refresh_token = self
            .tokens
            .read()
            .as_ref()
            .map(|tokens| tokens.refresh_token.expose_secret().to_string())
            .ok_or_else(|| anyhow!("No active session"))?;

        let url = self.endpoint("auth/refresh")?;
        let response: RefreshResponse = self
            .http
            .post(url)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await
            .context("Refresh request failed")?
            .error_for_status()
            .context("Refresh rejected")?
            .json()
            .await
            .context("Invalid refresh response")?;

        {
            // Logout may have run while the request was in flight.
            let mut guard = self.tokens.write();
            let Some(tokens) = guard.as_mut() else {
                return Err(anyhow!("Session ended during refresh"));
            };
            tokens.access_token = SecretString::from(response.access_token);
        }

        self.schedule_refresh(response.expires_in);
        debug!("Access token refreshed");
        Ok(())
    }

    fn schedule_refresh(self: &Arc<Self>, expires_in: i64) {
        let inner: Weak<Self> = Arc::downgrade(self);
        let expires_in = Duration::from_secs(u64::try_from(expires_in).unwrap_or(0));
        self.timer.schedule(expires_in, move || async move {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            if let Err(err) = inner.refresh().await {
                warn!("Automatic token refresh failed: {err:#}");
            }
        });
    }
}
