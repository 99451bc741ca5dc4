//! Access-token revocation list.
//!
//! Markers live in the volatile store under `revoked:{sha256(token)}` with a TTL
//! equal to the token's remaining lifetime, so they vanish on their own once the
//! token could no longer be used anyway. Without a store every operation is a
//! no-op.

use super::tokens::hash_token_hex;
use crate::store::{ExpiringStore, StoreError};
use std::{sync::Arc, time::Duration};
use tracing::debug;

const KEY_PREFIX: &str = "revoked:";

#[derive(Clone, Default)]
pub struct RevocationList {
    store: Option<Arc<dyn ExpiringStore>>,
}

impl std::fmt::Debug for RevocationList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevocationList")
            .field("store", &self.store.as_ref().map(|store| store.kind()))
            .finish()
    }
}

impl RevocationList {
    #[must_use]
    pub fn new(store: Option<Arc<dyn ExpiringStore>>) -> Self {
        Self { store }
    }

    /// A list without a backing store.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    fn key(token: &str) -> String {
        format!("{KEY_PREFIX}{}", hash_token_hex(token))
    }

    /// Mark `token` revoked for `ttl`. A zero TTL writes nothing: the token is
    /// already dead.
    ///
    /// # Errors
    /// Returns the store error.
    pub async fn blacklist(&self, token: &str, ttl: Duration) -> Result<(), StoreError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        if ttl.is_zero() {
            debug!("Skipping revocation of an already expired token");
            return Ok(());
        }
        store.put(&Self::key(token), "1", ttl).await
    }

    /// # Errors
    /// Returns the store error; callers must fail closed on it.
    pub async fn is_blacklisted(&self, token: &str) -> Result<bool, StoreError> {
        match &self.store {
            Some(store) => store.exists(&Self::key(token)).await,
            None => Ok(false),
        }
    }
}
