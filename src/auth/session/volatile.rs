use super::{Session, SessionError, SessionStore};
use crate::{
    auth::tokens::hash_token_hex,
    store::{ExpiringStore, StoreError},
};
use async_trait::async_trait;
use chrono::Utc;
use std::{sync::Arc, time::Duration};
use tracing::debug;

const KEY_PREFIX: &str = "session:";

/// Smallest expiry the store accepts; used when a session is already past its
/// expiry at write time.
const MIN_EXPIRY: Duration = Duration::from_millis(1);

/// Session store on top of a volatile key-value store with native expiry.
pub struct VolatileSessionStore {
    store: Arc<dyn ExpiringStore>,
}

impl std::fmt::Debug for VolatileSessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolatileSessionStore")
            .field("store", &self.store.kind())
            .finish()
    }
}

impl VolatileSessionStore {
    #[must_use]
    pub fn new(store: Arc<dyn ExpiringStore>) -> Self {
        Self { store }
    }

    fn key(refresh_token: &str) -> String {
        format!("{KEY_PREFIX}{}", hash_token_hex(refresh_token))
    }
}

/// Store-managed expiry for `session`, clamped to [`MIN_EXPIRY`].
fn store_ttl(session: &Session) -> Duration {
    (session.expires_at - Utc::now())
        .to_std()
        .ok()
        .filter(|ttl| !ttl.is_zero())
        .unwrap_or(MIN_EXPIRY)
}

#[async_trait]
impl SessionStore for VolatileSessionStore {
    async fn create(&self, session: &Session) -> Result<(), SessionError> {
        let payload =
            serde_json::to_string(session).map_err(|err| StoreError::Codec(err.to_string()))?;
        self.store
            .put(
                &Self::key(&session.refresh_token),
                &payload,
                store_ttl(session),
            )
            .await?;
        Ok(())
    }

    async fn get_by_refresh(&self, refresh_token: &str) -> Result<Option<Session>, SessionError> {
        let key = Self::key(refresh_token);
        let Some(payload) = self.store.get(&key).await? else {
            return Ok(None);
        };

        let mut session: Session =
            serde_json::from_str(&payload).map_err(|err| StoreError::Codec(err.to_string()))?;

        // The store's clock may lag ours; trust the payload's own expiry.
        if !session.is_valid_at(Utc::now()) {
            debug!("Dropping stale session payload past its expiry");
            self.store.delete(&key).await?;
            return Ok(None);
        }

        session.refresh_token = refresh_token.to_string();
        Ok(Some(session))
    }

    async fn delete_by_refresh(&self, refresh_token: &str) -> Result<(), SessionError> {
        self.store.delete(&Self::key(refresh_token)).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "volatile"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::Duration as ChronoDuration;

    fn session(token: &str, ttl: ChronoDuration) -> Session {
        let now = Utc::now();
        Session {
            refresh_token: token.to_string(),
            sub: "sub-1".to_string(),
            created_at: now,
            expires_at: now + ttl,
        }
    }

    #[test]
    fn past_expiry_is_clamped() {
        assert_eq!(
            store_ttl(&session("t", ChronoDuration::seconds(-10))),
            MIN_EXPIRY
        );
        assert!(store_ttl(&session("t", ChronoDuration::hours(1))) > Duration::from_secs(3500));
    }

    #[tokio::test]
    async fn writes_already_expired_session_without_error() {
        let memory = Arc::new(MemoryStore::new());
        let store = VolatileSessionStore::new(memory.clone());

        let result = store
            .create(&session("expired", ChronoDuration::seconds(-5)))
            .await;
        assert!(result.is_ok());

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(matches!(store.get_by_refresh("expired").await, Ok(None)));
    }

    #[tokio::test]
    async fn roundtrip_restores_token_and_hides_it_from_store() {
        let memory = Arc::new(MemoryStore::new());
        let store = VolatileSessionStore::new(memory.clone());

        assert!(store.create(&session("raw-token", ChronoDuration::hours(1))).await.is_ok());

        let raw = memory.get("session:raw-token").await.ok().flatten();
        assert!(raw.is_none());
        let payload = memory
            .get(&VolatileSessionStore::key("raw-token"))
            .await
            .ok()
            .flatten()
            .unwrap_or_default();
        assert!(!payload.contains("raw-token"));

        let found = store.get_by_refresh("raw-token").await.ok().flatten();
        assert_eq!(
            found.map(|s| (s.refresh_token, s.sub)),
            Some(("raw-token".to_string(), "sub-1".to_string()))
        );
    }

    #[tokio::test]
    async fn stale_payload_is_deleted_on_read() {
        let memory = Arc::new(MemoryStore::new());
        let store = VolatileSessionStore::new(memory.clone());

        // Simulate a store whose clock lags: the key is still live but the
        // payload says the session already expired.
        let stale = session("skewed", ChronoDuration::seconds(-1));
        let payload = serde_json::to_string(&stale).unwrap_or_default();
        let key = VolatileSessionStore::key("skewed");
        assert!(memory.put(&key, &payload, Duration::from_secs(60)).await.is_ok());

        assert!(matches!(store.get_by_refresh("skewed").await, Ok(None)));
        assert!(matches!(memory.get(&key).await, Ok(None)));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = VolatileSessionStore::new(Arc::new(MemoryStore::new()));
        assert!(store.delete_by_refresh("missing").await.is_ok());
        assert!(store.delete_by_refresh("missing").await.is_ok());
    }
}
