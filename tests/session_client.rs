//! `SessionClient` against a live listener on an ephemeral port.

use anyhow::{Context, Result};
use base64ct::{Base64UrlUnpadded, Encoding};
use secrecy::SecretString;
use serde_json::json;
use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use texgate::{
    api::{self, AuthState},
    auth::{
        AccessTokens, InsecureVerifier, RevocationList, SessionService, VolatileSessionStore,
    },
    client::SessionClient,
    store::{ExpiringStore, MemoryStore},
};
use tokio::{net::TcpListener, task::JoinHandle};

struct ServerGuard(JoinHandle<()>);

impl Drop for ServerGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

struct TestServer {
    base_url: String,
    refreshes: Arc<AtomicUsize>,
    _guard: ServerGuard,
}

async fn spawn_server(access_ttl: chrono::Duration) -> Result<TestServer> {
    let store: Arc<dyn ExpiringStore> = Arc::new(MemoryStore::new());
    let state = AuthState::new(AccessTokens::new(
        &SecretString::from("client-test-secret".to_string()),
        access_ttl,
    ))
    .with_verifier(Some(Arc::new(InsecureVerifier::enable())))
    .with_sessions(Some(SessionService::new(Arc::new(
        VolatileSessionStore::new(Arc::clone(&store)),
    ))))
    .with_revocation(RevocationList::new(Some(store)));

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .context("failed to bind test listener")?;
    let addr = listener.local_addr()?;
    let refreshes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&refreshes);
    let app = api::app(Arc::new(state)).layer(axum::middleware::from_fn(
        move |request: axum::extract::Request, next: axum::middleware::Next| {
            let counter = Arc::clone(&counter);
            async move {
                if request.uri().path() == "/auth/refresh" {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
                next.run(request).await
            }
        },
    ));

    let handle = tokio::spawn(async move {
        let _ = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await;
    });

    Ok(TestServer {
        base_url: format!("http://{addr}/"),
        refreshes,
        _guard: ServerGuard(handle),
    })
}

fn id_token(sub: &str) -> String {
    format!(
        "{}.{}.unsigned",
        Base64UrlUnpadded::encode_string(br#"{"alg":"none"}"#),
        Base64UrlUnpadded::encode_string(json!({ "sub": sub }).to_string().as_bytes())
    )
}

#[tokio::test]
async fn login_schedules_refresh_and_logout_cancels_it() -> Result<()> {
    let server = spawn_server(chrono::Duration::minutes(15)).await?;
    let client = SessionClient::new(&server.base_url)?;

    assert!(client.access_token().is_none());
    client.login(&id_token("sub-1")).await?;
    assert!(client.access_token().is_some());
    assert!(client.refresh_scheduled());

    client.refresh().await?;
    assert!(client.refresh_scheduled());

    client.logout().await?;
    assert!(client.access_token().is_none());
    assert!(!client.refresh_scheduled());

    // Nothing left to refresh.
    assert!(client.refresh().await.is_err());
    Ok(())
}

#[tokio::test]
async fn short_lived_tokens_are_refreshed_automatically() -> Result<()> {
    let server = spawn_server(chrono::Duration::seconds(2)).await?;
    let client = SessionClient::with_margin(&server.base_url, Duration::from_millis(1500))?;

    client.login(&id_token("sub-2")).await?;
    let first = client.access_token();

    // Refresh fires ~500ms after login.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let second = client.access_token();
    assert!(second.is_some());
    assert_ne!(first, second);
    assert!(client.refresh_scheduled());
    assert!(server.refreshes.load(Ordering::SeqCst) >= 1);

    client.logout().await?;
    Ok(())
}

#[tokio::test]
async fn lifetime_shorter_than_margin_is_refreshed_at_a_bounded_pace() -> Result<()> {
    // Default 30s margin against a 2s token: every refresh lands inside the
    // margin, so the floor alone paces the loop.
    let server = spawn_server(chrono::Duration::seconds(2)).await?;
    let client = SessionClient::new(&server.base_url)?;

    client.login(&id_token("sub-3")).await?;
    let first = client.access_token();

    tokio::time::sleep(Duration::from_millis(2500)).await;
    let refreshes = server.refreshes.load(Ordering::SeqCst);
    assert!((1..=3).contains(&refreshes), "{refreshes} refreshes in 2.5s");
    assert_ne!(first, client.access_token());

    client.logout().await?;
    Ok(())
}

#[tokio::test]
async fn rejected_login_keeps_client_logged_out() -> Result<()> {
    let server = spawn_server(chrono::Duration::minutes(15)).await?;
    let client = SessionClient::new(&server.base_url)?;

    assert!(client.login("not-a-token").await.is_err());
    assert!(client.access_token().is_none());
    assert!(!client.refresh_scheduled());
    Ok(())
}
