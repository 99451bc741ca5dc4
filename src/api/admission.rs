//! Request admission middleware: identity peek, then the rate limiter.

use super::handlers::{
    state::AuthState,
    utils::{extract_bearer_token, resolve_client_ip},
};
use crate::auth::rate_limit::RateLimitError;
use axum::{
    body::Body,
    extract::{ConnectInfo, Extension},
    http::{HeaderValue, Request, StatusCode, header::RETRY_AFTER},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{net::SocketAddr, sync::Arc};
use tracing::{debug, error};

/// Bucket key for a request: the subject of a valid self-issued access token,
/// else the client address. Only the local HMAC check runs here; no store or
/// external verifier is consulted before admission.
///
/// The address is the connected peer; forwarding headers count only when that
/// peer is a configured trusted proxy.
pub(crate) fn identity_key(state: &AuthState, request: &Request<Body>) -> String {
    if let Some(token) = extract_bearer_token(request.headers())
        && let Ok(claims) = state.access().decode(&token)
    {
        return format!("sub:{}", claims.sub);
    }

    match request.extensions().get::<ConnectInfo<SocketAddr>>() {
        Some(ConnectInfo(peer)) => format!(
            "ip:{}",
            resolve_client_ip(request.headers(), peer.ip(), state.trusted_proxies())
        ),
        None => "ip:unknown".to_string(),
    }
}

pub(crate) async fn admit(
    state: Extension<Arc<AuthState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let key = identity_key(&state, &request);

    match state.rate_limiter().check(&key).await {
        Ok(()) => next.run(request).await,
        Err(RateLimitError::Limited { retry_after }) => {
            debug!(key = %key, "Request rate limited");
            // Whole seconds, rounded up.
            let seconds = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            let mut response = StatusCode::TOO_MANY_REQUESTS.into_response();
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(seconds.max(1)));
            response
        }
        Err(RateLimitError::Store(err)) => {
            error!("Rate limiter unavailable, rejecting request: {err}");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AccessTokens;
    use axum::http::header::AUTHORIZATION;
    use secrecy::SecretString;

    fn state() -> AuthState {
        AuthState::new(AccessTokens::new(
            &SecretString::from("admission-test-secret".to_string()),
            chrono::Duration::minutes(5),
        ))
    }

    #[test]
    fn valid_access_token_keys_by_subject() {
        let state = state();
        let Ok(issued) = state.access().issue("sub-1", None, None) else {
            panic!("failed to issue token");
        };
        let request = Request::builder()
            .header(AUTHORIZATION, format!("Bearer {}", issued.token))
            .header("x-forwarded-for", "198.51.100.4")
            .body(Body::empty());
        let Ok(request) = request else {
            panic!("failed to build request");
        };
        assert_eq!(identity_key(&state, &request), "sub:sub-1");
    }

    fn request_from(peer: [u8; 4], forwarded: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().header(AUTHORIZATION, "Bearer not-ours");
        if let Some(forwarded) = forwarded {
            builder = builder.header("x-forwarded-for", forwarded);
        }
        let Ok(mut request) = builder.body(Body::empty()) else {
            panic!("failed to build request");
        };
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from((peer, 4000))));
        request
    }

    #[test]
    fn foreign_token_keys_by_peer_address() {
        let state = state();
        let request = request_from([192, 0, 2, 9], Some("198.51.100.4"));
        assert_eq!(identity_key(&state, &request), "ip:192.0.2.9");

        let Ok(request) = Request::builder().body(Body::empty()) else {
            panic!("failed to build request");
        };
        assert_eq!(identity_key(&state, &request), "ip:unknown");
    }

    #[test]
    fn forwarded_address_needs_trusted_peer() {
        let state = state().with_trusted_proxies(vec![[10, 0, 0, 1].into()]);

        let request = request_from([10, 0, 0, 1], Some("6.6.6.6, 198.51.100.4"));
        assert_eq!(identity_key(&state, &request), "ip:198.51.100.4");

        let request = request_from([192, 0, 2, 9], Some("198.51.100.4"));
        assert_eq!(identity_key(&state, &request), "ip:192.0.2.9");
    }

    #[tokio::test]
    async fn rotating_forwarded_header_shares_one_bucket() {
        use crate::auth::rate_limit::{LocalRateLimiter, RateLimitConfig};

        let state = state().with_rate_limiter(Arc::new(LocalRateLimiter::new(
            RateLimitConfig::new(1, 2),
        )));
        let mut outcomes = Vec::new();
        for i in 0..4 {
            let forwarded = format!("198.51.100.{i}");
            let key = identity_key(&state, &request_from([192, 0, 2, 9], Some(&forwarded)));
            outcomes.push(state.rate_limiter().check(&key).await.is_ok());
        }
        assert_eq!(outcomes, vec![true, true, false, false]);
    }
}
