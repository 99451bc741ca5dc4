//! Identity introspection.
//!
//! Flow Overview:
//! 1) Refuse revoked tokens; a failed revocation lookup also refuses.
//! 2) Resolve claims from a self-issued access token, then the external
//!    verifier. Without a verifier a foreign token is treated as anonymous.
//! 3) Answer with the directory record when one exists, otherwise the claims.

use super::{state::AuthState, types::MeResponse, utils::extract_bearer_token};
use crate::auth::{Claims, VerifyError};
use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::{debug, error};

enum Identity {
    SelfIssued(Claims),
    External(Claims),
    Anonymous,
}

fn resolve_identity(state: &AuthState, token: &str) -> Result<Identity, VerifyError> {
    match state.access().decode(token) {
        Ok(access) => return Ok(Identity::SelfIssued(access.to_claims())),
        // Signature already checked: this is one of ours, just too old.
        Err(VerifyError::Expired) => return Err(VerifyError::Expired),
        Err(_) => {}
    }

    match state.verifier() {
        Some(verifier) => verifier.verify(token).map(Identity::External),
        None => Ok(Identity::Anonymous),
    }
}

#[utoipa::path(
    get,
    path = "/me",
    responses(
        (status = 200, description = "Directory record or identity claims for the bearer.", body = MeResponse),
        (status = 401, description = "Missing, invalid or revoked bearer token."),
    ),
    tag = "auth"
)]
pub async fn me(headers: HeaderMap, state: Extension<Arc<AuthState>>) -> impl IntoResponse {
    let Some(token) = extract_bearer_token(&headers) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    match state.revocation().is_blacklisted(&token).await {
        Ok(false) => {}
        Ok(true) => {
            debug!("Rejected revoked access token");
            return StatusCode::UNAUTHORIZED.into_response();
        }
        Err(err) => {
            error!("Revocation lookup failed, rejecting request: {err}");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    let identity = match resolve_identity(&state, &token) {
        Ok(identity) => identity,
        Err(err) => {
            debug!("Bearer token rejected: {err}");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };

    let (claims, user) = match (identity, state.directory()) {
        (Identity::Anonymous, _) => {
            return (StatusCode::OK, Json(MeResponse::Claims { claims: None })).into_response();
        }
        (Identity::External(claims), Some(directory)) => {
            let user = directory.upsert_from_claims(&claims).await;
            (claims, user)
        }
        (Identity::SelfIssued(claims), Some(directory)) => {
            let user = match claims.sub() {
                Some(sub) => directory.find_by_subject(sub).await,
                None => Ok(None),
            };
            (claims, user)
        }
        (Identity::External(claims) | Identity::SelfIssued(claims), None) => (claims, Ok(None)),
    };

    let response = match user {
        Ok(Some(user)) => MeResponse::User { user },
        Ok(None) => MeResponse::Claims {
            claims: Some(claims),
        },
        Err(err) => {
            error!("Failed to resolve user for /me: {err}");
            MeResponse::Claims {
                claims: Some(claims),
            }
        }
    };

    (StatusCode::OK, Json(response)).into_response()
}
