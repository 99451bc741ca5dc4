//! Session endpoints: login with an identity token, refresh, logout.

use super::{
    state::AuthState,
    types::{LoginRequest, RefreshRequest, RefreshResponse, TOKEN_TYPE_BEARER, TokenResponse},
    utils::extract_bearer_token,
};
use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info};

#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session created", body = TokenResponse),
        (status = 401, description = "Identity token rejected"),
        (status = 500, description = "Session could not be created")
    ),
    tag = "auth"
)]
pub async fn login(
    state: Extension<Arc<AuthState>>,
    Json(request): Json<LoginRequest>,
) -> impl IntoResponse {
    let (Some(verifier), Some(sessions)) = (state.verifier(), state.sessions()) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let claims = match verifier.verify(&request.id_token) {
        Ok(claims) => claims,
        Err(err) => {
            debug!("Identity token rejected: {err}");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };

    let Some(sub) = claims.sub() else {
        debug!("Identity token has no subject");
        return StatusCode::UNAUTHORIZED.into_response();
    };

    if let Some(directory) = state.directory()
        && let Err(err) = directory.upsert_from_claims(&claims).await
    {
        error!("Failed to upsert user: {err}");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    let refresh_token = match sessions.create_session(sub, state.refresh_ttl()).await {
        Ok(token) => token,
        Err(err) => {
            error!("Failed to create session: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let issued = match state.access().issue(sub, claims.email(), claims.name()) {
        Ok(issued) => issued,
        Err(err) => {
            error!("Failed to issue access token: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    info!(sub, backend = sessions.backend(), "Login succeeded");

    let response = TokenResponse {
        access_token: issued.token,
        refresh_token,
        token_type: TOKEN_TYPE_BEARER.to_string(),
        expires_in: issued.expires_in,
    };
    (StatusCode::OK, Json(response)).into_response()
}

#[utoipa::path(
    post,
    path = "/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "New access token issued", body = RefreshResponse),
        (status = 401, description = "Refresh token unknown or expired"),
        (status = 500, description = "Session store failure")
    ),
    tag = "auth"
)]
pub async fn refresh(
    state: Extension<Arc<AuthState>>,
    Json(request): Json<RefreshRequest>,
) -> impl IntoResponse {
    let Some(sessions) = state.sessions() else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let session = match sessions.validate_refresh(&request.refresh_token).await {
        Ok(Some(session)) => session,
        Ok(None) => return StatusCode::UNAUTHORIZED.into_response(),
        Err(err) => {
            error!("Failed to validate refresh token: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    // Profile fields are best-effort; the subject alone is enough for a token.
    let user = match state.directory() {
        Some(directory) => directory
            .find_by_subject(&session.sub)
            .await
            .unwrap_or_else(|err| {
                error!("Failed to load user for refresh: {err}");
                None
            }),
        None => None,
    };

    let issued = match state.access().issue(
        &session.sub,
        user.as_ref().and_then(|user| user.email.as_deref()),
        user.as_ref().and_then(|user| user.name.as_deref()),
    ) {
        Ok(issued) => issued,
        Err(err) => {
            error!("Failed to issue access token: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let response = RefreshResponse {
        access_token: issued.token,
        token_type: TOKEN_TYPE_BEARER.to_string(),
        expires_in: issued.expires_in,
    };
    (StatusCode::OK, Json(response)).into_response()
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    request_body = RefreshRequest,
    responses(
        (status = 204, description = "Session removed and bearer revoked")
    ),
    tag = "auth"
)]
pub async fn logout(
    headers: HeaderMap,
    state: Extension<Arc<AuthState>>,
    Json(request): Json<RefreshRequest>,
) -> impl IntoResponse {
    if let Some(sessions) = state.sessions()
        && let Err(err) = sessions.delete_refresh(&request.refresh_token).await
    {
        error!("Failed to delete session: {err}");
    }

    if let Some(token) = extract_bearer_token(&headers)
        && let Ok(claims) = state.access().decode(&token)
    {
        let ttl = claims.remaining_lifetime(Utc::now());
        if let Err(err) = state.revocation().blacklist(&token, ttl).await {
            error!("Failed to revoke access token: {err}");
        }
    }

    StatusCode::NO_CONTENT.into_response()
}
