//! Failure taxonomy shared by the auth components.

use crate::store::StoreError;

/// Per-request credential failures. Always surfaced as unauthorized and never
/// retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error("invalid token")]
    InvalidToken,
    #[error("token signature is invalid")]
    SignatureInvalid,
    #[error("token issuer does not match")]
    IssuerMismatch,
    #[error("token has expired")]
    Expired,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The OS random source failed; fatal for the request.
    #[error("failed to generate refresh token: {0}")]
    TokenGeneration(String),
    /// Non-positive or unrepresentable session lifetime.
    #[error("invalid session ttl: {0}")]
    InvalidTtl(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum IssueError {
    #[error("access token lifetime overflows the clock")]
    TtlOverflow,
    #[error("failed to sign access token: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Startup-time degradations. Logged once, never fatal.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("{0} is not configured")]
    ConfigurationMissing(&'static str),
    #[error("{backend} is unavailable: {reason}")]
    BackendUnavailable {
        backend: &'static str,
        reason: String,
    },
}
