//! Authentication and session lifecycle.
//!
//! Flow Overview:
//! 1) The rate limiter admits or rejects the request by identity key.
//! 2) Revoked access tokens are refused before any verification.
//! 3) A verifier turns a bearer credential into claims; the user directory
//!    upserts the subject.
//! 4) The session service issues, validates and tears down refresh sessions in
//!    the single session backend chosen at startup.

pub mod access;
pub mod claims;
pub mod directory;
pub mod error;
pub mod rate_limit;
pub mod revocation;
pub mod session;
pub mod verifier;

pub(crate) mod tokens;

pub use access::{AccessClaims, AccessTokens, IssuedToken};
pub use claims::Claims;
pub use directory::{MemoryUserDirectory, PgUserDirectory, User, UserDirectory};
pub use error::{DirectoryError, IssueError, SessionError, StartupError, VerifyError};
pub use revocation::RevocationList;
pub use session::{
    DurableSessionStore, RefreshState, Session, SessionService, SessionStore,
    VolatileSessionStore,
};
pub use verifier::{InsecureVerifier, OidcVerifier, Verifier};

/// Idempotent schema bootstrap for the `users` and `sessions` tables.
pub const SCHEMA_SQL: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/sql/schema.sql"));
