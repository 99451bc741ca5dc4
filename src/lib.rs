//! # Texgate (authentication and session control plane)
//!
//! `texgate` turns an externally verified identity token into a durable,
//! revocable session, gates request admission per identity, and decides at
//! startup which backend holds session and user state.
//!
//! ## Backend selection
//!
//! Exactly one session backend is active per process, chosen once at startup:
//!
//! 1. Redis, when `--redis-url` is set and answers `PING`.
//! 2. PostgreSQL, when `--dsn` is set and the schema bootstrap succeeds.
//! 3. Otherwise no persistence; session routes are not registered.
//!
//! ## Revocation
//!
//! Revoked access tokens are kept in Redis with a TTL equal to their remaining
//! lifetime. Without Redis revocation is best-effort: lookups report "not
//! revoked" rather than refusing every request.
//!
//! ## Rate limiting
//!
//! Admission runs before any store is consulted. Buckets are keyed by the
//! verified subject when the request carries a self-issued access token, else by
//! client address. `local` mode keeps token buckets in-process; `distributed`
//! mode uses a fixed-window counter in Redis.

pub mod api;
pub mod auth;
pub mod cli;
pub mod client;
pub mod store;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
