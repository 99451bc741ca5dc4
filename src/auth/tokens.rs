//! Opaque token generation and hashing.

use rand::{RngCore, rngs::OsRng};
use regex::Regex;
use sha2::{Digest, Sha256};

const REFRESH_TOKEN_BYTES: usize = 32;

/// Create a new refresh token: 32 bytes from the OS random source, hex-encoded.
///
/// # Errors
/// Returns the random source error; callers treat it as fatal and do not retry.
pub(crate) fn generate_refresh_token() -> Result<String, rand::Error> {
    let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
    OsRng.try_fill_bytes(&mut bytes)?;
    Ok(hex::encode(bytes))
}

/// Hash a token so raw values never reach a store.
pub(crate) fn hash_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

/// Hex form of [`hash_token`], used for key-value store keys.
pub(crate) fn hash_token_hex(token: &str) -> String {
    hex::encode(hash_token(token))
}

/// Refresh tokens are 64 lowercase or uppercase hex characters.
pub(crate) fn valid_refresh_token(token: &str) -> bool {
    Regex::new(r"^[0-9a-fA-F]{64}$").is_ok_and(|re| re.is_match(token))
}
