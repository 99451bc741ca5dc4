use super::{Claims, Verifier, VerifyError};
use base64ct::{Base64UrlUnpadded, Encoding};
use serde_json::Value;
use tracing::error;

/// Claims-only parser for integration environments. Performs no signature,
/// issuer or expiry check.
#[derive(Debug)]
pub struct InsecureVerifier {
    _private: (),
}

impl InsecureVerifier {
    /// Enable the insecure verifier. Logged at `error` level every time so it
    /// cannot go unnoticed in production logs.
    #[must_use]
    pub fn enable() -> Self {
        error!(
            "INSECURE VERIFIER ENABLED: bearer tokens are accepted without signature checks; never use this outside integration tests"
        );
        Self { _private: () }
    }
}

impl Verifier for InsecureVerifier {
    fn verify(&self, credential: &str) -> Result<Claims, VerifyError> {
        let mut segments = credential.trim().split('.');
        let (Some(_header), Some(payload)) = (segments.next(), segments.next()) else {
            return Err(VerifyError::InvalidToken);
        };

        // Accept both padded and unpadded base64url payloads.
        let bytes = Base64UrlUnpadded::decode_vec(payload.trim_end_matches('='))
            .map_err(|_| VerifyError::InvalidToken)?;

        match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Object(map)) => Ok(Claims::new(map)),
            _ => Err(VerifyError::InvalidToken),
        }
    }

    fn kind(&self) -> &'static str {
        "insecure"
    }
}
