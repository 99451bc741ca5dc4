//! Self-issued access tokens (HS256 JWT) handed out at login and refresh.

use super::{
    claims::Claims,
    error::{IssueError, VerifyError},
    verifier::map_jwt_error,
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ulid::Ulid;

/// `iss` claim on every self-issued token.
pub const ACCESS_TOKEN_ISSUER: &str = env!("CARGO_PKG_NAME");

pub const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: i64 = 15 * 60;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub iss: String,
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

impl AccessClaims {
    /// Time left before the token expires; zero once it has.
    #[must_use]
    pub fn remaining_lifetime(&self, now: DateTime<Utc>) -> std::time::Duration {
        u64::try_from(self.exp - now.timestamp())
            .map(std::time::Duration::from_secs)
            .unwrap_or_default()
    }

    /// Identity claims view, as returned by `/me`.
    #[must_use]
    pub fn to_claims(&self) -> Claims {
        let mut map = Map::new();
        map.insert("sub".to_string(), Value::String(self.sub.clone()));
        if let Some(email) = &self.email {
            map.insert("email".to_string(), Value::String(email.clone()));
        }
        if let Some(name) = &self.name {
            map.insert("name".to_string(), Value::String(name.clone()));
        }
        map.insert("iss".to_string(), Value::String(self.iss.clone()));
        map.insert("iat".to_string(), Value::from(self.iat));
        map.insert("exp".to_string(), Value::from(self.exp));
        Claims::new(map)
    }
}

#[derive(Clone, Debug)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub expires_in: i64,
}

#[derive(Clone)]
pub struct AccessTokens {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl std::fmt::Debug for AccessTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessTokens")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl AccessTokens {
    #[must_use]
    pub fn new(secret: &SecretString, ttl: Duration) -> Self {
        let secret = secret.expose_secret().as_bytes();
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl,
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Mint a token for `sub`.
    ///
    /// # Errors
    /// `TtlOverflow` if the configured lifetime runs past the representable
    /// clock, or the signing error.
    pub fn issue(
        &self,
        sub: &str,
        email: Option<&str>,
        name: Option<&str>,
    ) -> Result<IssuedToken, IssueError> {
        let now = Utc::now();
        let expires_at = now
            .checked_add_signed(self.ttl)
            .ok_or(IssueError::TtlOverflow)?;
        let claims = AccessClaims {
            iss: ACCESS_TOKEN_ISSUER.to_string(),
            sub: sub.to_string(),
            email: email.map(ToString::to_string),
            name: name.map(ToString::to_string),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: Ulid::new().to_string(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?;
        Ok(IssuedToken {
            token,
            expires_at,
            expires_in: self.ttl.num_seconds(),
        })
    }

    /// Validate signature, issuer and expiry of a self-issued token.
    ///
    /// # Errors
    /// Returns the verifier taxonomy error.
    pub fn decode(&self, token: &str) -> Result<AccessClaims, VerifyError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_issuer(&[ACCESS_TOKEN_ISSUER]);
        validation.set_required_spec_claims(&["exp", "sub", "iss"]);

        decode::<AccessClaims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|err| map_jwt_error(err.kind()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(ttl: Duration) -> AccessTokens {
        AccessTokens::new(
            &SecretString::from("access-token-test-secret".to_string()),
            ttl,
        )
    }

    #[test]
    fn issue_then_decode() {
        let tokens = tokens(Duration::seconds(DEFAULT_ACCESS_TOKEN_TTL_SECONDS));
        let Ok(issued) = tokens.issue("sub-1", Some("a@b.com"), None) else {
            panic!("failed to issue token");
        };
        assert_eq!(issued.expires_in, 900);

        let claims = tokens.decode(&issued.token);
        let Ok(claims) = claims else {
            panic!("failed to decode token: {claims:?}");
        };
        assert_eq!(claims.sub, "sub-1");
        assert_eq!(claims.email.as_deref(), Some("a@b.com"));
        assert!(claims.name.is_none());
        assert!(Ulid::from_string(&claims.jti).is_ok());

        let remaining = claims.remaining_lifetime(Utc::now());
        assert!(remaining <= std::time::Duration::from_secs(900));
        assert!(remaining > std::time::Duration::from_secs(890));
        assert_eq!(claims.to_claims().sub(), Some("sub-1"));
    }

    #[test]
    fn expired_token_maps_to_expired() {
        let tokens = tokens(Duration::seconds(-120));
        let Ok(issued) = tokens.issue("sub-1", None, None) else {
            panic!("failed to issue token");
        };
        assert_eq!(tokens.decode(&issued.token), Err(VerifyError::Expired));
    }

    #[test]
    fn foreign_secret_is_rejected() {
        let Ok(issued) = tokens(Duration::minutes(5)).issue("sub-1", None, None) else {
            panic!("failed to issue token");
        };
        let other = AccessTokens::new(
            &SecretString::from("another-secret".to_string()),
            Duration::minutes(5),
        );
        assert_eq!(
            other.decode(&issued.token),
            Err(VerifyError::SignatureInvalid)
        );
    }

    #[test]
    fn lifetime_past_the_clock_is_an_error() {
        let tokens = tokens(Duration::days(365 * 1_000_000));
        assert!(matches!(
            tokens.issue("sub-1", None, None),
            Err(IssueError::TtlOverflow)
        ));
    }

    #[test]
    fn garbage_is_invalid() {
        let tokens = tokens(Duration::minutes(5));
        assert_eq!(tokens.decode("not-a-jwt"), Err(VerifyError::InvalidToken));
    }

    #[test]
    fn remaining_lifetime_is_zero_after_expiry() {
        let claims = AccessClaims {
            iss: ACCESS_TOKEN_ISSUER.to_string(),
            sub: "s".to_string(),
            email: None,
            name: None,
            iat: 0,
            exp: 10,
            jti: Ulid::new().to_string(),
        };
        assert_eq!(
            claims.remaining_lifetime(Utc::now()),
            std::time::Duration::ZERO
        );
    }
}
