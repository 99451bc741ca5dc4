//! Discovery-based OIDC verifier.
//!
//! Flow Overview:
//! 1) At construction, fetch `/.well-known/openid-configuration` from the issuer.
//! 2) Fetch the advertised `jwks_uri` once and keep the key set in memory.
//! 3) Per request, pick the key by `kid` and validate signature, issuer,
//!    audience and expiry locally (no outbound calls).

use super::{Claims, Verifier, VerifyError};
use crate::APP_USER_AGENT;
use anyhow::{Context, Result, anyhow, bail};
use jsonwebtoken::{
    DecodingKey, Validation, decode, decode_header,
    errors::ErrorKind,
    jwk::{Jwk, JwkSet},
};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{Instrument, info, info_span};

const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);
const CLOCK_LEEWAY_SECONDS: u64 = 30;

#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    issuer: String,
    jwks_uri: String,
}

#[derive(Debug, Clone)]
pub struct OidcVerifier {
    issuer: String,
    client_id: String,
    keys: JwkSet,
}

impl OidcVerifier {
    /// Run issuer discovery and fetch the signing keys.
    ///
    /// # Errors
    /// Returns an error if discovery or the key fetch fails, if the discovered
    /// issuer differs from the configured one, or if the key set is empty.
    pub async fn discover(issuer: &str, client_id: &str) -> Result<Self> {
        let issuer = issuer.trim_end_matches('/').to_string();
        let client = reqwest::Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(DISCOVERY_TIMEOUT)
            .build()
            .context("failed to build discovery client")?;

        let discovery_url = format!("{issuer}/.well-known/openid-configuration");
        let span = info_span!("oidc.discovery", url = %discovery_url);
        let document: DiscoveryDocument = async {
            client
                .get(&discovery_url)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await
        }
        .instrument(span)
        .await
        .with_context(|| format!("failed to fetch {discovery_url}"))?;

        if document.issuer.trim_end_matches('/') != issuer {
            bail!(
                "discovered issuer {} does not match configured issuer {issuer}",
                document.issuer
            );
        }

        let span = info_span!("oidc.jwks", url = %document.jwks_uri);
        let keys: JwkSet = async {
            client
                .get(&document.jwks_uri)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await
        }
        .instrument(span)
        .await
        .with_context(|| format!("failed to fetch {}", document.jwks_uri))?;

        info!(
            "Loaded {} signing key(s) from {}",
            keys.keys.len(),
            document.jwks_uri
        );

        Self::from_jwks(issuer, client_id.to_string(), keys)
    }

    /// Build a verifier from an already-fetched key set.
    ///
    /// # Errors
    /// Returns an error if the key set is empty.
    pub fn from_jwks(issuer: String, client_id: String, keys: JwkSet) -> Result<Self> {
        if keys.keys.is_empty() {
            return Err(anyhow!("issuer {issuer} published no signing keys"));
        }
        Ok(Self {
            issuer,
            client_id,
            keys,
        })
    }

    fn select_key(&self, kid: Option<&str>) -> Option<&Jwk> {
        match kid {
            Some(kid) => self.keys.find(kid),
            None if self.keys.keys.len() == 1 => self.keys.keys.first(),
            None => None,
        }
    }
}

impl Verifier for OidcVerifier {
    fn verify(&self, credential: &str) -> Result<Claims, VerifyError> {
        let credential = credential.trim();
        if credential.split('.').count() != 3 {
            return Err(VerifyError::InvalidToken);
        }

        let header = decode_header(credential).map_err(|_| VerifyError::InvalidToken)?;
        let jwk = self
            .select_key(header.kid.as_deref())
            .ok_or(VerifyError::SignatureInvalid)?;

        // A key pinned to one algorithm must not be used with another.
        if let Some(key_alg) = jwk.common.key_algorithm.as_ref()
            && format!("{key_alg:?}") != format!("{:?}", header.alg)
        {
            return Err(VerifyError::SignatureInvalid);
        }

        let key = DecodingKey::from_jwk(jwk).map_err(|_| VerifyError::InvalidToken)?;

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.client_id]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.leeway = CLOCK_LEEWAY_SECONDS;

        let data = decode::<Map<String, Value>>(credential, &key, &validation)
            .map_err(|err| map_jwt_error(err.kind()))?;

        Ok(Claims::new(data.claims))
    }

    fn kind(&self) -> &'static str {
        "oidc"
    }
}

/// Map `jsonwebtoken` failures onto the verifier taxonomy.
pub(crate) fn map_jwt_error(kind: &ErrorKind) -> VerifyError {
    match kind {
        ErrorKind::InvalidSignature
        | ErrorKind::InvalidAlgorithm
        | ErrorKind::InvalidAlgorithmName
        | ErrorKind::InvalidKeyFormat => VerifyError::SignatureInvalid,
        ErrorKind::InvalidIssuer => VerifyError::IssuerMismatch,
        ErrorKind::ExpiredSignature => VerifyError::Expired,
        _ => VerifyError::InvalidToken,
    }
}
