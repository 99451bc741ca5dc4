//! Bearer credential verification.
//!
//! A [`Verifier`] turns an opaque credential into identity [`Claims`]. Two
//! implementations exist:
//!
//! - [`OidcVerifier`]: discovery-based; fetches issuer metadata and signing
//!   keys once at construction, then verifies locally.
//! - [`InsecureVerifier`]: decodes the payload segment without any signature
//!   check. Only reachable through `--insecure-verifier`.

mod insecure;
mod oidc;

pub use insecure::InsecureVerifier;
pub use oidc::OidcVerifier;
pub(crate) use oidc::map_jwt_error;

use super::{claims::Claims, error::VerifyError};

pub trait Verifier: Send + Sync {
    /// Validate `credential` and return its claims.
    ///
    /// # Errors
    /// `InvalidToken` for malformed input; `SignatureInvalid`, `IssuerMismatch`
    /// or `Expired` when cryptographic or validity checks fail.
    fn verify(&self, credential: &str) -> Result<Claims, VerifyError>;

    /// Short label for logs and health output.
    fn kind(&self) -> &'static str;
}
