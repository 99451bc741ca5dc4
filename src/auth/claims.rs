//! Identity claims as produced by a verifier.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

/// Claim-name to value mapping. Transient: consumed by the user directory and
/// never persisted as-is.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
#[schema(value_type = Object)]
pub struct Claims(Map<String, Value>);

impl Claims {
    #[must_use]
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Stable subject identifier; empty strings count as absent.
    #[must_use]
    pub fn sub(&self) -> Option<&str> {
        self.str_claim("sub")
    }

    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.str_claim("email")
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.str_claim("name")
            .or_else(|| self.str_claim("preferred_username"))
    }

    #[must_use]
    pub fn get(&self, claim: &str) -> Option<&Value> {
        self.0.get(claim)
    }

    fn str_claim(&self, claim: &str) -> Option<&str> {
        self.0
            .get(claim)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

impl From<Map<String, Value>> for Claims {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
