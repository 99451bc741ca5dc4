use crate::auth::{Claims, User};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub const TOKEN_TYPE_BEARER: &str = "Bearer";

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    /// Identity token from the external identity provider.
    pub id_token: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RefreshResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

/// `{user}` when the subject has a directory record, otherwise `{claims}`;
/// `claims` is null for anonymous callers.
#[derive(Debug, Serialize, ToSchema)]
#[serde(untagged)]
pub enum MeResponse {
    User { user: User },
    Claims { claims: Option<Claims> },
}
