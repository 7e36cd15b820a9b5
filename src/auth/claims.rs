/// Access token claim set.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AuthError;

pub const TOKEN_TYPE_ACCESS: &str = "access";

/// Signed claims carried by a stateless access token.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (user id as UUID string)
    pub sub: String,
    /// Token use discriminator; only "access" is accepted by the gateway
    pub typ: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

impl Claims {
    /// Build access-token claims for a user with the given lifetime.
    pub fn access(user_id: Uuid, ttl_minutes: i64) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            sub: user_id.to_string(),
            typ: TOKEN_TYPE_ACCESS.to_string(),
            iat: now,
            exp: now + ttl_minutes * 60,
        }
    }

    /// Extract the subject as a UUID.
    pub fn user_id(&self) -> Result<Uuid, AuthError> {
        Uuid::parse_str(&self.sub).map_err(|_| AuthError::TokenInvalid)
    }
}
