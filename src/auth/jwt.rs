/// Stateless access token encoding and validation.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use crate::auth::claims::{Claims, TOKEN_TYPE_ACCESS};
use crate::configuration::JwtSettings;
use crate::error::{AppError, AuthError};

/// Generate a new signed access token for a user.
///
/// HS256 over the standard JWT header; lifetime comes from configuration.
pub fn generate_access_token(user_id: &Uuid, config: &JwtSettings) -> Result<String, AppError> {
    let claims = Claims::access(*user_id, config.access_token_ttl_minutes);

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))
}

/// Validate a bearer token and extract its claims.
///
/// Expiry failures are reported distinctly from structural/signature
/// failures so operators can tell them apart; both are 401 at the boundary.
/// A signature-valid token whose `typ` is not "access" is rejected as well.
pub fn validate_access_token(token: &str, config: &JwtSettings) -> Result<Claims, AuthError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.secret.as_bytes()),
        &validation,
    )
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
        _ => AuthError::TokenInvalid,
    })?;

    if data.claims.typ != TOKEN_TYPE_ACCESS {
        return Err(AuthError::InvalidTokenType);
    }

    Ok(data.claims)
}
