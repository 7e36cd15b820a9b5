/// Authentication endpoints
///
/// Registration, login, refresh-token rotation, and current-user lookup.
/// Password hashing and verification run on the blocking thread pool so the
/// KDF cost never stalls the async workers.

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use sqlx::PgPool;

use crate::auth::{
    hash_password, insert_user, issue_session, refresh_session, require_current_user,
    verify_password, Claims, UserOut,
};
use crate::configuration::JwtSettings;
use crate::error::{AppError, AuthError, ValidationError};
use crate::validators::{normalize_email, validate_new_password};

const MIN_REFRESH_TOKEN_LENGTH: usize = 10;
const MAX_REFRESH_TOKEN_LENGTH: usize = 4096;

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// POST /api/auth/register
///
/// Creates an account and returns a fresh session. The user row and the
/// session's refresh-token row commit in one transaction.
///
/// # Errors
/// - 400: invalid email or password length
/// - 409: `email_already_registered`
pub async fn register(
    form: web::Json<RegisterRequest>,
    pool: web::Data<PgPool>,
    jwt_config: web::Data<JwtSettings>,
) -> Result<HttpResponse, AppError> {
    let email = normalize_email(&form.email)?;
    validate_new_password(&form.password)?;

    let password = form.password.clone();
    let password_hash = web::block(move || hash_password(&password))
        .await
        .map_err(|e| AppError::Internal(format!("Blocking task failed: {}", e)))??;

    let mut tx = pool.begin().await?;
    let user = insert_user(&mut tx, &email, &password_hash).await?;
    let session = issue_session(&mut tx, jwt_config.get_ref(), &user).await?;
    tx.commit().await?;

    tracing::info!(user_id = %user.id, "User registered");
    Ok(HttpResponse::Ok().json(session))
}

/// POST /api/auth/login
///
/// The same response is returned for an unknown email and a wrong password
/// to avoid user enumeration. The active-account check happens after the
/// password verifies, so only a proven owner learns the account is
/// deactivated.
///
/// # Errors
/// - 401: `invalid_credentials`
/// - 403: `inactive_user`
pub async fn login(
    form: web::Json<LoginRequest>,
    pool: web::Data<PgPool>,
    jwt_config: web::Data<JwtSettings>,
) -> Result<HttpResponse, AppError> {
    let email = form.email.trim().to_lowercase();

    let user = crate::auth::find_by_email(pool.get_ref(), &email)
        .await?
        .ok_or(AppError::Auth(AuthError::InvalidCredentials))?;

    let password = form.password.clone();
    let stored_hash = user.password_hash.clone();
    let password_valid = web::block(move || verify_password(&password, &stored_hash))
        .await
        .map_err(|e| AppError::Internal(format!("Blocking task failed: {}", e)))?;

    if !password_valid {
        return Err(AppError::Auth(AuthError::InvalidCredentials));
    }
    if !user.is_active {
        return Err(AppError::Auth(AuthError::InactiveUser));
    }

    let mut tx = pool.begin().await?;
    let session = issue_session(&mut tx, jwt_config.get_ref(), &user).await?;
    tx.commit().await?;

    tracing::info!(user_id = %user.id, "User logged in");
    Ok(HttpResponse::Ok().json(session))
}

/// POST /api/auth/refresh
///
/// Exchanges a refresh token for a new session, rotating the token.
/// Presenting an already-rotated token is treated as theft in progress and
/// force-ends every session of the owning user.
///
/// # Errors
/// - 401: `invalid_refresh_token` | `refresh_reuse_detected` |
///   `refresh_expired` | `user_not_found`
pub async fn refresh(
    form: web::Json<RefreshRequest>,
    pool: web::Data<PgPool>,
    jwt_config: web::Data<JwtSettings>,
) -> Result<HttpResponse, AppError> {
    let presented = form.refresh_token.as_str();
    if presented.len() < MIN_REFRESH_TOKEN_LENGTH || presented.len() > MAX_REFRESH_TOKEN_LENGTH {
        return Err(AppError::Validation(ValidationError::InvalidFormat(
            "refresh_token has invalid length".to_string(),
        )));
    }

    let session = refresh_session(pool.get_ref(), jwt_config.get_ref(), presented).await?;
    Ok(HttpResponse::Ok().json(session))
}

/// GET /api/auth/me
///
/// Returns the authenticated user's public identity.
///
/// # Errors
/// - 401: `not_authenticated` (no credential) | `user_not_found`
pub async fn me(
    claims: Option<web::ReqData<Claims>>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, AppError> {
    let user = require_current_user(pool.get_ref(), claims.as_deref()).await?;

    Ok(HttpResponse::Ok().json(UserOut {
        id: user.id.to_string(),
        email: user.email,
    }))
}
