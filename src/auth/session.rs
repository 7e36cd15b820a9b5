/// Session issuance and the refresh rotation engine.

use chrono::{Duration, Utc};
use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::auth::jwt::generate_access_token;
use crate::auth::refresh_token::{
    self, generate_refresh_token, hash_refresh_token,
};
use crate::auth::user::{self, User};
use crate::configuration::JwtSettings;
use crate::error::{AppError, AuthError};

#[derive(Debug, Serialize)]
pub struct UserOut {
    pub id: String,
    pub email: String,
}

/// One freshly minted access token paired with one freshly generated
/// refresh token. The refresh plaintext appears here exactly once and is
/// never stored or logged.
#[derive(Debug, Serialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub user: UserOut,
}

/// Mint a session for an authenticated user.
///
/// Runs inside the caller's transaction: the refresh row insert and the
/// returned session commit or roll back together, so a session whose
/// refresh row failed to persist can never reach a client.
pub async fn issue_session(
    tx: &mut Transaction<'_, Postgres>,
    jwt: &JwtSettings,
    user: &User,
) -> Result<Session, AppError> {
    let (session, _) = issue_session_inner(tx, jwt, user).await?;
    Ok(session)
}

async fn issue_session_inner(
    tx: &mut Transaction<'_, Postgres>,
    jwt: &JwtSettings,
    user: &User,
) -> Result<(Session, Uuid), AppError> {
    let access_token = generate_access_token(&user.id, jwt)?;

    let refresh_plain = generate_refresh_token();
    let expires_at = Utc::now() + Duration::days(jwt.refresh_token_ttl_days);
    let token_id =
        refresh_token::insert(tx, user.id, &hash_refresh_token(&refresh_plain), expires_at)
            .await?;

    let session = Session {
        access_token,
        refresh_token: refresh_plain,
        token_type: "bearer".to_string(),
        user: UserOut {
            id: user.id.to_string(),
            email: user.email.clone(),
        },
    };
    Ok((session, token_id))
}

/// Exchange a refresh token for a new session, rotating it.
///
/// State machine per presented token:
/// 1. unknown hash            -> `invalid_refresh_token`
/// 2. already rotated/revoked -> reuse event: revoke every active token of
///    the owning user, commit, fail `refresh_reuse_detected`
/// 3. expired                 -> `refresh_expired`, no mutation
/// 4. owner missing/inactive  -> `user_not_found`, no mutation
/// 5. otherwise rotate: insert replacement, mark presented row rotated with
///    its replacement link, mint a new access token, commit atomically
///
/// Reuse is checked before expiry: a rotated-but-unexpired token is a theft
/// signal. The `FOR UPDATE` lock in the lookup makes rotation at-most-once
/// when the same token is presented concurrently.
pub async fn refresh_session(
    pool: &PgPool,
    jwt: &JwtSettings,
    presented: &str,
) -> Result<Session, AppError> {
    let now = Utc::now();
    let presented_hash = hash_refresh_token(presented);

    let mut tx = pool.begin().await?;

    let row = refresh_token::find_by_hash_for_update(&mut tx, &presented_hash)
        .await?
        .ok_or(AppError::Auth(AuthError::InvalidRefreshToken))?;

    if row.is_revoked() {
        let revoked = refresh_token::revoke_all_active_for_user(&mut tx, row.user_id, now).await?;
        tx.commit().await?;
        tracing::warn!(
            user_id = %row.user_id,
            revoked_tokens = revoked,
            "Refresh token reuse detected; all sessions for user revoked"
        );
        return Err(AppError::Auth(AuthError::RefreshReuseDetected));
    }

    if row.expires_at <= now {
        return Err(AppError::Auth(AuthError::RefreshExpired));
    }

    let owner = match user::find_by_id(&mut tx, row.user_id).await? {
        Some(user) if user.is_active => user,
        _ => return Err(AppError::Auth(AuthError::UserNotFound)),
    };

    let (session, new_token_id) = issue_session_inner(&mut tx, jwt, &owner).await?;
    refresh_token::mark_rotated(&mut tx, row.id, new_token_id, now).await?;

    tx.commit().await?;

    tracing::info!(user_id = %owner.id, "Refresh token rotated");
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_serializes_with_bearer_token_type() {
        let session = Session {
            access_token: "a.b.c".to_string(),
            refresh_token: "opaque".to_string(),
            token_type: "bearer".to_string(),
            user: UserOut {
                id: Uuid::new_v4().to_string(),
                email: "rider@example.com".to_string(),
            },
        };

        let value = serde_json::to_value(&session).unwrap();
        assert_eq!(value["token_type"], "bearer");
        assert_eq!(value["user"]["email"], "rider@example.com");
        assert!(value["access_token"].is_string());
        assert!(value["refresh_token"].is_string());
    }
}
