/// Refresh token generation and persistence.
///
/// Refresh tokens are opaque random strings. Only a SHA-256 hash is ever
/// stored; the plaintext is returned to the client exactly once. Rows are
/// never deleted in normal flow, only revoked, so the replacement chain
/// stays auditable.

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use sha2::{Digest, Sha256};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::error::AppError;

const TOKEN_LENGTH: usize = 64;

/// Generate a new cryptographically random refresh token.
/// 64 alphanumeric characters, URL-safe, well above 32 bytes of entropy.
pub fn generate_refresh_token() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

/// Hash a refresh token for storage or lookup.
pub fn hash_refresh_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RefreshTokenRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_reason: Option<String>,
    pub replaced_by_token_id: Option<Uuid>,
}

impl RefreshTokenRow {
    /// A row in any terminal revoked state: rotated away or mass-revoked.
    /// Checked before expiry, since presenting a rotated-but-unexpired
    /// token is a theft signal, not a stale one.
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some() || self.replaced_by_token_id.is_some()
    }
}

/// Insert a freshly issued refresh token row, returning its id.
pub async fn insert(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    token_hash: &str,
    expires_at: DateTime<Utc>,
) -> Result<Uuid, AppError> {
    let id = sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO refresh_tokens (user_id, token_hash, expires_at)
        VALUES ($1, $2, $3)
        RETURNING id
        "#,
    )
    .bind(user_id)
    .bind(token_hash)
    .bind(expires_at)
    .fetch_one(&mut *tx)
    .await?;
    Ok(id)
}

/// Look up a token row by hash, locking it for the rest of the transaction.
/// The row lock is what makes rotation at-most-once under concurrent
/// presentations of the same token: the loser blocks here and then observes
/// the committed revocation.
pub async fn find_by_hash_for_update(
    tx: &mut Transaction<'_, Postgres>,
    token_hash: &str,
) -> Result<Option<RefreshTokenRow>, AppError> {
    let row = sqlx::query_as::<_, RefreshTokenRow>(
        r#"
        SELECT id, user_id, token_hash, created_at, expires_at,
               revoked_at, revoked_reason, replaced_by_token_id
        FROM refresh_tokens
        WHERE token_hash = $1
        FOR UPDATE
        "#,
    )
    .bind(token_hash)
    .fetch_optional(&mut *tx)
    .await?;
    Ok(row)
}

/// Revoke every active token belonging to a user (reuse response).
/// Returns the number of sessions that were force-ended.
pub async fn revoke_all_active_for_user(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<u64, AppError> {
    let result = sqlx::query(
        r#"
        UPDATE refresh_tokens
        SET revoked_at = $1, revoked_reason = 'reuse'
        WHERE user_id = $2 AND revoked_at IS NULL
        "#,
    )
    .bind(now)
    .bind(user_id)
    .execute(&mut *tx)
    .await?;
    Ok(result.rows_affected())
}

/// Mark a presented token as rotated, linking it to its replacement.
pub async fn mark_rotated(
    tx: &mut Transaction<'_, Postgres>,
    token_id: Uuid,
    replaced_by: Uuid,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        UPDATE refresh_tokens
        SET revoked_at = $1, revoked_reason = 'rotated', replaced_by_token_id = $2
        WHERE id = $3
        "#,
    )
    .bind(now)
    .bind(replaced_by)
    .bind(token_id)
    .execute(&mut *tx)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_token_is_64_alphanumeric_chars() {
        let token = generate_refresh_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn hashing_is_deterministic_and_one_way() {
        let token = generate_refresh_token();
        let hash1 = hash_refresh_token(&token);
        let hash2 = hash_refresh_token(&token);

        assert_eq!(hash1, hash2);
        assert_ne!(token, hash1);
        // SHA-256 hex
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn different_tokens_hash_differently() {
        assert_ne!(
            hash_refresh_token(&generate_refresh_token()),
            hash_refresh_token(&generate_refresh_token())
        );
    }

    #[test]
    fn revoked_state_covers_both_markers() {
        let base = RefreshTokenRow {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            token_hash: "h".to_string(),
            created_at: Utc::now(),
            expires_at: Utc::now(),
            revoked_at: None,
            revoked_reason: None,
            replaced_by_token_id: None,
        };
        assert!(!base.is_revoked());

        let mut revoked = base.clone();
        revoked.revoked_at = Some(Utc::now());
        assert!(revoked.is_revoked());

        let mut replaced = base;
        replaced.replaced_by_token_id = Some(Uuid::new_v4());
        assert!(replaced.is_revoked());
    }
}
