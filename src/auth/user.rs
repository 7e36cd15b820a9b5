/// User rows and principal resolution.

use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::auth::claims::Claims;
use crate::error::{is_unique_violation, AppError, AuthError, DatabaseError};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub is_active: bool,
}

/// Insert a new user. The email must already be normalized.
///
/// A duplicate email maps to a 409 with the `email_already_registered` code.
pub async fn insert_user(
    tx: &mut Transaction<'_, Postgres>,
    email: &str,
    password_hash: &str,
) -> Result<User, AppError> {
    sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (email, password_hash)
        VALUES ($1, $2)
        RETURNING id, email, password_hash, is_active
        "#,
    )
    .bind(email)
    .bind(password_hash)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::Database(DatabaseError::UniqueConstraintViolation(
                "email_already_registered".to_string(),
            ))
        } else {
            e.into()
        }
    })
}

pub async fn find_by_email(pool: &PgPool, email: &str) -> Result<Option<User>, AppError> {
    let user = sqlx::query_as::<_, User>(
        "SELECT id, email, password_hash, is_active FROM users WHERE email = $1",
    )
    .bind(email)
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<User>, AppError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let user = sqlx::query_as::<_, User>(
        "SELECT id, email, password_hash, is_active FROM users WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(executor)
    .await?;
    Ok(user)
}

/// Resolve injected claims into an authenticated user, or fail.
///
/// `None` claims mean no credential was presented (`not_authenticated`);
/// a subject that no longer resolves to an active user fails
/// `user_not_found`. Both are 401.
pub async fn require_current_user(
    pool: &PgPool,
    claims: Option<&Claims>,
) -> Result<User, AppError> {
    let claims = claims.ok_or(AppError::Auth(AuthError::NotAuthenticated))?;
    let user_id = claims.user_id()?;

    match find_by_id(pool, user_id).await? {
        Some(user) if user.is_active => Ok(user),
        _ => Err(AppError::Auth(AuthError::UserNotFound)),
    }
}

/// Like `require_current_user`, but anonymous callers are allowed through.
pub async fn optional_current_user(
    pool: &PgPool,
    claims: Option<&Claims>,
) -> Result<Option<User>, AppError> {
    match claims {
        None => Ok(None),
        Some(_) => require_current_user(pool, claims).await.map(Some),
    }
}
