/// Unified error handling for the application.
///
/// Domain-specific error types roll up into a single `AppError` used for
/// control flow; the `ResponseError` impl maps every variant to a JSON body
/// with a machine-readable `code` that is part of the API contract.

use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use std::error::Error as StdError;
use std::fmt;

/// Validation errors for input data
#[derive(Debug, Clone)]
pub enum ValidationError {
    EmptyField(String),
    TooShort(String, usize),
    TooLong(String, usize),
    InvalidFormat(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::EmptyField(field) => write!(f, "{} is empty", field),
            ValidationError::TooShort(field, min) => {
                write!(f, "{} is too short (minimum {} characters)", field, min)
            }
            ValidationError::TooLong(field, max) => {
                write!(f, "{} is too long (maximum {} characters)", field, max)
            }
            ValidationError::InvalidFormat(msg) => write!(f, "{}", msg),
        }
    }
}

impl StdError for ValidationError {}

/// Authentication and session lifecycle errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    InvalidCredentials,
    NotAuthenticated,
    TokenInvalid,
    TokenExpired,
    InvalidTokenType,
    InvalidRefreshToken,
    RefreshReuseDetected,
    RefreshExpired,
    UserNotFound,
    InactiveUser,
}

impl AuthError {
    /// Stable error code surfaced in the response body.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::NotAuthenticated => "not_authenticated",
            AuthError::TokenInvalid => "invalid_token",
            AuthError::TokenExpired => "token_expired",
            AuthError::InvalidTokenType => "invalid_token_type",
            AuthError::InvalidRefreshToken => "invalid_refresh_token",
            AuthError::RefreshReuseDetected => "refresh_reuse_detected",
            AuthError::RefreshExpired => "refresh_expired",
            AuthError::UserNotFound => "user_not_found",
            AuthError::InactiveUser => "inactive_user",
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::InvalidCredentials => write!(f, "Invalid email or password"),
            AuthError::NotAuthenticated => write!(f, "Not authenticated"),
            AuthError::TokenInvalid => write!(f, "Invalid token"),
            AuthError::TokenExpired => write!(f, "Token has expired"),
            AuthError::InvalidTokenType => write!(f, "Wrong token type"),
            AuthError::InvalidRefreshToken => write!(f, "Invalid refresh token"),
            AuthError::RefreshReuseDetected => {
                write!(f, "Refresh token reuse detected; all sessions revoked")
            }
            AuthError::RefreshExpired => write!(f, "Refresh token has expired"),
            AuthError::UserNotFound => write!(f, "User not found or inactive"),
            AuthError::InactiveUser => write!(f, "Account is inactive"),
        }
    }
}

impl StdError for AuthError {}

/// Database operation errors
#[derive(Debug)]
pub enum DatabaseError {
    /// The contained string is the conflict-specific error code
    /// (e.g. `email_already_registered`).
    UniqueConstraintViolation(String),
    QueryExecution(String),
    ConnectionPool(String),
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseError::UniqueConstraintViolation(code) => {
                write!(f, "Duplicate entry: {}", code)
            }
            DatabaseError::QueryExecution(msg) => write!(f, "Query error: {}", msg),
            DatabaseError::ConnectionPool(msg) => write!(f, "Database connection error: {}", msg),
        }
    }
}

impl StdError for DatabaseError {}

/// Central error type that all application errors map to
#[derive(Debug)]
pub enum AppError {
    Validation(ValidationError),
    Auth(AuthError),
    Database(DatabaseError),
    NotFound(String),
    Forbidden,
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Validation(e) => write!(f, "{}", e),
            AppError::Auth(e) => write!(f, "{}", e),
            AppError::Database(e) => write!(f, "{}", e),
            AppError::NotFound(resource) => write!(f, "{} not found", resource),
            AppError::Forbidden => write!(f, "Forbidden"),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl StdError for AppError {}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::Validation(err)
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        AppError::Auth(err)
    }
}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        AppError::Database(err)
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                AppError::Database(DatabaseError::ConnectionPool(err.to_string()))
            }
            _ => AppError::Database(DatabaseError::QueryExecution(err.to_string())),
        }
    }
}

/// True when the error is a Postgres unique-constraint violation (23505).
/// Call sites use this to map conflicts to their endpoint-specific code.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("23505"),
        _ => false,
    }
}

/// Error response body. `code` is the stable discriminator clients match on.
#[derive(Debug, serde::Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub status: u16,
}

impl AppError {
    fn code(&self) -> String {
        match self {
            AppError::Validation(_) => "validation_error".to_string(),
            AppError::Auth(e) => e.code().to_string(),
            AppError::Database(DatabaseError::UniqueConstraintViolation(code)) => code.clone(),
            AppError::Database(DatabaseError::ConnectionPool(_)) => {
                "service_unavailable".to_string()
            }
            AppError::Database(_) => "database_error".to_string(),
            AppError::NotFound(_) => "not_found".to_string(),
            AppError::Forbidden => "forbidden".to_string(),
            AppError::Internal(_) => "internal_error".to_string(),
        }
    }

    /// Message safe to show to clients. Internal details stay in the logs.
    fn public_message(&self) -> String {
        match self {
            AppError::Database(DatabaseError::QueryExecution(_)) => {
                "Database error occurred".to_string()
            }
            AppError::Database(DatabaseError::ConnectionPool(_)) => {
                "Database service temporarily unavailable".to_string()
            }
            AppError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }

    fn log(&self) {
        match self.status_code() {
            status if status.is_server_error() => {
                tracing::error!(error = %self, "Request failed");
            }
            _ => {
                tracing::warn!(error = %self, "Request rejected");
            }
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Auth(AuthError::InactiveUser) => StatusCode::FORBIDDEN,
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::Database(DatabaseError::UniqueConstraintViolation(_)) => {
                StatusCode::CONFLICT
            }
            AppError::Database(DatabaseError::ConnectionPool(_)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        self.log();
        let status = self.status_code();
        HttpResponse::build(status).json(ErrorResponse {
            code: self.code(),
            message: self.public_message(),
            status: status.as_u16(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_display() {
        let err = ValidationError::EmptyField("email".to_string());
        assert_eq!(err.to_string(), "email is empty");
    }

    #[test]
    fn auth_error_codes_are_stable() {
        assert_eq!(AuthError::InvalidRefreshToken.code(), "invalid_refresh_token");
        assert_eq!(AuthError::RefreshReuseDetected.code(), "refresh_reuse_detected");
        assert_eq!(AuthError::RefreshExpired.code(), "refresh_expired");
        assert_eq!(AuthError::NotAuthenticated.code(), "not_authenticated");
    }

    #[test]
    fn inactive_user_maps_to_403_and_other_auth_errors_to_401() {
        let err = AppError::Auth(AuthError::InactiveUser);
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        let err = AppError::Auth(AuthError::InvalidCredentials);
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn unique_violation_maps_to_conflict_with_specific_code() {
        let err = AppError::Database(DatabaseError::UniqueConstraintViolation(
            "email_already_registered".to_string(),
        ));
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.code(), "email_already_registered");
    }

    #[test]
    fn internal_details_are_not_leaked() {
        let err = AppError::Internal("secret connection string".to_string());
        assert_eq!(err.public_message(), "Internal server error");
    }
}
