/// Authentication core
///
/// Password hashing, stateless access tokens, session issuance, and the
/// rotating refresh-token store with reuse detection.

mod claims;
mod jwt;
mod password;
mod refresh_token;
mod session;
mod user;

pub use claims::{Claims, TOKEN_TYPE_ACCESS};
pub use jwt::generate_access_token;
pub use jwt::validate_access_token;
pub use password::hash_password;
pub use password::verify_password;
pub use refresh_token::{generate_refresh_token, hash_refresh_token};
pub use session::{issue_session, refresh_session, Session, UserOut};
pub use user::{
    find_by_email, find_by_id, insert_user, optional_current_user, require_current_user, User,
};
