/// Password hashing and verification.
///
/// PBKDF2-HMAC-SHA256 with a random per-password salt and a fixed round
/// count. The PHC string stored in the database carries the algorithm id,
/// round count, salt, and digest, so the cost can be raised for newly
/// hashed passwords without invalidating existing ones.

use pbkdf2::{
    password_hash::{
        rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
    },
    Params, Pbkdf2,
};

use crate::error::AppError;

const PBKDF2_ROUNDS: u32 = 210_000;
const OUTPUT_LENGTH: usize = 32;

/// Hash a password for storage.
///
/// # Errors
/// Returns an error only if the KDF itself fails; input validation happens
/// before this is called.
pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    let params = Params {
        rounds: PBKDF2_ROUNDS,
        output_length: OUTPUT_LENGTH,
    };

    let hash = Pbkdf2
        .hash_password_customized(password.as_bytes(), None, None, params, salt.as_salt())
        .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))?;

    Ok(hash.to_string())
}

/// Verify a password attempt against a stored PHC string.
///
/// Re-derives with the parameters embedded in the stored hash and compares
/// in constant time. A malformed or unparsable stored hash is treated as
/// "no match", never as an error.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let parsed = match PasswordHash::new(stored) {
        Ok(hash) => hash,
        Err(_) => return false,
    };
    Pbkdf2.verify_password(password.as_bytes(), &parsed).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify_round_trips() {
        let hash = hash_password("correct horse battery staple").expect("hashing failed");
        assert!(verify_password("correct horse battery staple", &hash));
    }

    #[test]
    fn wrong_password_does_not_verify() {
        let hash = hash_password("correct horse battery staple").expect("hashing failed");
        assert!(!verify_password("incorrect horse", &hash));
    }

    #[test]
    fn encoded_hash_is_self_describing() {
        let hash = hash_password("correct horse battery staple").expect("hashing failed");
        assert!(hash.starts_with("$pbkdf2-sha256$"));
        assert!(hash.contains("i=210000"));
    }

    #[test]
    fn same_password_gets_distinct_salts() {
        let a = hash_password("correct horse battery staple").unwrap();
        let b = hash_password("correct horse battery staple").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn malformed_stored_hash_is_no_match() {
        assert!(!verify_password("anything", "not-a-phc-string"));
        assert!(!verify_password("anything", ""));
        assert!(!verify_password("anything", "$pbkdf2-sha256$garbage"));
    }
}
