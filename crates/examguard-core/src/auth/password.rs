//! Argon2id password verifiers.
//!
//! Passwords are never stored. What is kept is a PHC-format Argon2id hash
//! that can confirm a later guess.

use anyhow::{anyhow, Result};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
#[cfg(test)]
use argon2::{Algorithm, Params, Version};
use rand::rngs::OsRng;

#[cfg(not(test))]
fn hasher() -> Argon2<'static> {
    Argon2::default()
}

// Unit tests hash a lot of passwords; keep them cheap
#[cfg(test)]
fn hasher() -> Argon2<'static> {
    let params = Params::new(1024, 1, 1, None).unwrap_or_default();
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
}

/// Hash `password` with a fresh random salt.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    hasher()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| anyhow!("argon2 hashing failed: {e}"))
}

/// Check `password` against a stored verifier. Malformed verifiers never match.
pub fn verify_password(password: &str, verifier: &str) -> bool {
    match PasswordHash::new(verifier) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let verifier = hash_password("pw").unwrap();
        assert!(verifier.starts_with("$argon2id$"));
        assert!(!verifier.contains("pw$"));
        assert!(verify_password("pw", &verifier));
        assert!(!verify_password("PW", &verifier));
    }

    #[test]
    fn test_salts_differ() {
        assert_ne!(hash_password("same").unwrap(), hash_password("same").unwrap());
    }

    #[test]
    fn test_malformed_verifier() {
        assert!(!verify_password("pw", "plaintext"));
        assert!(!verify_password("pw", ""));
    }
}
