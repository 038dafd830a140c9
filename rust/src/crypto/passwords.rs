//! Argon2id hashing for the operator passphrase that unlocks full-key reveal.
//! Project keys themselves are never hashed here; they go through the
//! fingerprint module for lookup and the envelope for storage.

use argon2::password_hash::SaltString;
use argon2::{Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version};
use rand::rngs::OsRng;
use thiserror::Error;

/// 19 MiB, 2 passes, single lane.
const MEMORY_COST_KIB: u32 = 19 * 1024;
const TIME_COST: u32 = 2;
const PARALLELISM: u32 = 1;

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("argon2 parameters rejected: {0}")]
    Params(String),
    #[error("passphrase hashing failed: {0}")]
    Hashing(String),
    #[error("stored passphrase hash is not a valid PHC string: {0}")]
    InvalidHash(String),
}

fn argon2_config() -> Result<Argon2<'static>, PasswordError> {
    let params = Params::new(MEMORY_COST_KIB, TIME_COST, PARALLELISM, None)
        .map_err(|e| PasswordError::Params(format!("{e}")))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

/// Hashes an operator passphrase and returns the PHC string to put in config.
pub fn hash_passphrase(plaintext: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = argon2_config()?;
    argon2
        .hash_password(plaintext.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| PasswordError::Hashing(format!("{e}")))
}

/// Checks that a configured hash parses before it is relied on.
pub fn validate_hash(stored_hash: &str) -> Result<(), PasswordError> {
    PasswordHash::new(stored_hash)
        .map(|_| ())
        .map_err(|e| PasswordError::InvalidHash(format!("{e}")))
}

/// Returns `true` only when the passphrase matches the stored hash.
pub fn verify_passphrase(plaintext: &str, stored_hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(stored_hash) {
        Ok(hash) => hash,
        Err(_) => return false,
    };

    match argon2_config() {
        Ok(argon2) => argon2.verify_password(plaintext.as_bytes(), &parsed_hash).is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_and_verifies_passphrases() {
        let hash = hash_passphrase("operator-passphrase").expect("hashing should succeed");
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_passphrase("operator-passphrase", &hash));
        assert!(!verify_passphrase("wrong-passphrase", &hash));
    }

    #[test]
    fn garbage_hash_never_verifies() {
        assert!(!verify_passphrase("anything", "not-a-phc-string"));
        assert!(validate_hash("not-a-phc-string").is_err());
    }
}
