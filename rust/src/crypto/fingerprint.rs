//! Lookup fingerprints for project keys. The hash and prefix only narrow the
//! search; a hit is a candidate that still has to be decrypted and compared.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Number of leading plaintext characters stored as the display/sharding prefix.
pub const PREFIX_CHARS: usize = 8;

/// Produces a raw SHA-256 digest of the provided bytes.
pub fn sha256_digest(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Hex SHA-256 of the plaintext key.
pub fn hash(plaintext: &str) -> String {
    let digest = sha256_digest(plaintext.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// First eight characters of the plaintext key.
pub fn prefix(plaintext: &str) -> String {
    plaintext.chars().take(PREFIX_CHARS).collect()
}

/// Compares two strings without short-circuiting on the first differing byte.
/// Lengths are compared up front; the key shape is fixed so length is not secret.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Derivation of the `(prefix, hash)` index pair. The default uses SHA-256;
/// alternative implementations exist so collision handling can be exercised.
pub trait Fingerprinter {
    fn prefix(&self, plaintext: &str) -> String;
    fn hash(&self, plaintext: &str) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Fingerprinter;

impl Fingerprinter for Sha256Fingerprinter {
    fn prefix(&self, plaintext: &str) -> String {
        prefix(plaintext)
    }

    fn hash(&self, plaintext: &str) -> String {
        hash(plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_to_hex() {
        assert_eq!(
            hash("fp_proj_"),
            "fdf0dc2464e1950acdc7a972ce6a67ed8bc82d0431189f7e47790a39264d3347"
        );
        assert_eq!(hash("fp_proj_"), hex::encode(sha256_digest(b"fp_proj_")));
    }

    #[test]
    fn hash_is_deterministic() {
        let key = "fp_proj_AbCdEfGhIjKlMnOpQrStUvWxYz012345";
        assert_eq!(hash(key), hash(key));
        assert_ne!(hash(key), hash(&format!("{key}x")));
        assert_eq!(hash(key).len(), 64);
    }

    #[test]
    fn prefix_is_first_eight_chars() {
        assert_eq!(prefix("fp_proj_AbCdEfGh"), "fp_proj_");
        assert_eq!(prefix("short"), "short");
    }

    #[test]
    fn constant_time_eq_matches_equality() {
        assert!(constant_time_eq("fp_proj_abc", "fp_proj_abc"));
        assert!(!constant_time_eq("fp_proj_abc", "fp_proj_abd"));
        assert!(!constant_time_eq("fp_proj_abc", "fp_proj_abcx"));
        assert!(constant_time_eq("", ""));
    }
}
