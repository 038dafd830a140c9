//! Versioned AES-256-GCM envelope for stored project keys.
//! New values are written as `v1:` + base64(iv || ciphertext || tag). Values
//! without the version tag are pre-encryption records that hold plain base64;
//! they can be read but never written.

use std::fmt;

use aes_gcm::aead::{Aead, AeadCore, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::Hmac;
use pbkdf2::pbkdf2;
use rand::rngs::OsRng;
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroize;

use crate::config::{MasterSecret, MIN_PBKDF2_ITERATIONS};

pub const VERSION_TAG: &str = "v1:";
pub const IV_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;

/// Application-wide PBKDF2 salt. Fixed so any record can be opened with the
/// master secret alone.
const KDF_SALT: &[u8] = b"forprompt-api-key-encryption-salt-v1";

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
    #[error("base64 decoding failed: {0}")]
    Base64(String),
    #[error("authentication tag mismatch")]
    Authentication,
    #[error("decrypted value is not valid utf-8: {0}")]
    Utf8(String),
}

/// A stored value after the single parse step. Everything downstream matches
/// on this instead of sniffing strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    V1 {
        iv: [u8; IV_LEN],
        sealed: Vec<u8>,
    },
    Legacy { bytes: Vec<u8> },
}

impl Envelope {
    pub fn parse(stored: &str) -> Result<Self, CryptoError> {
        match stored.strip_prefix(VERSION_TAG) {
            Some(body) => {
                let raw = STANDARD
                    .decode(body.as_bytes())
                    .map_err(|e| CryptoError::Base64(format!("{e}")))?;
                if raw.len() < IV_LEN + TAG_LEN {
                    return Err(CryptoError::MalformedEnvelope(format!(
                        "expected at least {} bytes, got {}",
                        IV_LEN + TAG_LEN,
                        raw.len()
                    )));
                }
                let (iv_bytes, sealed) = raw.split_at(IV_LEN);
                let mut iv = [0u8; IV_LEN];
                iv.copy_from_slice(iv_bytes);
                Ok(Envelope::V1 {
                    iv,
                    sealed: sealed.to_vec(),
                })
            }
            None => {
                let bytes = STANDARD
                    .decode(stored.as_bytes())
                    .map_err(|e| CryptoError::Base64(format!("{e}")))?;
                Ok(Envelope::Legacy { bytes })
            }
        }
    }

    pub fn is_versioned(&self) -> bool {
        matches!(self, Envelope::V1 { .. })
    }

    /// Serialises a versioned envelope. Legacy envelopes have no encoder.
    fn encode_v1(iv: &[u8], sealed: &[u8]) -> String {
        let mut raw = Vec::with_capacity(iv.len() + sealed.len());
        raw.extend_from_slice(iv);
        raw.extend_from_slice(sealed);
        format!("{VERSION_TAG}{}", STANDARD.encode(raw))
    }
}

/// Returns true when a stored value already carries the current version tag.
pub fn has_version_tag(stored: &str) -> bool {
    stored.starts_with(VERSION_TAG)
}

/// AES-256-GCM engine keyed from the master secret. Build one per operation;
/// the derived key lives only as long as the engine.
pub struct EncryptionEngine {
    cipher: Aes256Gcm,
}

impl EncryptionEngine {
    pub fn new(secret: &MasterSecret) -> Result<Self, CryptoError> {
        Self::with_iterations(secret, MIN_PBKDF2_ITERATIONS)
    }

    pub fn with_iterations(secret: &MasterSecret, iterations: u32) -> Result<Self, CryptoError> {
        if iterations < MIN_PBKDF2_ITERATIONS {
            return Err(CryptoError::KeyDerivation(format!(
                "{iterations} iterations is below the minimum of {MIN_PBKDF2_ITERATIONS}"
            )));
        }

        let mut output = [0u8; KEY_LEN];
        pbkdf2::<Hmac<Sha256>>(secret.expose(), KDF_SALT, iterations, &mut output)
            .map_err(|e| CryptoError::KeyDerivation(format!("{e}")))?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&output));
        output.zeroize();

        Ok(Self { cipher })
    }

    /// Seals a plaintext under a fresh random IV.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let iv = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher
            .encrypt(&iv, plaintext.as_bytes())
            .map_err(|e| CryptoError::EncryptionFailed(format!("{e}")))?;
        Ok(Envelope::encode_v1(&iv, &sealed))
    }

    /// Opens either envelope format.
    pub fn decrypt(&self, stored: &str) -> Result<String, CryptoError> {
        let envelope = Envelope::parse(stored)?;
        self.open(&envelope)
    }

    pub fn open(&self, envelope: &Envelope) -> Result<String, CryptoError> {
        let bytes = match envelope {
            Envelope::V1 { iv, sealed } => self
                .cipher
                .decrypt(Nonce::from_slice(iv), sealed.as_slice())
                .map_err(|_| CryptoError::Authentication)?,
            Envelope::Legacy { bytes } => bytes.clone(),
        };
        String::from_utf8(bytes).map_err(|e| CryptoError::Utf8(format!("{e}")))
    }
}

impl fmt::Debug for EncryptionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionEngine")
            .field("cipher", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::OnceLock;

    fn engine() -> &'static EncryptionEngine {
        static ENGINE: OnceLock<EncryptionEngine> = OnceLock::new();
        ENGINE.get_or_init(|| {
            let secret =
                MasterSecret::new("test-master-secret-0123456789abcdef").expect("valid secret");
            EncryptionEngine::new(&secret).expect("derivation should succeed")
        })
    }

    #[test]
    fn encrypts_with_version_tag_and_round_trips() {
        let sealed = engine().encrypt("fp_proj_abc").expect("encryption should succeed");
        assert!(sealed.starts_with(VERSION_TAG));
        assert_eq!(engine().decrypt(&sealed).expect("decryption should succeed"), "fp_proj_abc");
    }

    #[test]
    fn layout_is_iv_ciphertext_tag() {
        let plaintext = "fp_proj_0123456789abcdefghijklmnopqrstuv";
        let sealed = engine().encrypt(plaintext).expect("encryption should succeed");
        let raw = STANDARD
            .decode(sealed.strip_prefix(VERSION_TAG).unwrap())
            .expect("body is base64");
        assert_eq!(raw.len(), IV_LEN + plaintext.len() + TAG_LEN);
    }

    #[test]
    fn every_call_uses_a_fresh_iv() {
        let a = engine().encrypt("same input").expect("encrypt");
        let b = engine().encrypt("same input").expect("encrypt");
        assert_ne!(a, b);
        let (Envelope::V1 { iv: iv_a, .. }, Envelope::V1 { iv: iv_b, .. }) =
            (Envelope::parse(&a).unwrap(), Envelope::parse(&b).unwrap())
        else {
            panic!("expected versioned envelopes");
        };
        assert_ne!(iv_a, iv_b);
    }

    #[test]
    fn reads_legacy_base64() {
        let legacy = STANDARD.encode("fp_proj_legacyvalue");
        let envelope = Envelope::parse(&legacy).expect("legacy parses");
        assert!(!envelope.is_versioned());
        assert_eq!(engine().decrypt(&legacy).expect("legacy decodes"), "fp_proj_legacyvalue");
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let sealed = engine().encrypt("fp_proj_tamper").expect("encrypt");
        let mut raw = STANDARD.decode(sealed.strip_prefix(VERSION_TAG).unwrap()).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let forged = format!("{VERSION_TAG}{}", STANDARD.encode(raw));
        assert!(matches!(engine().decrypt(&forged), Err(CryptoError::Authentication)));
    }

    #[test]
    fn truncated_envelope_is_malformed() {
        let forged = format!("{VERSION_TAG}{}", STANDARD.encode([0u8; 20]));
        assert!(matches!(engine().decrypt(&forged), Err(CryptoError::MalformedEnvelope(_))));
    }

    #[test]
    fn non_base64_legacy_value_is_rejected() {
        assert!(matches!(engine().decrypt("not base64 at all!"), Err(CryptoError::Base64(_))));
    }

    #[test]
    fn wrong_secret_cannot_open() {
        let sealed = engine().encrypt("fp_proj_secret").expect("encrypt");
        let other = MasterSecret::new("another-master-secret-0123456789abcdef").unwrap();
        let other_engine = EncryptionEngine::new(&other).expect("derive");
        assert!(matches!(other_engine.decrypt(&sealed), Err(CryptoError::Authentication)));
    }

    #[test]
    fn refuses_low_iteration_count() {
        let secret = MasterSecret::new("m".repeat(32)).unwrap();
        let err = EncryptionEngine::with_iterations(&secret, 1_000).unwrap_err();
        assert!(matches!(err, CryptoError::KeyDerivation(_)));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn round_trips_arbitrary_strings(s in ".*") {
            let sealed = engine().encrypt(&s).unwrap();
            prop_assert_eq!(engine().decrypt(&sealed).unwrap(), s.clone());
            prop_assert_eq!(engine().decrypt(&STANDARD.encode(&s)).unwrap(), s);
        }
    }
}
