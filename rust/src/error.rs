//! Crate-level error that callers of [`crate::service::KeyService`] see.

use thiserror::Error;

use crate::config::ConfigError;
use crate::crypto::passwords::PasswordError;
use crate::crypto::CryptoError;
use crate::migration::MigrationError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("migration error: {0}")]
    Migration(#[from] MigrationError),
    #[error("password error: {0}")]
    Password(#[from] PasswordError),
}

impl KeyError {
    /// Configuration problems are fatal and must never be retried or masked.
    pub fn is_config(&self) -> bool {
        matches!(self, KeyError::Config(_))
    }
}
