//! Request-scoped entry point for the key subsystem.
//!
//! Every operation resolves the master secret and derives a fresh engine
//! before it touches the store, so a missing or short secret fails before any
//! I/O. Nothing derived from the secret outlives the call.

use std::fmt;

use tracing::info;
use zeroize::Zeroize;

use crate::config::{SecretSource, ServiceConfig, MIN_PBKDF2_ITERATIONS};
use crate::crypto::EncryptionEngine;
use crate::error::KeyError;
use crate::key;
use crate::migration::{
    MigrationCheck, MigrationReport, MigrationRunner, RecordOutcome, DEFAULT_BATCH_SIZE,
};
use crate::record::{KeyRecord, OwnerId};
use crate::store::KeyStore;
use crate::verifier::{Verdict, Verifier};

/// A freshly issued key. The plaintext is only available here, once.
pub struct IssuedKey {
    pub owner_id: OwnerId,
    plaintext: String,
}

impl IssuedKey {
    pub fn expose(&self) -> &str {
        &self.plaintext
    }
}

impl fmt::Debug for IssuedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedKey")
            .field("owner_id", &self.owner_id)
            .field("plaintext", &key::mask(&self.plaintext))
            .finish()
    }
}

impl Drop for IssuedKey {
    fn drop(&mut self) {
        self.plaintext.zeroize();
    }
}

pub struct KeyService<S> {
    store: S,
    secret: SecretSource,
    pbkdf2_iterations: u32,
    migration_batch_size: usize,
}

impl<S: KeyStore> KeyService<S> {
    pub fn new(store: S, secret: SecretSource) -> Self {
        Self {
            store,
            secret,
            pbkdf2_iterations: MIN_PBKDF2_ITERATIONS,
            migration_batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn from_config(store: S, config: &ServiceConfig) -> Self {
        Self {
            store,
            secret: config.secret_source(),
            pbkdf2_iterations: config.pbkdf2_iterations,
            migration_batch_size: config.migration_batch_size,
        }
    }

    pub fn with_migration_batch_size(mut self, batch_size: usize) -> Self {
        self.migration_batch_size = batch_size.max(1);
        self
    }

    /// Page size for migration and any other walk over the whole table.
    pub fn migration_batch_size(&self) -> usize {
        self.migration_batch_size
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Resolves the secret and derives an engine for one operation.
    pub fn engine(&self) -> Result<EncryptionEngine, KeyError> {
        let secret = self.secret.resolve()?;
        Ok(EncryptionEngine::with_iterations(&secret, self.pbkdf2_iterations)?)
    }

    /// Generates and stores a key for `owner_id`. The record starts without an
    /// index; run the migration for the owner to index it immediately.
    pub fn issue(&self, owner_id: OwnerId, created_by: &str) -> Result<IssuedKey, KeyError> {
        let engine = self.engine()?;
        let plaintext = key::generate();
        let record =
            KeyRecord::unindexed(owner_id.clone(), engine.encrypt(&plaintext)?, created_by);
        self.store.insert(&record)?;
        info!(owner_id = %owner_id, created_by, "project key issued");
        Ok(IssuedKey { owner_id, plaintext })
    }

    pub fn verify(&self, candidate: &str) -> Result<Verdict, KeyError> {
        let engine = self.engine()?;
        Ok(Verifier::new(&self.store, &engine).verify(candidate)?)
    }

    pub fn migrate_all(&self) -> Result<MigrationReport, KeyError> {
        let engine = self.engine()?;
        Ok(self.runner(&engine).migrate_all()?)
    }

    pub fn migrate_owner(&self, owner_id: &OwnerId) -> Result<RecordOutcome, KeyError> {
        let engine = self.engine()?;
        Ok(self.runner(&engine).migrate_owner(owner_id)?)
    }

    pub fn verify_migration(&self, owner_id: Option<&OwnerId>) -> Result<MigrationCheck, KeyError> {
        let engine = self.engine()?;
        Ok(self.runner(&engine).verify_migration(owner_id)?)
    }

    /// Cascade hook for when the owning entity is deleted.
    pub fn delete(&self, owner_id: &OwnerId) -> Result<bool, KeyError> {
        let removed = self.store.delete(owner_id)?;
        if removed {
            info!(owner_id = %owner_id, "project key deleted with its owner");
        }
        Ok(removed)
    }

    fn runner<'a>(&'a self, engine: &'a EncryptionEngine) -> MigrationRunner<'a, S> {
        MigrationRunner::new(&self.store, engine).batch_size(self.migration_batch_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;
    use crate::store::MemoryKeyStore;
    use crate::verifier::MatchPath;

    fn service() -> KeyService<MemoryKeyStore> {
        KeyService::new(
            MemoryKeyStore::new(),
            SecretSource::Inline("service-test-secret-0123456789abcdef".into()),
        )
    }

    #[test]
    fn issued_key_verifies_before_and_after_indexing() {
        let service = service();
        let issued = service.issue(OwnerId::new("proj_1"), "user_1").expect("issue");
        let stored = service.store().get(&OwnerId::new("proj_1")).unwrap().unwrap();
        assert!(stored.encrypted_value.starts_with("v1:"));
        assert!(stored.index.is_none());

        let before = service.verify(issued.expose()).expect("verify");
        assert_eq!(
            before,
            Verdict::Authenticated {
                owner_id: OwnerId::new("proj_1"),
                path: MatchPath::Fallback,
            }
        );

        assert_eq!(service.migrate_owner(&issued.owner_id).unwrap(), RecordOutcome::Migrated);
        let after = service.verify(issued.expose()).expect("verify");
        assert_eq!(
            after,
            Verdict::Authenticated {
                owner_id: OwnerId::new("proj_1"),
                path: MatchPath::Indexed,
            }
        );
    }

    #[test]
    fn one_key_per_owner() {
        let service = service();
        service.issue(OwnerId::new("proj_1"), "user_1").expect("first issue");
        let err = service.issue(OwnerId::new("proj_1"), "user_1").unwrap_err();
        assert!(matches!(err, KeyError::Store(_)));
    }

    #[test]
    fn short_secret_fails_every_operation() {
        let service = KeyService::new(MemoryKeyStore::new(), SecretSource::Inline("x".repeat(20)));
        for err in [
            service.verify("fp_proj_anything").unwrap_err(),
            service.issue(OwnerId::new("p"), "u").map(|_| ()).unwrap_err(),
            service.migrate_all().map(|_| ()).unwrap_err(),
        ] {
            assert!(matches!(err, KeyError::Config(ConfigError::SecretTooShort(20))));
        }
        assert!(service.store().is_empty());
    }

    #[test]
    fn issued_key_debug_is_masked() {
        let service = service();
        let issued = service.issue(OwnerId::new("proj_dbg"), "user").unwrap();
        assert!(!format!("{issued:?}").contains(issued.expose()));
    }

    #[test]
    fn delete_removes_record() {
        let service = service();
        service.issue(OwnerId::new("proj_del"), "user").unwrap();
        assert!(service.delete(&OwnerId::new("proj_del")).unwrap());
        assert!(!service.delete(&OwnerId::new("proj_del")).unwrap());
    }
}
