//! Upgrades stored keys to the `v1:` envelope and fills in their lookup index.
//!
//! A record is current once it has an index and a versioned envelope; current
//! records are skipped, which makes repeated runs no-ops and lets an
//! interrupted run resume where it stopped. Every record is patched with its
//! own single update, so one bad record never blocks the rest of the batch.

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info};
use zeroize::Zeroize;

use crate::crypto::envelope::has_version_tag;
use crate::crypto::fingerprint::constant_time_eq;
use crate::crypto::{CryptoError, EncryptionEngine, Fingerprinter, Sha256Fingerprinter};
use crate::key;
use crate::record::{KeyIndex, KeyRecord, MigrationPatch, OwnerId};
use crate::store::{KeyStore, StoreError};

pub const DEFAULT_BATCH_SIZE: usize = 200;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("decrypted value for owner {0} is not a project key; inspect manually")]
    InvalidShape(OwnerId),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub total: usize,
    pub migrated: usize,
    pub skipped: usize,
    pub errored: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Migrated,
    Skipped,
}

/// Result of re-deriving the index of a migrated record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationCheck {
    Consistent(OwnerId),
    Inconsistent(OwnerId),
    NotMigrated(OwnerId),
    NothingMigrated,
}

pub struct MigrationRunner<'a, S, F = Sha256Fingerprinter> {
    store: &'a S,
    engine: &'a EncryptionEngine,
    fingerprinter: F,
    batch_size: usize,
}

impl<'a, S: KeyStore> MigrationRunner<'a, S> {
    pub fn new(store: &'a S, engine: &'a EncryptionEngine) -> Self {
        Self::with_fingerprinter(store, engine, Sha256Fingerprinter)
    }
}

impl<'a, S: KeyStore, F: Fingerprinter> MigrationRunner<'a, S, F> {
    pub fn with_fingerprinter(
        store: &'a S,
        engine: &'a EncryptionEngine,
        fingerprinter: F,
    ) -> Self {
        Self {
            store,
            engine,
            fingerprinter,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Walks every record in owner order and migrates the ones that need it.
    ///
    /// Only a failure to read a page aborts the run; per-record failures are
    /// logged and counted.
    pub fn migrate_all(&self) -> Result<MigrationReport, StoreError> {
        let mut report = MigrationReport::default();
        let mut after: Option<OwnerId> = None;

        loop {
            let page = self.store.page(after.as_ref(), self.batch_size)?;
            let Some(last) = page.last() else {
                break;
            };
            after = Some(last.owner_id.clone());

            for record in &page {
                report.total += 1;
                match self.migrate_record(record) {
                    Ok(RecordOutcome::Migrated) => report.migrated += 1,
                    Ok(RecordOutcome::Skipped) => report.skipped += 1,
                    Err(err) => {
                        error!(
                            owner_id = %record.owner_id,
                            error = %err,
                            "project key migration failed"
                        );
                        report.errored += 1;
                    }
                }
            }

            info!(
                processed = report.total,
                batch = page.len(),
                "project key migration batch done"
            );
            if page.len() < self.batch_size {
                break;
            }
        }

        info!(
            total = report.total,
            migrated = report.migrated,
            skipped = report.skipped,
            errored = report.errored,
            "project key migration finished"
        );
        Ok(report)
    }

    /// Migrates a single owner's record.
    pub fn migrate_owner(&self, owner_id: &OwnerId) -> Result<RecordOutcome, MigrationError> {
        let record = self
            .store
            .get(owner_id)?
            .ok_or_else(|| StoreError::NotFound(owner_id.clone()))?;
        self.migrate_record(&record)
    }

    fn migrate_record(&self, record: &KeyRecord) -> Result<RecordOutcome, MigrationError> {
        if is_current(record) {
            return Ok(RecordOutcome::Skipped);
        }

        let mut plaintext = self.engine.decrypt(&record.encrypted_value)?;
        if !key::has_valid_shape(&plaintext) {
            plaintext.zeroize();
            return Err(MigrationError::InvalidShape(record.owner_id.clone()));
        }

        let sealed = self.engine.encrypt(&plaintext);
        let index = KeyIndex {
            key_prefix: self.fingerprinter.prefix(&plaintext),
            key_hash: self.fingerprinter.hash(&plaintext),
        };
        plaintext.zeroize();

        self.store
            .apply_migration(&record.owner_id, &MigrationPatch::new(sealed?, index))?;
        debug!(owner_id = %record.owner_id, "project key migrated");
        Ok(RecordOutcome::Migrated)
    }

    /// Decrypts a migrated record and checks that its stored prefix and hash
    /// still describe the plaintext. With no owner given, the first migrated
    /// record in owner order is checked.
    pub fn verify_migration(
        &self,
        owner_id: Option<&OwnerId>,
    ) -> Result<MigrationCheck, MigrationError> {
        let record = match owner_id {
            Some(owner_id) => self
                .store
                .get(owner_id)?
                .ok_or_else(|| StoreError::NotFound(owner_id.clone()))?,
            None => match self.first_indexed()? {
                Some(record) => record,
                None => return Ok(MigrationCheck::NothingMigrated),
            },
        };

        let Some(index) = record.index.as_ref() else {
            return Ok(MigrationCheck::NotMigrated(record.owner_id));
        };

        let mut plaintext = self.engine.decrypt(&record.encrypted_value)?;
        let consistent = has_version_tag(&record.encrypted_value)
            && constant_time_eq(&self.fingerprinter.hash(&plaintext), &index.key_hash)
            && self.fingerprinter.prefix(&plaintext) == index.key_prefix;
        plaintext.zeroize();

        if consistent {
            Ok(MigrationCheck::Consistent(record.owner_id))
        } else {
            error!(owner_id = %record.owner_id, "stored index does not match decrypted key");
            Ok(MigrationCheck::Inconsistent(record.owner_id))
        }
    }

    fn first_indexed(&self) -> Result<Option<KeyRecord>, StoreError> {
        let mut after: Option<OwnerId> = None;
        loop {
            let page = self.store.page(after.as_ref(), self.batch_size)?;
            let Some(last) = page.last() else {
                return Ok(None);
            };
            after = Some(last.owner_id.clone());
            let exhausted = page.len() < self.batch_size;
            if let Some(record) = page.into_iter().find(KeyRecord::is_indexed) {
                return Ok(Some(record));
            }
            if exhausted {
                return Ok(None);
            }
        }
    }
}

fn is_current(record: &KeyRecord) -> bool {
    record.index.is_some() && has_version_tag(&record.encrypted_value)
}
