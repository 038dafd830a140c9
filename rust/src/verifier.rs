//! Candidate key verification.
//!
//! Lookup runs in two passes over disjoint sets. Indexed records are fetched
//! by `(prefix, hash)`. Records that have not been migrated are then scanned
//! one by one. Either way a record only matches after its stored value is
//! decrypted and compared in constant time with the candidate; a hash hit on
//! its own proves nothing.

use tracing::{debug, warn};
use zeroize::Zeroize;

use crate::crypto::fingerprint::constant_time_eq;
use crate::crypto::{EncryptionEngine, Fingerprinter, Sha256Fingerprinter};
use crate::record::{KeyRecord, OwnerId};
use crate::store::{KeyStore, StoreError};

/// Which pass produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPath {
    Indexed,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Authenticated {
        owner_id: OwnerId,
        path: MatchPath,
    },
    NoMatch,
}

impl Verdict {
    pub fn owner_id(&self) -> Option<&OwnerId> {
        match self {
            Verdict::Authenticated { owner_id, .. } => Some(owner_id),
            Verdict::NoMatch => None,
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self, Verdict::Authenticated { .. })
    }
}

pub struct Verifier<'a, S, F = Sha256Fingerprinter> {
    store: &'a S,
    engine: &'a EncryptionEngine,
    fingerprinter: F,
}

impl<'a, S: KeyStore> Verifier<'a, S> {
    pub fn new(store: &'a S, engine: &'a EncryptionEngine) -> Self {
        Self::with_fingerprinter(store, engine, Sha256Fingerprinter)
    }
}

impl<'a, S: KeyStore, F: Fingerprinter> Verifier<'a, S, F> {
    pub fn with_fingerprinter(
        store: &'a S,
        engine: &'a EncryptionEngine,
        fingerprinter: F,
    ) -> Self {
        Self {
            store,
            engine,
            fingerprinter,
        }
    }

    /// Resolves a candidate key to its owner.
    ///
    /// Storage failures are returned as errors. A record that cannot be
    /// decrypted counts as a non-match for that record only.
    pub fn verify(&self, candidate: &str) -> Result<Verdict, StoreError> {
        let key_prefix = self.fingerprinter.prefix(candidate);
        let key_hash = self.fingerprinter.hash(candidate);

        for record in self.store.by_index(&key_prefix, &key_hash)? {
            if self.matches(&record, candidate) {
                debug!(owner_id = %record.owner_id, "project key matched via index");
                return Ok(Verdict::Authenticated {
                    owner_id: record.owner_id,
                    path: MatchPath::Indexed,
                });
            }
            debug!(owner_id = %record.owner_id, "index hit did not decrypt to the candidate");
        }

        for record in self.store.legacy_records()? {
            if self.matches(&record, candidate) {
                warn!(
                    owner_id = %record.owner_id,
                    "project key matched an unindexed record; it needs migration"
                );
                return Ok(Verdict::Authenticated {
                    owner_id: record.owner_id,
                    path: MatchPath::Fallback,
                });
            }
        }

        Ok(Verdict::NoMatch)
    }

    fn matches(&self, record: &KeyRecord, candidate: &str) -> bool {
        match self.engine.decrypt(&record.encrypted_value) {
            Ok(mut plaintext) => {
                let equal = constant_time_eq(&plaintext, candidate);
                plaintext.zeroize();
                equal
            }
            Err(err) => {
                debug!(owner_id = %record.owner_id, error = %err, "stored key could not be opened");
                false
            }
        }
    }
}
