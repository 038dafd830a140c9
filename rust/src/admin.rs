//! Administrative read path: masked listings for the dashboard, and full-key
//! reveal behind an operator passphrase.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use zeroize::Zeroize;

use crate::crypto::passwords::{self, PasswordError};
use crate::crypto::EncryptionEngine;
use crate::error::KeyError;
use crate::key;
use crate::record::{KeyRecord, OwnerId};
use crate::service::KeyService;
use crate::store::{KeyStore, StoreError};

const UNREADABLE: &str = "[unreadable]";

/// Masked view of a stored key, safe to show in listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaskedKey {
    pub owner_id: OwnerId,
    pub masked: String,
    pub indexed: bool,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
}

/// Proof that the caller passed the operator passphrase check. Only
/// [`AdminAuthority::authorize`] creates one, and each reveal consumes one.
pub struct RevealGrant {
    _private: (),
}

impl fmt::Debug for RevealGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RevealGrant")
    }
}

pub struct AdminAuthority {
    passphrase_hash: String,
}

impl AdminAuthority {
    /// `passphrase_hash` is an Argon2 PHC string, usually from config.
    pub fn new(passphrase_hash: impl Into<String>) -> Result<Self, PasswordError> {
        let passphrase_hash = passphrase_hash.into();
        passwords::validate_hash(&passphrase_hash)?;
        Ok(Self { passphrase_hash })
    }

    pub fn authorize(&self, passphrase: &str) -> Option<RevealGrant> {
        if passwords::verify_passphrase(passphrase, &self.passphrase_hash) {
            Some(RevealGrant { _private: () })
        } else {
            warn!("reveal authorization rejected");
            None
        }
    }
}

impl<S: KeyStore> KeyService<S> {
    /// Masked view of every stored key, in owner order.
    pub fn masked_keys(&self) -> Result<Vec<MaskedKey>, KeyError> {
        let engine = self.engine()?;
        let mut listing = Vec::new();
        let mut after: Option<OwnerId> = None;
        loop {
            let page = self.store().page(after.as_ref(), self.migration_batch_size())?;
            let Some(last) = page.last() else {
                break;
            };
            after = Some(last.owner_id.clone());
            listing.extend(page.iter().map(|record| masked_view(&engine, record)));
        }
        Ok(listing)
    }

    pub fn masked_key(&self, owner_id: &OwnerId) -> Result<MaskedKey, KeyError> {
        let engine = self.engine()?;
        let record = self
            .store()
            .get(owner_id)?
            .ok_or_else(|| StoreError::NotFound(owner_id.clone()))?;
        Ok(masked_view(&engine, &record))
    }

    /// Returns the full plaintext key. This is the only path that does.
    pub fn reveal(&self, owner_id: &OwnerId, _grant: RevealGrant) -> Result<String, KeyError> {
        let engine = self.engine()?;
        let record = self
            .store()
            .get(owner_id)?
            .ok_or_else(|| StoreError::NotFound(owner_id.clone()))?;
        let plaintext = engine.decrypt(&record.encrypted_value)?;
        info!(owner_id = %owner_id, "AUDIT project key revealed");
        Ok(plaintext)
    }
}

fn masked_view(engine: &EncryptionEngine, record: &KeyRecord) -> MaskedKey {
    let masked = match engine.decrypt(&record.encrypted_value) {
        Ok(mut plaintext) => {
            let masked = key::mask(&plaintext);
            plaintext.zeroize();
            masked
        }
        Err(err) => {
            warn!(
                owner_id = %record.owner_id,
                error = %err,
                "stored key could not be opened for display"
            );
            UNREADABLE.to_string()
        }
    };
    MaskedKey {
        owner_id: record.owner_id.clone(),
        masked,
        indexed: record.is_indexed(),
        created_at: record.created_at,
        created_by: record.created_by.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecretSource;
    use crate::store::MemoryKeyStore;

    fn service() -> KeyService<MemoryKeyStore> {
        KeyService::new(
            MemoryKeyStore::new(),
            SecretSource::Inline("admin-test-secret-0123456789abcdef00".into()),
        )
    }

    #[test]
    fn listing_never_contains_plaintext() {
        let service = service();
        let issued = service.issue(OwnerId::new("proj_list"), "user").unwrap();
        service
            .store()
            .insert(&KeyRecord::unindexed(OwnerId::new("proj_zz_broken"), "v1:%%%".into(), "user"))
            .unwrap();

        let listing = service.masked_keys().unwrap();
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0].owner_id, OwnerId::new("proj_list"));
        assert_ne!(listing[0].masked, issued.expose());
        assert!(listing[0].masked.starts_with(&issued.expose()[..12]));
        assert!(listing[0].masked.ends_with(&issued.expose()[issued.expose().len() - 4..]));
        assert_eq!(listing[1].masked, UNREADABLE);
    }

    #[test]
    fn listing_walks_every_page() {
        let service = service().with_migration_batch_size(2);
        for i in 0..5 {
            service.issue(OwnerId::new(format!("proj_{i}")), "user").unwrap();
        }

        let listing = service.masked_keys().unwrap();
        let owners: Vec<_> = listing.iter().map(|k| k.owner_id.as_str()).collect();
        assert_eq!(owners, vec!["proj_0", "proj_1", "proj_2", "proj_3", "proj_4"]);
    }

    #[test]
    fn reveal_requires_passphrase() {
        let service = service();
        let issued = service.issue(OwnerId::new("proj_reveal"), "user").unwrap();
        let hash = passwords::hash_passphrase("let-me-see").unwrap();
        let authority = AdminAuthority::new(hash).unwrap();

        assert!(authority.authorize("wrong").is_none());
        let grant = authority.authorize("let-me-see").expect("correct passphrase");
        let revealed = service.reveal(&OwnerId::new("proj_reveal"), grant).unwrap();
        assert_eq!(revealed, issued.expose());
    }

    #[test]
    fn authority_rejects_invalid_hash() {
        assert!(AdminAuthority::new("plaintext-password").is_err());
    }
}
