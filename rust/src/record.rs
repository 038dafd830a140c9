//! Persisted project key records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque reference to the entity (project) a key authenticates.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OwnerId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Lookup fields written by the migration runner. Prefix and hash travel
/// together so a record can never hold one without the other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyIndex {
    pub key_prefix: String,
    pub key_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRecord {
    pub owner_id: OwnerId,
    /// `v1:` envelope or legacy base64. The only persisted form of the key.
    pub encrypted_value: String,
    /// Set only by the migration runner, through a [`MigrationPatch`].
    pub(crate) index: Option<KeyIndex>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: String,
}

impl KeyRecord {
    /// A record as written at issuance time: encrypted, not yet indexed.
    pub fn unindexed(
        owner_id: OwnerId,
        encrypted_value: String,
        created_by: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            owner_id,
            encrypted_value,
            index: None,
            created_at: now,
            updated_at: now,
            created_by: created_by.into(),
        }
    }

    pub fn index(&self) -> Option<&KeyIndex> {
        self.index.as_ref()
    }

    pub fn is_indexed(&self) -> bool {
        self.index.is_some()
    }
}

/// The single update a migration applies to a record. Only the migration
/// runner can build one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationPatch {
    encrypted_value: String,
    index: KeyIndex,
    updated_at: DateTime<Utc>,
}

impl MigrationPatch {
    pub(crate) fn new(encrypted_value: String, index: KeyIndex) -> Self {
        Self {
            encrypted_value,
            index,
            updated_at: Utc::now(),
        }
    }

    pub fn encrypted_value(&self) -> &str {
        &self.encrypted_value
    }

    pub fn index(&self) -> &KeyIndex {
        &self.index
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Applies the patch to an in-memory record, leaving owner and creation
    /// fields untouched.
    pub fn apply_to(&self, record: &mut KeyRecord) {
        record.encrypted_value = self.encrypted_value.clone();
        record.index = Some(self.index.clone());
        record.updated_at = self.updated_at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_preserves_owner_and_creation_fields() {
        let mut record = KeyRecord::unindexed(OwnerId::new("proj_1"), "djE=".into(), "user_1");
        let created_at = record.created_at;
        let patch = MigrationPatch::new(
            "v1:abc".into(),
            KeyIndex {
                key_prefix: "fp_proj_".into(),
                key_hash: "00".repeat(32),
            },
        );

        patch.apply_to(&mut record);

        assert_eq!(record.owner_id, OwnerId::new("proj_1"));
        assert_eq!(record.created_at, created_at);
        assert_eq!(record.created_by, "user_1");
        assert_eq!(record.encrypted_value, "v1:abc");
        assert!(record.is_indexed());
    }

    #[test]
    fn serializes_with_camel_case_fields() {
        let record = KeyRecord::unindexed(OwnerId::new("proj_2"), "djE=".into(), "user_2");
        let value = serde_json::to_value(&record).expect("record serializes");
        assert_eq!(value["ownerId"], "proj_2");
        assert_eq!(value["encryptedValue"], "djE=");
        assert!(value["index"].is_null());
    }
}
