//! Storage for project key records.
//!
//! Verification only ever asks two disjoint questions: which indexed records
//! share a `(prefix, hash)` pair, and which records have no index yet. There
//! is no unfiltered scan on the request path; `page` exists for the migration
//! runner, which walks the whole table in owner order.

mod memory;
mod sqlite;

pub use memory::MemoryKeyStore;
pub use sqlite::SqliteKeyStore;

use thiserror::Error;

use crate::record::{KeyRecord, MigrationPatch, OwnerId};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("a key already exists for owner {0}")]
    Duplicate(OwnerId),
    #[error("new key record for owner {0} already carries an index")]
    IndexedInsert(OwnerId),
    #[error("no key record for owner {0}")]
    NotFound(OwnerId),
    #[error("corrupt key record: {0}")]
    Corrupt(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

pub trait KeyStore {
    /// Stores a new record. Each owner has at most one, and it must not be
    /// indexed yet; only [`KeyStore::apply_migration`] writes the index.
    fn insert(&self, record: &KeyRecord) -> Result<(), StoreError>;

    fn get(&self, owner_id: &OwnerId) -> Result<Option<KeyRecord>, StoreError>;

    /// Indexed records whose prefix and hash both match. Collisions are
    /// possible, so this can return more than one record.
    fn by_index(&self, key_prefix: &str, key_hash: &str) -> Result<Vec<KeyRecord>, StoreError>;

    /// Records that have not been indexed yet.
    fn legacy_records(&self) -> Result<Vec<KeyRecord>, StoreError>;

    /// Up to `limit` records ordered by owner id, starting after `after`.
    fn page(&self, after: Option<&OwnerId>, limit: usize) -> Result<Vec<KeyRecord>, StoreError>;

    /// Rewrites the envelope, index, and `updated_at` of one record in a
    /// single update.
    fn apply_migration(&self, owner_id: &OwnerId, patch: &MigrationPatch) -> Result<(), StoreError>;

    /// Removes the record when its owner is deleted. Returns whether a record existed.
    fn delete(&self, owner_id: &OwnerId) -> Result<bool, StoreError>;
}

impl<S: KeyStore + ?Sized> KeyStore for &S {
    fn insert(&self, record: &KeyRecord) -> Result<(), StoreError> {
        (**self).insert(record)
    }

    fn get(&self, owner_id: &OwnerId) -> Result<Option<KeyRecord>, StoreError> {
        (**self).get(owner_id)
    }

    fn by_index(&self, key_prefix: &str, key_hash: &str) -> Result<Vec<KeyRecord>, StoreError> {
        (**self).by_index(key_prefix, key_hash)
    }

    fn legacy_records(&self) -> Result<Vec<KeyRecord>, StoreError> {
        (**self).legacy_records()
    }

    fn page(&self, after: Option<&OwnerId>, limit: usize) -> Result<Vec<KeyRecord>, StoreError> {
        (**self).page(after, limit)
    }

    fn apply_migration(
        &self,
        owner_id: &OwnerId,
        patch: &MigrationPatch,
    ) -> Result<(), StoreError> {
        (**self).apply_migration(owner_id, patch)
    }

    fn delete(&self, owner_id: &OwnerId) -> Result<bool, StoreError> {
        (**self).delete(owner_id)
    }
}

/// Behaviour every backend must share. Each backend's test module runs this
/// against a fresh store.
#[cfg(test)]
pub(crate) fn check_store_contract<S: KeyStore>(store: &S) {
    use crate::record::KeyIndex;

    let legacy = KeyRecord::unindexed(OwnerId::new("proj_a"), "ZnBfcHJval9h".into(), "user_1");
    let indexed_owner = OwnerId::new("proj_b");
    let indexed = KeyRecord::unindexed(indexed_owner.clone(), "ZnBfcHJval9i".into(), "user_1");
    let third = KeyRecord::unindexed(OwnerId::new("proj_c"), "ZnBfcHJval9j".into(), "user_2");

    let mut pre_indexed =
        KeyRecord::unindexed(OwnerId::new("proj_forged"), "ZnBfcHJval9m".into(), "user_3");
    pre_indexed.index = Some(KeyIndex {
        key_prefix: "fp_proj_".into(),
        key_hash: "00".repeat(32),
    });
    assert!(matches!(store.insert(&pre_indexed), Err(StoreError::IndexedInsert(_))));
    assert!(store.get(&OwnerId::new("proj_forged")).expect("get").is_none());
    assert!(store.by_index("fp_proj_", &"00".repeat(32)).expect("by_index").is_empty());

    store.insert(&legacy).expect("insert legacy");
    store.insert(&indexed).expect("insert second");
    store.insert(&third).expect("insert third");
    assert!(matches!(store.insert(&legacy), Err(StoreError::Duplicate(_))));

    let index = KeyIndex {
        key_prefix: "fp_proj_".into(),
        key_hash: "ab".repeat(32),
    };
    let patch = MigrationPatch::new("v1:c2VhbGVk".into(), index.clone());
    store
        .apply_migration(&indexed_owner, &patch)
        .expect("patch existing record");
    assert!(matches!(
        store.apply_migration(&OwnerId::new("missing"), &patch),
        Err(StoreError::NotFound(_))
    ));

    let fetched = store.get(&indexed_owner).expect("get").expect("record exists");
    assert_eq!(fetched.encrypted_value, "v1:c2VhbGVk");
    assert_eq!(fetched.index, Some(index.clone()));
    assert_eq!(fetched.created_at, indexed.created_at);
    assert_eq!(fetched.created_by, "user_1");
    assert!(store.get(&OwnerId::new("missing")).expect("get").is_none());

    let hits = store.by_index(&index.key_prefix, &index.key_hash).expect("by_index");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].owner_id, indexed_owner);
    assert!(store.by_index("fp_proj_", &"cd".repeat(32)).expect("by_index").is_empty());

    let mut legacy_owners: Vec<_> = store
        .legacy_records()
        .expect("legacy_records")
        .into_iter()
        .map(|r| r.owner_id)
        .collect();
    legacy_owners.sort();
    assert_eq!(legacy_owners, vec![OwnerId::new("proj_a"), OwnerId::new("proj_c")]);

    let first_page = store.page(None, 2).expect("page");
    assert_eq!(
        first_page.iter().map(|r| r.owner_id.as_str()).collect::<Vec<_>>(),
        vec!["proj_a", "proj_b"]
    );
    let second_page = store.page(Some(&first_page[1].owner_id), 2).expect("page");
    assert_eq!(second_page.len(), 1);
    assert_eq!(second_page[0].owner_id.as_str(), "proj_c");

    assert!(store.delete(&OwnerId::new("proj_c")).expect("delete"));
    assert!(!store.delete(&OwnerId::new("proj_c")).expect("delete again"));
    assert_eq!(store.page(None, 10).expect("page").len(), 2);
}
