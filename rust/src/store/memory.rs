use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Mutex;

use super::{KeyStore, StoreError};
use crate::record::{KeyRecord, MigrationPatch, OwnerId};

/// In-process store keyed by owner id. Used by tests and single-shot tooling.
#[derive(Default)]
pub struct MemoryKeyStore {
    records: Mutex<BTreeMap<OwnerId, KeyRecord>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyStore for MemoryKeyStore {
    fn insert(&self, record: &KeyRecord) -> Result<(), StoreError> {
        if record.is_indexed() {
            return Err(StoreError::IndexedInsert(record.owner_id.clone()));
        }
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        if records.contains_key(&record.owner_id) {
            return Err(StoreError::Duplicate(record.owner_id.clone()));
        }
        records.insert(record.owner_id.clone(), record.clone());
        Ok(())
    }

    fn get(&self, owner_id: &OwnerId) -> Result<Option<KeyRecord>, StoreError> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Ok(records.get(owner_id).cloned())
    }

    fn by_index(&self, key_prefix: &str, key_hash: &str) -> Result<Vec<KeyRecord>, StoreError> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Ok(records
            .values()
            .filter(|r| {
                r.index
                    .as_ref()
                    .is_some_and(|i| i.key_prefix == key_prefix && i.key_hash == key_hash)
            })
            .cloned()
            .collect())
    }

    fn legacy_records(&self) -> Result<Vec<KeyRecord>, StoreError> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Ok(records.values().filter(|r| r.index.is_none()).cloned().collect())
    }

    fn page(&self, after: Option<&OwnerId>, limit: usize) -> Result<Vec<KeyRecord>, StoreError> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let lower = match after {
            Some(owner_id) => Bound::Excluded(owner_id.clone()),
            None => Bound::Unbounded,
        };
        Ok(records
            .range((lower, Bound::Unbounded))
            .take(limit)
            .map(|(_, r)| r.clone())
            .collect())
    }

    fn apply_migration(
        &self,
        owner_id: &OwnerId,
        patch: &MigrationPatch,
    ) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let record = records
            .get_mut(owner_id)
            .ok_or_else(|| StoreError::NotFound(owner_id.clone()))?;
        patch.apply_to(record);
        Ok(())
    }

    fn delete(&self, owner_id: &OwnerId) -> Result<bool, StoreError> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Ok(records.remove(owner_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn satisfies_store_contract() {
        let store = MemoryKeyStore::new();
        crate::store::check_store_contract(&store);
        assert_eq!(store.len(), 2);
    }
}
