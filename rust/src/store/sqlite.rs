use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};

use super::{KeyStore, StoreError};
use crate::record::{KeyIndex, KeyRecord, MigrationPatch, OwnerId};

const COLUMNS: &str =
    "owner_id, encrypted_value, key_prefix, key_hash, created_at, updated_at, created_by";

/// SQLite-backed key store.
///
/// `(key_prefix, key_hash)` carries a plain composite index, not a unique
/// constraint. A row counts as indexed only when both columns are set.
pub struct SqliteKeyStore {
    db: Mutex<Connection>,
}

impl SqliteKeyStore {
    /// Open (or create) the key database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)
            .map_err(|e| StoreError::Backend(format!("failed to open key store: {e}")))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|e| StoreError::Backend(format!("failed to set WAL mode: {e}")))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::Backend(format!("failed to open key store: {e}")))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS project_keys (
                owner_id        TEXT PRIMARY KEY,
                encrypted_value TEXT NOT NULL,
                key_prefix      TEXT,
                key_hash        TEXT,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL,
                created_by      TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_project_keys_lookup
                ON project_keys(key_prefix, key_hash);
            ",
        )
        .map_err(|e| StoreError::Backend(format!("failed to initialize key schema: {e}")))?;

        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    fn query(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<KeyRecord>, StoreError> {
        let conn = self.db.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn
            .prepare_cached(sql)
            .map_err(|e| StoreError::Backend(format!("prepare error: {e}")))?;
        let rows = stmt
            .query_map(params, RawRow::from_row)
            .map_err(|e| StoreError::Backend(format!("query error: {e}")))?;

        let mut records = Vec::new();
        for row in rows {
            let raw = row.map_err(|e| StoreError::Backend(format!("row error: {e}")))?;
            records.push(raw.into_record()?);
        }
        Ok(records)
    }
}

struct RawRow {
    owner_id: String,
    encrypted_value: String,
    key_prefix: Option<String>,
    key_hash: Option<String>,
    created_at: String,
    updated_at: String,
    created_by: String,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            owner_id: row.get(0)?,
            encrypted_value: row.get(1)?,
            key_prefix: row.get(2)?,
            key_hash: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
            created_by: row.get(6)?,
        })
    }

    fn into_record(self) -> Result<KeyRecord, StoreError> {
        let index = match (self.key_prefix, self.key_hash) {
            (Some(key_prefix), Some(key_hash)) => Some(KeyIndex { key_prefix, key_hash }),
            (None, None) => None,
            _ => {
                tracing::warn!(
                    owner_id = %self.owner_id,
                    "key record has a partial index; treating it as unindexed"
                );
                None
            }
        };
        Ok(KeyRecord {
            created_at: parse_timestamp(&self.owner_id, &self.created_at)?,
            updated_at: parse_timestamp(&self.owner_id, &self.updated_at)?,
            owner_id: OwnerId::new(self.owner_id),
            encrypted_value: self.encrypted_value,
            index,
            created_by: self.created_by,
        })
    }
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(owner_id: &str, value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("owner {owner_id}: bad timestamp {value:?}: {e}")))
}

impl KeyStore for SqliteKeyStore {
    fn insert(&self, record: &KeyRecord) -> Result<(), StoreError> {
        if record.is_indexed() {
            return Err(StoreError::IndexedInsert(record.owner_id.clone()));
        }
        let conn = self.db.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            &format!(
                "INSERT INTO project_keys ({COLUMNS}) VALUES (?1, ?2, NULL, NULL, ?3, ?4, ?5)"
            ),
            params![
                record.owner_id.as_str(),
                record.encrypted_value,
                format_timestamp(record.created_at),
                format_timestamp(record.updated_at),
                record.created_by,
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == ErrorCode::ConstraintViolation =>
            {
                StoreError::Duplicate(record.owner_id.clone())
            }
            other => StoreError::Backend(format!("insert error: {other}")),
        })?;
        Ok(())
    }

    fn get(&self, owner_id: &OwnerId) -> Result<Option<KeyRecord>, StoreError> {
        let raw = {
            let conn = self.db.lock().unwrap_or_else(|e| e.into_inner());
            conn.query_row(
                &format!("SELECT {COLUMNS} FROM project_keys WHERE owner_id = ?1"),
                params![owner_id.as_str()],
                RawRow::from_row,
            )
            .optional()
            .map_err(|e| StoreError::Backend(format!("query error: {e}")))?
        };
        raw.map(RawRow::into_record).transpose()
    }

    fn by_index(&self, key_prefix: &str, key_hash: &str) -> Result<Vec<KeyRecord>, StoreError> {
        self.query(
            &format!("SELECT {COLUMNS} FROM project_keys WHERE key_prefix = ?1 AND key_hash = ?2"),
            &[&key_prefix, &key_hash],
        )
    }

    fn legacy_records(&self) -> Result<Vec<KeyRecord>, StoreError> {
        self.query(
            &format!(
                "SELECT {COLUMNS} FROM project_keys WHERE key_hash IS NULL OR key_prefix IS NULL"
            ),
            &[],
        )
    }

    fn page(&self, after: Option<&OwnerId>, limit: usize) -> Result<Vec<KeyRecord>, StoreError> {
        let after = after.map(OwnerId::as_str);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.query(
            &format!(
                "SELECT {COLUMNS} FROM project_keys
                 WHERE (?1 IS NULL OR owner_id > ?1)
                 ORDER BY owner_id
                 LIMIT ?2"
            ),
            &[&after, &limit],
        )
    }

    fn apply_migration(
        &self,
        owner_id: &OwnerId,
        patch: &MigrationPatch,
    ) -> Result<(), StoreError> {
        let conn = self.db.lock().unwrap_or_else(|e| e.into_inner());
        let changed = conn
            .execute(
                "UPDATE project_keys
                 SET encrypted_value = ?2, key_prefix = ?3, key_hash = ?4, updated_at = ?5
                 WHERE owner_id = ?1",
                params![
                    owner_id.as_str(),
                    patch.encrypted_value(),
                    patch.index().key_prefix,
                    patch.index().key_hash,
                    format_timestamp(patch.updated_at()),
                ],
            )
            .map_err(|e| StoreError::Backend(format!("update error: {e}")))?;
        if changed == 0 {
            return Err(StoreError::NotFound(owner_id.clone()));
        }
        Ok(())
    }

    fn delete(&self, owner_id: &OwnerId) -> Result<bool, StoreError> {
        let conn = self.db.lock().unwrap_or_else(|e| e.into_inner());
        let removed = conn
            .execute(
                "DELETE FROM project_keys WHERE owner_id = ?1",
                params![owner_id.as_str()],
            )
            .map_err(|e| StoreError::Backend(format!("delete error: {e}")))?;
        Ok(removed > 0)
    }
}
