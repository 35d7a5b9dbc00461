//! SQLite-backed alias store
//!
//! Tables:
//! - `device_aliases` - one row per serial number; UNIQUE index on `device_uid` doubles
//!   as the reverse lookup and keeps a current UID on at most one serial
//! - `device_alias_tombstones` - one row per merged-away source serial
//!
//! `previous_device_uids` is stored as a JSON array. Lookups by a retired UID go through
//! `json_each`, which is a scan; they only happen on the resolve fallback path.

use super::error::StoreError;
use super::store::AliasStore;
use super::types::{AliasRecord, MergeTombstone, WriteOutcome};
use crate::sqlite_pragma::apply_optimized_pragmas;
use async_trait::async_trait;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS device_aliases (
    serial_number         TEXT PRIMARY KEY,
    device_uid            TEXT NOT NULL,
    previous_device_uids  TEXT NOT NULL DEFAULT '[]',
    created_at            INTEGER NOT NULL,
    updated_at            INTEGER NOT NULL,
    version               INTEGER NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_device_aliases_device_uid
    ON device_aliases(device_uid);

CREATE INDEX IF NOT EXISTS idx_device_aliases_updated
    ON device_aliases(updated_at DESC);

CREATE TABLE IF NOT EXISTS device_alias_tombstones (
    source_serial       TEXT PRIMARY KEY,
    target_serial       TEXT NOT NULL,
    merged_device_uids  TEXT NOT NULL,
    merged_at           INTEGER NOT NULL
);
"#;

const SELECT_COLUMNS: &str =
    "serial_number, device_uid, previous_device_uids, created_at, updated_at, version";

/// Raw row before the JSON history column is decoded
struct AliasRow {
    serial_number: String,
    device_uid: String,
    previous_json: String,
    created_at: i64,
    updated_at: i64,
    version: i64,
}

impl AliasRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            serial_number: row.get(0)?,
            device_uid: row.get(1)?,
            previous_json: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
            version: row.get(5)?,
        })
    }

    fn into_record(self) -> Result<AliasRecord, StoreError> {
        Ok(AliasRecord {
            serial_number: self.serial_number,
            device_uid: self.device_uid,
            previous_device_uids: serde_json::from_str(&self.previous_json)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
            version: self.version as u64,
        })
    }
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

/// Whether a serial other than `serial_number` holds `device_uid`, current or retired
fn claimed_elsewhere(
    conn: &Connection,
    device_uid: &str,
    serial_number: &str,
) -> Result<bool, StoreError> {
    let claimed: i64 = conn.query_row(
        "SELECT EXISTS (
             SELECT 1 FROM device_aliases
             WHERE serial_number != ?2
               AND (device_uid = ?1 OR EXISTS (
                   SELECT 1 FROM json_each(device_aliases.previous_device_uids)
                   WHERE json_each.value = ?1
               ))
         )",
        params![device_uid, serial_number],
        |row| row.get(0),
    )?;
    Ok(claimed != 0)
}

fn query_one(conn: &Connection, sql: &str, key: &str) -> Result<Option<AliasRecord>, StoreError> {
    let row = conn
        .query_row(sql, params![key], AliasRow::from_row)
        .optional()?;
    row.map(AliasRow::into_record).transpose()
}

/// Alias store over a single shared SQLite connection
///
/// Every call runs on the blocking pool so a caller's deadline can fire while a
/// statement waits on a locked database.
#[derive(Debug)]
pub struct SqliteAliasStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAliasStore {
    /// Open (or create) the database file and ensure the schema exists
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Database(format!(
                        "Failed to create database directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let conn = Connection::open(db_path.as_ref())?;
        apply_optimized_pragmas(&conn)?;
        let store = Self::from_connection(conn)?;

        log::info!(
            "✅ Alias store initialized: {}",
            db_path.as_ref().display()
        );
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| StoreError::LockPoisoned)?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Database(format!("SQLite task failed: {}", e)))?
    }
}

impl Clone for SqliteAliasStore {
    fn clone(&self) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
        }
    }
}

#[async_trait]
impl AliasStore for SqliteAliasStore {
    async fn get_by_serial(&self, serial_number: &str) -> Result<Option<AliasRecord>, StoreError> {
        let serial_number = serial_number.to_string();
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {} FROM device_aliases WHERE serial_number = ?1",
                SELECT_COLUMNS
            );
            query_one(conn, &sql, &serial_number)
        })
        .await
    }

    async fn get_by_device_uid(&self, device_uid: &str) -> Result<Option<AliasRecord>, StoreError> {
        let device_uid = device_uid.to_string();
        self.with_conn(move |conn| {
            let current_sql = format!(
                "SELECT {} FROM device_aliases WHERE device_uid = ?1",
                SELECT_COLUMNS
            );
            if let Some(record) = query_one(conn, &current_sql, &device_uid)? {
                return Ok(Some(record));
            }

            let retired_sql = format!(
                "SELECT {} FROM device_aliases
                 WHERE EXISTS (
                     SELECT 1 FROM json_each(device_aliases.previous_device_uids)
                     WHERE json_each.value = ?1
                 )
                 ORDER BY updated_at DESC
                 LIMIT 1",
                SELECT_COLUMNS
            );
            query_one(conn, &retired_sql, &device_uid)
        })
        .await
    }

    async fn insert_if_absent(&self, record: &AliasRecord) -> Result<WriteOutcome, StoreError> {
        let record = record.clone();
        self.with_conn(move |conn| {
            let previous_json = serde_json::to_string(&record.previous_device_uids)?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let exists: i64 = tx.query_row(
                "SELECT EXISTS (SELECT 1 FROM device_aliases WHERE serial_number = ?1)",
                params![record.serial_number],
                |row| row.get(0),
            )?;
            if exists != 0 {
                return Ok(WriteOutcome::Conflict);
            }
            if claimed_elsewhere(&tx, &record.device_uid, &record.serial_number)? {
                return Err(StoreError::DuplicateDeviceUid(record.device_uid.clone()));
            }

            let result = tx.execute(
                "INSERT INTO device_aliases (
                    serial_number, device_uid, previous_device_uids,
                    created_at, updated_at, version
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.serial_number,
                    record.device_uid,
                    previous_json,
                    record.created_at,
                    record.updated_at,
                    record.version as i64,
                ],
            );

            match result {
                Ok(_) => {
                    tx.commit()?;
                    Ok(WriteOutcome::Applied)
                }
                Err(e) if is_constraint_violation(&e) => {
                    Err(StoreError::DuplicateDeviceUid(record.device_uid.clone()))
                }
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn compare_and_swap(
        &self,
        expected: &AliasRecord,
        updated: &AliasRecord,
    ) -> Result<WriteOutcome, StoreError> {
        let expected = expected.clone();
        let updated = updated.clone();
        self.with_conn(move |conn| {
            let previous_json = serde_json::to_string(&updated.previous_device_uids)?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            if claimed_elsewhere(&tx, &updated.device_uid, &updated.serial_number)? {
                return Err(StoreError::DuplicateDeviceUid(updated.device_uid.clone()));
            }

            let result = tx.execute(
                "UPDATE device_aliases
                 SET device_uid = ?1,
                     previous_device_uids = ?2,
                     updated_at = ?3,
                     version = ?4
                 WHERE serial_number = ?5 AND device_uid = ?6 AND version = ?7",
                params![
                    updated.device_uid,
                    previous_json,
                    updated.updated_at,
                    updated.version as i64,
                    expected.serial_number,
                    expected.device_uid,
                    expected.version as i64,
                ],
            );

            match result {
                Ok(0) => Ok(WriteOutcome::Conflict),
                Ok(_) => {
                    tx.commit()?;
                    Ok(WriteOutcome::Applied)
                }
                Err(e) if is_constraint_violation(&e) => {
                    Err(StoreError::DuplicateDeviceUid(updated.device_uid.clone()))
                }
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn delete_merged(
        &self,
        expected: &AliasRecord,
        tombstone: &MergeTombstone,
    ) -> Result<WriteOutcome, StoreError> {
        let expected = expected.clone();
        let tombstone = tombstone.clone();
        self.with_conn(move |conn| {
            let merged_json = serde_json::to_string(&tombstone.merged_device_uids)?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let deleted = tx.execute(
                "DELETE FROM device_aliases
                 WHERE serial_number = ?1 AND device_uid = ?2 AND version = ?3",
                params![
                    expected.serial_number,
                    expected.device_uid,
                    expected.version as i64
                ],
            )?;

            if deleted == 0 {
                // Dropping the transaction rolls it back
                return Ok(WriteOutcome::Conflict);
            }

            tx.execute(
                "INSERT OR REPLACE INTO device_alias_tombstones (
                    source_serial, target_serial, merged_device_uids, merged_at
                 ) VALUES (?1, ?2, ?3, ?4)",
                params![
                    tombstone.source_serial,
                    tombstone.target_serial,
                    merged_json,
                    tombstone.merged_at,
                ],
            )?;
            tx.commit()?;

            Ok(WriteOutcome::Applied)
        })
        .await
    }

    async fn get_tombstone(&self, source_serial: &str) -> Result<Option<MergeTombstone>, StoreError> {
        let source_serial = source_serial.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT source_serial, target_serial, merged_device_uids, merged_at
                     FROM device_alias_tombstones WHERE source_serial = ?1",
                    params![source_serial],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, i64>(3)?,
                        ))
                    },
                )
                .optional()?;

            match row {
                Some((source_serial, target_serial, merged_json, merged_at)) => {
                    Ok(Some(MergeTombstone {
                        source_serial,
                        target_serial,
                        merged_device_uids: serde_json::from_str(&merged_json)?,
                        merged_at,
                    }))
                }
                None => Ok(None),
            }
        })
        .await
    }

    async fn list(&self, limit: usize) -> Result<Vec<AliasRecord>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM device_aliases
                 ORDER BY updated_at DESC, serial_number ASC
                 LIMIT ?1",
                SELECT_COLUMNS
            ))?;

            let rows = stmt.query_map(params![limit as i64], AliasRow::from_row)?;

            let mut records = Vec::new();
            for row in rows {
                records.push(row?.into_record()?);
            }
            Ok(records)
        })
        .await
    }

    fn backend_type(&self) -> &'static str {
        "SQLite"
    }
}
