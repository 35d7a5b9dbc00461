//! SQLite-backed identifier-keyed history store
//!
//! All record families share one `device_history` table, partitioned by `kind`.
//! A store handle is bound to one kind; `for_kind` reuses the same connection.

use super::types::{HistoryEntry, HistoryKind};
use crate::alias::error::StoreError;
use crate::fanout::DeviceHistoryStore;
use crate::sqlite_pragma::apply_optimized_pragmas;
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS device_history (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    kind        TEXT NOT NULL,
    record_id   TEXT NOT NULL,
    device_uid  TEXT NOT NULL,
    event_time  INTEGER NOT NULL,
    payload     TEXT NOT NULL,
    UNIQUE(kind, record_id)
);

CREATE INDEX IF NOT EXISTS idx_device_history_uid_time
    ON device_history(kind, device_uid, event_time DESC);
"#;

pub struct SqliteHistoryStore {
    conn: Arc<Mutex<Connection>>,
    kind: HistoryKind,
}

impl SqliteHistoryStore {
    pub fn open(db_path: impl AsRef<Path>, kind: HistoryKind) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;
        apply_optimized_pragmas(&conn)?;
        Self::from_connection(conn, kind)
    }

    pub fn open_in_memory(kind: HistoryKind) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?, kind)
    }

    fn from_connection(conn: Connection, kind: HistoryKind) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            kind,
        })
    }

    /// Handle for another record family over the same connection
    pub fn for_kind(&self, kind: HistoryKind) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
            kind,
        }
    }

    pub fn kind(&self) -> HistoryKind {
        self.kind
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Store an entry; replays of the same `(kind, record_id)` are ignored
    ///
    /// Returns true if a row was inserted.
    pub fn append(&self, entry: &HistoryEntry) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let payload = serde_json::to_string(&entry.payload)?;

        let inserted = conn.execute(
            "INSERT OR IGNORE INTO device_history
                (kind, record_id, device_uid, event_time, payload)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.kind.as_str(),
                entry.record_id,
                entry.device_uid,
                entry.event_time,
                payload,
            ],
        )?;

        Ok(inserted > 0)
    }
}

#[async_trait]
impl DeviceHistoryStore for SqliteHistoryStore {
    type Item = HistoryEntry;

    /// Runs on the blocking pool; shards of one fan-out share the connection and
    /// are served one at a time, each under its own deadline
    async fn query_by_device_uid(
        &self,
        device_uid: &str,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, StoreError> {
        let conn = Arc::clone(&self.conn);
        let kind = self.kind;
        let device_uid = device_uid.to_string();

        tokio::task::spawn_blocking(move || -> Result<Vec<HistoryEntry>, StoreError> {
            let conn = conn.lock().map_err(|_| StoreError::LockPoisoned)?;
            let mut stmt = conn.prepare_cached(
                "SELECT record_id, device_uid, event_time, payload
                 FROM device_history
                 WHERE kind = ?1 AND device_uid = ?2
                 ORDER BY event_time DESC, record_id ASC
                 LIMIT ?3",
            )?;

            let rows = stmt.query_map(params![kind.as_str(), device_uid, limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?;

            let mut entries = Vec::new();
            for row in rows {
                let (record_id, device_uid, event_time, payload) = row?;
                entries.push(HistoryEntry {
                    kind,
                    record_id,
                    device_uid,
                    event_time,
                    payload: serde_json::from_str(&payload)?,
                });
            }

            Ok(entries)
        })
        .await
        .map_err(|e| StoreError::Database(format!("SQLite task failed: {}", e)))?
    }

    fn store_name(&self) -> &'static str {
        self.kind.as_str()
    }
}
