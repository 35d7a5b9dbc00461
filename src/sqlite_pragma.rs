//! Shared SQLite connection tuning
//!
//! Applied to every connection opened by the alias and history stores.

use rusqlite::Connection;
use std::time::Duration;

/// WAL + NORMAL sync, in-memory temp tables, mmap, larger page cache, busy timeout
pub fn apply_optimized_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    log::debug!("SQLite journal_mode={}", mode);

    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.pragma_update(None, "mmap_size", 268_435_456i64)?;
    conn.pragma_update(None, "cache_size", -64_000i64)?;
    conn.pragma_update(None, "wal_autocheckpoint", 1000i64)?;
    conn.busy_timeout(Duration::from_secs(5))?;

    Ok(())
}
