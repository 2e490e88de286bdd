use rusqlite::Connection;

use crate::error::StorageError;

pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA busy_timeout = 5000;
    ",
    )?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);
INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, unixepoch());

CREATE TABLE IF NOT EXISTS row_versions (
    row_key TEXT PRIMARY KEY,
    kind TEXT NOT NULL CHECK (kind IN ('override', 'custom')),
    fields BLOB NOT NULL,
    version INTEGER NOT NULL CHECK (version >= 1),
    updated_at INTEGER NOT NULL,
    updated_by TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_row_versions_kind ON row_versions (kind, row_key);

CREATE TABLE IF NOT EXISTS write_log (
    rowid INTEGER PRIMARY KEY,
    row_key TEXT NOT NULL,
    version INTEGER NOT NULL,
    fields BLOB NOT NULL,
    written_at INTEGER NOT NULL,
    written_by TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_write_log_row ON write_log (row_key, version);
";
