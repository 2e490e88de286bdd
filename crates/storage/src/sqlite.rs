use rusqlite::{Connection, OptionalExtension, TransactionBehavior};

use pricebook_core::{
    clock::physical_now,
    field_value::{decode_field_map, encode_field_map},
    CustomRow, CustomRowId, FieldMap, NaturalKey, OperatorId, OverrideEntry, RowKey,
};

use crate::error::StorageError;
use crate::traits::{PricingBackend, ServerSnapshot, WriteOutcome, WriteRecord};

const KIND_OVERRIDE: &str = "override";
const KIND_CUSTOM: &str = "custom";

fn to_sql_int(v: u64, label: &str) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{label} out of range")))
}

fn from_sql_int(v: i64, label: &str) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("negative {label}")))
}

struct StoredRow {
    fields: FieldMap,
    version: u64,
    updated_at: u64,
    updated_by: OperatorId,
}

impl StoredRow {
    fn snapshot(&self) -> ServerSnapshot {
        ServerSnapshot {
            version: self.version,
            fields: self.fields.clone(),
            updated_by: Some(self.updated_by.clone()),
            updated_at: Some(self.updated_at),
        }
    }
}

fn read_stored(conn: &Connection, row_key: &str) -> Result<Option<StoredRow>, StorageError> {
    let raw = conn
        .query_row(
            "SELECT fields, version, updated_at, updated_by FROM row_versions WHERE row_key = ?1",
            rusqlite::params![row_key],
            |row| {
                let fields: Vec<u8> = row.get(0)?;
                let version: i64 = row.get(1)?;
                let updated_at: i64 = row.get(2)?;
                let updated_by: String = row.get(3)?;
                Ok((fields, version, updated_at, updated_by))
            },
        )
        .optional()?;

    match raw {
        None => Ok(None),
        Some((fields, version, updated_at, updated_by)) => Ok(Some(StoredRow {
            fields: decode_field_map(&fields)?,
            version: from_sql_int(version, "version")?,
            updated_at: from_sql_int(updated_at, "updated_at")?,
            updated_by: OperatorId::new(updated_by),
        })),
    }
}

/// Reference backend over SQLite. Several instances (one per operator) may
/// open the same database file; each write runs in an immediate transaction
/// so the version compare-and-set is atomic per row.
pub struct SqliteBackend {
    conn: Connection,
    operator: OperatorId,
    version_check: bool,
}

impl SqliteBackend {
    pub fn open(path: &str, operator: OperatorId) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self {
            conn,
            operator,
            version_check: true,
        })
    }

    pub fn open_in_memory(operator: OperatorId) -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self {
            conn,
            operator,
            version_check: true,
        })
    }

    /// Behave like a backend without a version-check endpoint.
    pub fn without_version_check(mut self) -> Self {
        self.version_check = false;
        self
    }

    pub fn operator(&self) -> &OperatorId {
        &self.operator
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Current state of `row`, ignoring the version-check setting.
    pub fn snapshot(&self, row: &RowKey) -> Result<ServerSnapshot, StorageError> {
        Ok(read_stored(&self.conn, &row.storage_key())?
            .map(|stored| stored.snapshot())
            .unwrap_or_else(ServerSnapshot::unversioned))
    }

    /// Every successful write to `row`, oldest first.
    pub fn write_history(&self, row: &RowKey) -> Result<Vec<WriteRecord>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT version, fields, written_at, written_by FROM write_log WHERE row_key = ?1 ORDER BY rowid",
        )?;
        let rows = stmt.query_map(rusqlite::params![row.storage_key()], |r| {
            let version: i64 = r.get(0)?;
            let fields: Vec<u8> = r.get(1)?;
            let written_at: i64 = r.get(2)?;
            let written_by: String = r.get(3)?;
            Ok((version, fields, written_at, written_by))
        })?;

        let mut result = Vec::new();
        for row_result in rows {
            let (version, fields, written_at, written_by) = row_result?;
            result.push(WriteRecord {
                row: row.clone(),
                version: from_sql_int(version, "version")?,
                fields: decode_field_map(&fields)?,
                written_at: from_sql_int(written_at, "written_at")?,
                written_by: OperatorId::new(written_by),
            });
        }
        Ok(result)
    }

    pub fn write_count(&self) -> Result<u64, StorageError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM write_log", [], |row| row.get(0))?;
        from_sql_int(count, "count")
    }
}

impl PricingBackend for SqliteBackend {
    fn check_version(&self, row: &RowKey) -> Result<Option<ServerSnapshot>, StorageError> {
        if !self.version_check {
            return Ok(None);
        }
        self.snapshot(row).map(Some)
    }

    fn write(
        &mut self,
        row: &RowKey,
        fields: &FieldMap,
        captured_version: u64,
    ) -> Result<WriteOutcome, StorageError> {
        let row_key = row.storage_key();
        let now = physical_now()?;
        let kind = if row.is_custom() { KIND_CUSTOM } else { KIND_OVERRIDE };

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let stored = read_stored(&tx, &row_key)?;
        if stored.is_none() && row.is_custom() {
            return Err(StorageError::NotFound(row_key));
        }
        let current = stored
            .as_ref()
            .map(StoredRow::snapshot)
            .unwrap_or_else(ServerSnapshot::unversioned);

        if current.version != captured_version {
            tracing::debug!(
                row = %row_key,
                captured_version,
                server_version = current.version,
                "rejecting stale write"
            );
            // Dropping the transaction rolls it back.
            return Ok(WriteOutcome::Conflict(current));
        }

        let mut merged = stored.map(|s| s.fields).unwrap_or_default();
        for (key, value) in fields {
            merged.insert(key.clone(), value.clone());
        }
        let version = captured_version + 1;

        tx.execute(
            "INSERT INTO row_versions (row_key, kind, fields, version, updated_at, updated_by)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(row_key) DO UPDATE SET
                fields = excluded.fields,
                version = excluded.version,
                updated_at = excluded.updated_at,
                updated_by = excluded.updated_by",
            rusqlite::params![
                row_key,
                kind,
                encode_field_map(&merged)?,
                to_sql_int(version, "version")?,
                to_sql_int(now, "updated_at")?,
                self.operator.as_str(),
            ],
        )?;
        tx.execute(
            "INSERT INTO write_log (row_key, version, fields, written_at, written_by) VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                row_key,
                to_sql_int(version, "version")?,
                encode_field_map(fields)?,
                to_sql_int(now, "written_at")?,
                self.operator.as_str(),
            ],
        )?;
        tx.commit()?;

        tracing::debug!(row = %row_key, version, operator = %self.operator, "write committed");
        Ok(WriteOutcome::Committed(ServerSnapshot {
            version,
            fields: merged,
            updated_by: Some(self.operator.clone()),
            updated_at: Some(now),
        }))
    }

    fn revert(&mut self, key: &NaturalKey) -> Result<u64, StorageError> {
        let row_key = RowKey::Base(key.clone()).storage_key();
        let now = physical_now()?;

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let Some(stored) = read_stored(&tx, &row_key)? else {
            return Ok(0);
        };
        if stored.fields.is_empty() {
            return Ok(stored.version);
        }

        let version = stored.version + 1;
        tx.execute(
            "UPDATE row_versions SET fields = ?2, version = ?3, updated_at = ?4, updated_by = ?5
             WHERE row_key = ?1 AND kind = ?6",
            rusqlite::params![
                row_key,
                encode_field_map(&FieldMap::new())?,
                to_sql_int(version, "version")?,
                to_sql_int(now, "updated_at")?,
                self.operator.as_str(),
                KIND_OVERRIDE,
            ],
        )?;
        tx.commit()?;

        tracing::debug!(row = %row_key, version, "override reverted to tombstone");
        Ok(version)
    }

    fn delete_custom(&mut self, id: CustomRowId) -> Result<(), StorageError> {
        let row_key = RowKey::Custom(id).storage_key();
        self.conn.execute(
            "DELETE FROM row_versions WHERE row_key = ?1 AND kind = ?2",
            rusqlite::params![row_key, KIND_CUSTOM],
        )?;
        Ok(())
    }

    fn insert_custom(&mut self, fields: &FieldMap) -> Result<CustomRow, StorageError> {
        let id = CustomRowId::new();
        let row_key = RowKey::Custom(id).storage_key();
        let now = physical_now()?;
        let version = 1u64;

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO row_versions (row_key, kind, fields, version, updated_at, updated_by) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                row_key,
                KIND_CUSTOM,
                encode_field_map(fields)?,
                to_sql_int(version, "version")?,
                to_sql_int(now, "updated_at")?,
                self.operator.as_str(),
            ],
        )?;
        tx.execute(
            "INSERT INTO write_log (row_key, version, fields, written_at, written_by) VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                row_key,
                to_sql_int(version, "version")?,
                encode_field_map(fields)?,
                to_sql_int(now, "written_at")?,
                self.operator.as_str(),
            ],
        )?;
        tx.commit()?;

        Ok(CustomRow {
            id,
            fields: fields.clone(),
            version,
            last_updated_at: now,
            last_updated_by: self.operator.clone(),
        })
    }

    fn load_overrides(&self) -> Result<Vec<OverrideEntry>, StorageError> {
        let mut result = Vec::new();
        for (row, stored) in self.load_kind(KIND_OVERRIDE)? {
            match row {
                RowKey::Base(key) => result.push(OverrideEntry {
                    key,
                    fields: stored.fields,
                    version: stored.version,
                    last_updated_at: stored.updated_at,
                    last_updated_by: stored.updated_by,
                }),
                RowKey::Custom(id) => {
                    return Err(StorageError::Serialization(format!(
                        "custom row {id} stored as override"
                    )));
                }
            }
        }
        Ok(result)
    }

    fn load_custom_rows(&self) -> Result<Vec<CustomRow>, StorageError> {
        let mut result = Vec::new();
        for (row, stored) in self.load_kind(KIND_CUSTOM)? {
            match row {
                RowKey::Custom(id) => result.push(CustomRow {
                    id,
                    fields: stored.fields,
                    version: stored.version,
                    last_updated_at: stored.updated_at,
                    last_updated_by: stored.updated_by,
                }),
                RowKey::Base(key) => {
                    return Err(StorageError::Serialization(format!(
                        "override {key} stored as custom row"
                    )));
                }
            }
        }
        Ok(result)
    }
}

impl SqliteBackend {
    fn load_kind(&self, kind: &str) -> Result<Vec<(RowKey, StoredRow)>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT row_key, fields, version, updated_at, updated_by FROM row_versions WHERE kind = ?1 ORDER BY row_key",
        )?;
        let rows = stmt.query_map(rusqlite::params![kind], |row| {
            let row_key: String = row.get(0)?;
            let fields: Vec<u8> = row.get(1)?;
            let version: i64 = row.get(2)?;
            let updated_at: i64 = row.get(3)?;
            let updated_by: String = row.get(4)?;
            Ok((row_key, fields, version, updated_at, updated_by))
        })?;

        let mut result = Vec::new();
        for row_result in rows {
            let (row_key, fields, version, updated_at, updated_by) = row_result?;
            result.push((
                RowKey::parse_storage_key(&row_key)?,
                StoredRow {
                    fields: decode_field_map(&fields)?,
                    version: from_sql_int(version, "version")?,
                    updated_at: from_sql_int(updated_at, "updated_at")?,
                    updated_by: OperatorId::new(updated_by),
                },
            ));
        }
        Ok(result)
    }
}
