use pricebook_core::{CustomRow, CustomRowId, FieldMap, NaturalKey, OperatorId, OverrideEntry, RowKey};

use crate::error::StorageError;

/// Authoritative state of one row as the backend sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSnapshot {
    /// 0 when the row has never been written.
    pub version: u64,
    /// Stored field values. Empty when the row carries no override, e.g.
    /// after a revert.
    pub fields: FieldMap,
    pub updated_by: Option<OperatorId>,
    pub updated_at: Option<u64>,
}

impl ServerSnapshot {
    pub fn unversioned() -> Self {
        Self {
            version: 0,
            fields: FieldMap::new(),
            updated_by: None,
            updated_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The write landed; the snapshot reflects the new state.
    Committed(ServerSnapshot),
    /// `captured_version` was stale. Nothing was written.
    Conflict(ServerSnapshot),
}

/// Persistence contract the edit pipeline writes through. Implementations
/// must be atomic per row and must report a conflict instead of
/// overwriting when the captured version is stale.
pub trait PricingBackend {
    /// Current authoritative version for `row`. `Ok(None)` means the backend
    /// has no version-check capability and the pre-check should be skipped.
    fn check_version(&self, row: &RowKey) -> Result<Option<ServerSnapshot>, StorageError>;

    fn write(
        &mut self,
        row: &RowKey,
        fields: &FieldMap,
        captured_version: u64,
    ) -> Result<WriteOutcome, StorageError>;

    /// Clear the override entry for `key`. The row keeps a field-less
    /// tombstone with a bumped version, so versions never repeat. Returns
    /// the row's version afterwards; 0 when it was never written.
    fn revert(&mut self, key: &NaturalKey) -> Result<u64, StorageError>;

    /// Remove a custom row. Removing a missing row succeeds.
    fn delete_custom(&mut self, id: CustomRowId) -> Result<(), StorageError>;

    fn insert_custom(&mut self, fields: &FieldMap) -> Result<CustomRow, StorageError>;

    /// Every override entry, tombstones included as entries without fields.
    fn load_overrides(&self) -> Result<Vec<OverrideEntry>, StorageError>;

    fn load_custom_rows(&self) -> Result<Vec<CustomRow>, StorageError>;
}

/// One entry of the backend's append-only write history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub row: RowKey,
    pub version: u64,
    pub fields: FieldMap,
    pub written_at: u64,
    pub written_by: OperatorId,
}
