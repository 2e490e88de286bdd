use std::collections::{BTreeMap, BTreeSet};

use pricebook_core::rows::{custom_row, fingerprint, merge_row};
use pricebook_core::{
    BaseRow, CustomRow, CustomRowId, FieldMap, FieldValue, MergedRow, NaturalKey, OperatorId,
    OverrideEntry, RowKey,
};
use pricebook_storage::ServerSnapshot;

use crate::error::EngineError;

/// Base rows, the override entries layered over them, and custom rows.
///
/// Overrides are keyed by natural key only, so reloading or reordering the
/// base dataset never reattaches an override to the wrong row. An override
/// whose base row is absent is kept but not rendered. A reverted row keeps
/// its tombstone version so the next edit is captured against it.
#[derive(Debug, Default)]
pub struct OverrideStore {
    base: Vec<BaseRow>,
    base_index: BTreeMap<NaturalKey, usize>,
    overrides: BTreeMap<NaturalKey, OverrideEntry>,
    tombstones: BTreeMap<NaturalKey, u64>,
    custom: BTreeMap<CustomRowId, CustomRow>,
}

impl OverrideStore {
    pub fn new(base: Vec<BaseRow>) -> Result<Self, EngineError> {
        let mut store = Self::default();
        store.set_base(base)?;
        Ok(store)
    }

    pub fn with_entries(
        base: Vec<BaseRow>,
        overrides: Vec<OverrideEntry>,
        custom_rows: Vec<CustomRow>,
    ) -> Result<Self, EngineError> {
        let mut store = Self::new(base)?;
        for entry in overrides {
            if entry.fields.is_empty() {
                store.tombstones.insert(entry.key, entry.version);
            } else {
                store.overrides.insert(entry.key.clone(), entry);
            }
        }
        for row in custom_rows {
            store.custom.insert(row.id, row);
        }
        Ok(store)
    }

    /// Replace the base dataset. Overrides are untouched.
    pub fn set_base(&mut self, base: Vec<BaseRow>) -> Result<(), EngineError> {
        let mut index = BTreeMap::new();
        for (i, row) in base.iter().enumerate() {
            if index.insert(row.key.clone(), i).is_some() {
                return Err(EngineError::DuplicateRow(row.key.to_string()));
            }
        }
        self.base = base;
        self.base_index = index;
        Ok(())
    }

    /// Base rows in dataset order with overrides applied, then custom rows.
    pub fn merged(&self) -> Vec<MergedRow> {
        let mut rows: Vec<MergedRow> = self
            .base
            .iter()
            .map(|base| merge_row(base, self.overrides.get(&base.key)))
            .collect();
        rows.extend(self.custom.values().map(custom_row));
        rows
    }

    pub fn merged_row(&self, row: &RowKey) -> Option<MergedRow> {
        match row {
            RowKey::Base(key) => self
                .base_row(key)
                .map(|base| merge_row(base, self.overrides.get(key))),
            RowKey::Custom(id) => self.custom.get(id).map(custom_row),
        }
    }

    pub fn fingerprint(&self) -> Result<[u8; 32], EngineError> {
        Ok(fingerprint(&self.merged())?)
    }

    pub fn contains(&self, row: &RowKey) -> bool {
        match row {
            RowKey::Base(key) => self.base_index.contains_key(key),
            RowKey::Custom(id) => self.custom.contains_key(id),
        }
    }

    /// Version an edit made now would be captured at. `None` for unknown rows.
    pub fn version_of(&self, row: &RowKey) -> Option<u64> {
        match row {
            RowKey::Base(key) if self.base_index.contains_key(key) => Some(
                self.overrides
                    .get(key)
                    .map(|e| e.version)
                    .or_else(|| self.tombstones.get(key).copied())
                    .unwrap_or(0),
            ),
            RowKey::Base(_) => None,
            RowKey::Custom(id) => self.custom.get(id).map(|r| r.version),
        }
    }

    /// The rendered value of one field.
    pub fn value_of(&self, row: &RowKey, field_key: &str) -> FieldValue {
        match row {
            RowKey::Base(key) => self
                .overrides
                .get(key)
                .and_then(|e| e.fields.get(field_key))
                .or_else(|| self.base_row(key).and_then(|b| b.fields.get(field_key)))
                .cloned()
                .unwrap_or(FieldValue::Unset),
            RowKey::Custom(id) => self
                .custom
                .get(id)
                .and_then(|r| r.fields.get(field_key))
                .cloned()
                .unwrap_or(FieldValue::Unset),
        }
    }

    /// Value from the base dataset alone, ignoring any override.
    pub fn base_value(&self, key: &NaturalKey, field_key: &str) -> FieldValue {
        self.base_row(key)
            .and_then(|b| b.fields.get(field_key))
            .cloned()
            .unwrap_or(FieldValue::Unset)
    }

    pub fn base_row(&self, key: &NaturalKey) -> Option<&BaseRow> {
        self.base_index.get(key).map(|&i| &self.base[i])
    }

    pub fn override_entry(&self, key: &NaturalKey) -> Option<&OverrideEntry> {
        self.overrides.get(key)
    }

    pub fn custom_row(&self, id: CustomRowId) -> Option<&CustomRow> {
        self.custom.get(&id)
    }

    pub fn overrides(&self) -> impl Iterator<Item = &OverrideEntry> {
        self.overrides.values()
    }

    /// Overrides with no matching base row.
    pub fn orphaned(&self) -> Vec<&NaturalKey> {
        self.overrides
            .keys()
            .filter(|k| !self.base_index.contains_key(*k))
            .collect()
    }

    /// Fields whose rendered value differs from what `snapshot` renders.
    /// A field the snapshot omits renders as its base value.
    pub fn diverged_fields(&self, row: &RowKey, snapshot: &ServerSnapshot) -> BTreeSet<String> {
        let local = match row {
            RowKey::Base(key) => self.overrides.get(key).map(|e| &e.fields),
            RowKey::Custom(id) => self.custom.get(id).map(|r| &r.fields),
        };
        local
            .into_iter()
            .flat_map(|fields| fields.keys())
            .chain(snapshot.fields.keys())
            .filter(|field| {
                let server = match (snapshot.fields.get(*field), row) {
                    (Some(value), _) => value.clone(),
                    (None, RowKey::Base(key)) => self.base_value(key, field),
                    (None, RowKey::Custom(_)) => FieldValue::Unset,
                };
                self.value_of(row, field) != server
            })
            .cloned()
            .collect()
    }

    /// Apply a committed batch. The entry takes the snapshot's merged fields,
    /// or overlays `fields` when the backend returned none, along with the
    /// committed version and attribution. Returns false when the row is a
    /// custom row that no longer exists locally.
    pub fn apply_commit(
        &mut self,
        row: &RowKey,
        fields: &FieldMap,
        snapshot: &ServerSnapshot,
        operator: &OperatorId,
        now_ms: u64,
    ) -> bool {
        let updated_by = snapshot.updated_by.clone().unwrap_or_else(|| operator.clone());
        let updated_at = snapshot.updated_at.unwrap_or(now_ms);
        match row {
            RowKey::Base(key) => {
                let entry = self.overrides.entry(key.clone()).or_insert_with(|| OverrideEntry {
                    key: key.clone(),
                    fields: FieldMap::new(),
                    version: 0,
                    last_updated_at: updated_at,
                    last_updated_by: updated_by.clone(),
                });
                commit_fields(&mut entry.fields, fields, snapshot);
                entry.version = snapshot.version;
                entry.last_updated_at = updated_at;
                entry.last_updated_by = updated_by;
                self.tombstones.remove(key);
                true
            }
            RowKey::Custom(id) => match self.custom.get_mut(id) {
                Some(custom) => {
                    commit_fields(&mut custom.fields, fields, snapshot);
                    custom.version = snapshot.version;
                    custom.last_updated_at = updated_at;
                    custom.last_updated_by = updated_by;
                    true
                }
                None => {
                    tracing::warn!(row = %row, "commit for a custom row that is no longer present");
                    false
                }
            },
        }
    }

    /// Replace local state for `row` with what the server holds. A base row
    /// snapshot without fields removes the override, keeping its version as
    /// a tombstone; version 0 removes the row's state entirely.
    pub fn adopt(&mut self, row: &RowKey, snapshot: &ServerSnapshot, operator: &OperatorId, now_ms: u64) {
        let updated_by = snapshot.updated_by.clone().unwrap_or_else(|| operator.clone());
        let updated_at = snapshot.updated_at.unwrap_or(now_ms);
        match row {
            RowKey::Base(key) if snapshot.version == 0 => {
                self.overrides.remove(key);
                self.tombstones.remove(key);
            }
            RowKey::Base(key) if snapshot.fields.is_empty() => {
                self.overrides.remove(key);
                self.tombstones.insert(key.clone(), snapshot.version);
            }
            RowKey::Base(key) => {
                self.tombstones.remove(key);
                self.overrides.insert(
                    key.clone(),
                    OverrideEntry {
                        key: key.clone(),
                        fields: snapshot.fields.clone(),
                        version: snapshot.version,
                        last_updated_at: updated_at,
                        last_updated_by: updated_by,
                    },
                );
            }
            RowKey::Custom(id) if snapshot.version == 0 => {
                self.custom.remove(id);
            }
            RowKey::Custom(id) => {
                self.custom.insert(
                    *id,
                    CustomRow {
                        id: *id,
                        fields: snapshot.fields.clone(),
                        version: snapshot.version,
                        last_updated_at: updated_at,
                        last_updated_by: updated_by,
                    },
                );
            }
        }
    }

    /// Remove the override for `key`, restoring the base row. `version` is
    /// the tombstone version the backend reported.
    pub fn revert(&mut self, key: &NaturalKey, version: u64) -> Option<OverrideEntry> {
        if version > 0 {
            self.tombstones.insert(key.clone(), version);
        }
        self.overrides.remove(key)
    }

    pub fn add_custom(&mut self, row: CustomRow) -> Result<(), EngineError> {
        if self.custom.contains_key(&row.id) {
            return Err(EngineError::DuplicateRow(row.id.to_string()));
        }
        self.custom.insert(row.id, row);
        Ok(())
    }

    pub fn delete_custom(&mut self, id: CustomRowId) -> Option<CustomRow> {
        self.custom.remove(&id)
    }
}

/// Last write wins per field. `Unset` is stored, not dropped, so an
/// explicit clear survives a merge.
fn commit_fields(target: &mut FieldMap, fields: &FieldMap, snapshot: &ServerSnapshot) {
    if !snapshot.fields.is_empty() {
        target.clone_from(&snapshot.fields);
        return;
    }
    for (key, value) in fields {
        target.insert(key.clone(), value.clone());
    }
}
