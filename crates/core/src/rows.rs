use serde::{Deserialize, Serialize};

use crate::catalog;
use crate::error::CoreError;
use crate::field_value::{FieldMap, FieldValue};
use crate::ids::{CustomRowId, NaturalKey, OperatorId, RowKey};

/// Read-only snapshot of one priced item from the authoritative dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseRow {
    pub key: NaturalKey,
    pub fields: FieldMap,
}

impl BaseRow {
    pub fn new(key: NaturalKey, fields: FieldMap) -> Self {
        Self { key, fields }
    }

    /// Build a row whose natural key is derived from its own attributes.
    pub fn from_fields(fields: FieldMap) -> Result<Self, CoreError> {
        let key = catalog::derive_natural_key(&fields)?;
        Ok(Self { key, fields })
    }
}

/// Locally-known deviation from a [`BaseRow`], keyed by natural key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideEntry {
    pub key: NaturalKey,
    pub fields: FieldMap,
    pub version: u64,
    /// Milliseconds since Unix epoch.
    pub last_updated_at: u64,
    pub last_updated_by: OperatorId,
}

/// A fully user-owned row. Never merged with a base row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomRow {
    pub id: CustomRowId,
    pub fields: FieldMap,
    pub version: u64,
    pub last_updated_at: u64,
    pub last_updated_by: OperatorId,
}

/// Where a rendered row came from. Dispatched once when rows are merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowOrigin {
    Base(NaturalKey),
    Override(NaturalKey),
    Custom(CustomRowId),
}

impl RowOrigin {
    pub fn row_key(&self) -> RowKey {
        match self {
            Self::Base(key) | Self::Override(key) => RowKey::Base(key.clone()),
            Self::Custom(id) => RowKey::Custom(*id),
        }
    }
}

/// The value the table renders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedRow {
    /// Render-only id. May be regenerated; never used to key overrides.
    pub display_id: String,
    pub origin: RowOrigin,
    pub fields: FieldMap,
    pub version: u64,
    /// Pre-override values, only for fields the override actually changed.
    pub original_values: FieldMap,
    pub last_updated_at: Option<u64>,
    pub last_updated_by: Option<OperatorId>,
}

impl MergedRow {
    pub fn is_overridden(&self) -> bool {
        matches!(self.origin, RowOrigin::Override(_))
    }

    pub fn is_custom(&self) -> bool {
        matches!(self.origin, RowOrigin::Custom(_))
    }

    pub fn row_key(&self) -> RowKey {
        self.origin.row_key()
    }

    pub fn get(&self, field_key: &str) -> &FieldValue {
        self.fields.get(field_key).unwrap_or(&FieldValue::Unset)
    }
}

/// Overlay `entry` onto `base`. Pure: the same inputs always give the same row.
pub fn merge_row(base: &BaseRow, entry: Option<&OverrideEntry>) -> MergedRow {
    let display_id = format!("base:{}", base.key);
    let Some(entry) = entry else {
        return MergedRow {
            display_id,
            origin: RowOrigin::Base(base.key.clone()),
            fields: base.fields.clone(),
            version: 0,
            original_values: FieldMap::new(),
            last_updated_at: None,
            last_updated_by: None,
        };
    };

    let mut fields = base.fields.clone();
    let mut original_values = FieldMap::new();
    for (key, value) in &entry.fields {
        let previous = base.fields.get(key).cloned().unwrap_or(FieldValue::Unset);
        if previous != *value {
            original_values.insert(key.clone(), previous);
        }
        fields.insert(key.clone(), value.clone());
    }

    MergedRow {
        display_id,
        origin: RowOrigin::Override(base.key.clone()),
        fields,
        version: entry.version,
        original_values,
        last_updated_at: Some(entry.last_updated_at),
        last_updated_by: Some(entry.last_updated_by.clone()),
    }
}

/// Custom rows pass through verbatim.
pub fn custom_row(row: &CustomRow) -> MergedRow {
    MergedRow {
        display_id: format!("custom:{}", row.id),
        origin: RowOrigin::Custom(row.id),
        fields: row.fields.clone(),
        version: row.version,
        original_values: FieldMap::new(),
        last_updated_at: Some(row.last_updated_at),
        last_updated_by: Some(row.last_updated_by.clone()),
    }
}

/// blake3 digest over the msgpack encoding of `rows`.
pub fn fingerprint(rows: &[MergedRow]) -> Result<[u8; 32], CoreError> {
    let bytes = rmp_serde::to_vec(rows).map_err(|e| CoreError::Serialization(e.to_string()))?;
    Ok(*blake3::hash(&bytes).as_bytes())
}
