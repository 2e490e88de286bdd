use std::collections::BTreeMap;

use pricebook_core::{FieldMap, FieldValue, OperatorId, RowKey};
use pricebook_storage::ServerSnapshot;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// One field whose pending value was written against a stale version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionConflict {
    pub row: RowKey,
    pub field_key: String,
    pub local_version: u64,
    pub server_version: u64,
    pub server_updated_by: Option<OperatorId>,
    pub server_updated_at: Option<u64>,
    pub pending_value: FieldValue,
    pub server_value: FieldValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    /// Re-issue the pending values against the server's version.
    Overwrite,
    /// Drop the pending values. Local state is left as it was.
    Discard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictState {
    NoConflict,
    Conflicted,
}

/// Everything held for one conflicted row until the operator decides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowConflict {
    pub row: RowKey,
    pub local_version: u64,
    pub server: ServerSnapshot,
    /// The batch that was refused.
    pub pending: FieldMap,
    /// One entry per pending field, in field-key order.
    pub fields: Vec<VersionConflict>,
}

impl RowConflict {
    pub fn field(&self, field_key: &str) -> Option<&VersionConflict> {
        self.fields.iter().find(|c| c.field_key == field_key)
    }
}

/// A conflict removed from the resolver along with the operator's choice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConflict {
    pub conflict: RowConflict,
    pub resolution: Resolution,
}

#[derive(Debug, Default)]
pub struct ConflictResolver {
    conflicts: BTreeMap<RowKey, RowConflict>,
}

impl ConflictResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `pending` was refused because the server is at
    /// `server.version`. `authoritative` supplies a field's server-side value
    /// when the snapshot carries none, e.g. the base value for a field the
    /// server override never touched. Replaces any earlier conflict on `row`.
    pub fn raise(
        &mut self,
        row: &RowKey,
        local_version: u64,
        pending: FieldMap,
        server: ServerSnapshot,
        authoritative: impl Fn(&str) -> FieldValue,
    ) -> &RowConflict {
        let fields = pending
            .iter()
            .map(|(key, value)| VersionConflict {
                row: row.clone(),
                field_key: key.clone(),
                local_version,
                server_version: server.version,
                server_updated_by: server.updated_by.clone(),
                server_updated_at: server.updated_at,
                pending_value: value.clone(),
                server_value: server
                    .fields
                    .get(key)
                    .cloned()
                    .unwrap_or_else(|| authoritative(key)),
            })
            .collect();

        tracing::info!(
            row = %row,
            local = local_version,
            server = server.version,
            fields = pending.len(),
            "conflict raised"
        );

        self.conflicts.insert(
            row.clone(),
            RowConflict {
                row: row.clone(),
                local_version,
                server,
                pending,
                fields,
            },
        );
        &self.conflicts[row]
    }

    pub fn state(&self, row: &RowKey, field_key: &str) -> ConflictState {
        match self.conflicts.get(row) {
            Some(c) if c.field(field_key).is_some() => ConflictState::Conflicted,
            _ => ConflictState::NoConflict,
        }
    }

    pub fn is_row_conflicted(&self, row: &RowKey) -> bool {
        self.conflicts.contains_key(row)
    }

    pub fn get(&self, row: &RowKey) -> Option<&RowConflict> {
        self.conflicts.get(row)
    }

    /// The conflict to present next: first row, first field.
    pub fn active(&self) -> Option<&VersionConflict> {
        self.conflicts.values().next().and_then(|c| c.fields.first())
    }

    pub fn resolve(&mut self, row: &RowKey, resolution: Resolution) -> Result<ResolvedConflict, EngineError> {
        let conflict = self
            .conflicts
            .remove(row)
            .ok_or_else(|| EngineError::NoConflict(row.to_string()))?;
        tracing::info!(row = %row, ?resolution, "conflict resolved");
        Ok(ResolvedConflict { conflict, resolution })
    }

    /// Forget a row's conflict without resolving it, e.g. on revert.
    pub fn clear(&mut self, row: &RowKey) -> Option<RowConflict> {
        self.conflicts.remove(row)
    }

    pub fn clear_all(&mut self) -> usize {
        let n = self.conflicts.len();
        self.conflicts.clear();
        n
    }

    pub fn rows(&self) -> impl Iterator<Item = &RowKey> {
        self.conflicts.keys()
    }

    pub fn len(&self) -> usize {
        self.conflicts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conflicts.is_empty()
    }
}
