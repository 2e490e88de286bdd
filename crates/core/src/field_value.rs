use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Field key to value. Ordered so encodings are deterministic.
pub type FieldMap = BTreeMap<String, FieldValue>;

/// A validated cell value. The variant is fixed by the field's family at
/// validation time and not re-inferred downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FieldValue {
    /// Explicitly unset, distinct from an explicit zero.
    Unset,
    Currency(f64),
    Percentage(f64),
    Count(u64),
    Text(String),
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Unset, Self::Unset) => true,
            (Self::Currency(a), Self::Currency(b)) => a.total_cmp(b).is_eq(),
            (Self::Percentage(a), Self::Percentage(b)) => a.total_cmp(b).is_eq(),
            (Self::Count(a), Self::Count(b)) => a == b,
            (Self::Text(a), Self::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for FieldValue {}

impl FieldValue {
    pub fn is_unset(&self) -> bool {
        matches!(self, FieldValue::Unset)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view used for sorting; counts widen to f64.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Currency(n) | FieldValue::Percentage(n) => Some(*n),
            FieldValue::Count(n) => Some(*n as f64),
            _ => None,
        }
    }

    /// Ordering for table sorts. Numbers compare numerically, text
    /// case-insensitively, and mismatched kinds fall back to a fixed rank.
    /// `Unset` placement is the caller's concern.
    pub fn sort_cmp(&self, other: &Self) -> Ordering {
        match (self.as_number(), other.as_number()) {
            (Some(a), Some(b)) => a.total_cmp(&b),
            _ => match (self, other) {
                (Self::Text(a), Self::Text(b)) => a.to_lowercase().cmp(&b.to_lowercase()),
                _ => self.rank().cmp(&other.rank()),
            },
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Currency(_) | Self::Percentage(_) | Self::Count(_) => 0,
            Self::Text(_) => 1,
            Self::Unset => 2,
        }
    }
}

/// Encode a whole field map; used for storage blobs and fingerprints.
pub fn encode_field_map(fields: &FieldMap) -> Result<Vec<u8>, crate::CoreError> {
    rmp_serde::to_vec(fields).map_err(|e| crate::CoreError::Serialization(e.to_string()))
}

pub fn decode_field_map(bytes: &[u8]) -> Result<FieldMap, crate::CoreError> {
    rmp_serde::from_slice(bytes).map_err(|e| crate::CoreError::Serialization(e.to_string()))
}
