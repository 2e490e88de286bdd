use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::CoreError;

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn parse(s: &str) -> Result<Self, CoreError> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| CoreError::InvalidData(format!("{}: {e}", stringify!($name))))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), &self.0.to_string()[..8])
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(CustomRowId);

const KEY_SEPARATOR: char = '/';

/// Stable identity of a priced item, built from its semantic attributes
/// (e.g. provider + model + region). Never derived from a display id.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NaturalKey(String);

impl NaturalKey {
    /// Parts are trimmed and lowercased so that `"OpenAI"` and `" openai "`
    /// address the same row.
    pub fn from_parts<S: AsRef<str>>(parts: &[S]) -> Result<Self, CoreError> {
        if parts.is_empty() {
            return Err(CoreError::InvalidKey("no key parts".into()));
        }
        let mut normalized = Vec::with_capacity(parts.len());
        for part in parts {
            let part = part.as_ref().trim().to_lowercase();
            if part.is_empty() {
                return Err(CoreError::InvalidKey("empty key part".into()));
            }
            if part.contains(KEY_SEPARATOR) {
                return Err(CoreError::InvalidKey(format!(
                    "key part {part:?} contains '{KEY_SEPARATOR}'"
                )));
            }
            normalized.push(part);
        }
        Ok(Self(normalized.join(&KEY_SEPARATOR.to_string())))
    }

    /// Rebuild a key from its stored form.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        let parts: Vec<&str> = s.split(KEY_SEPARATOR).collect();
        Self::from_parts(&parts)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn parts(&self) -> impl Iterator<Item = &str> {
        self.0.split(KEY_SEPARATOR)
    }
}

impl fmt::Debug for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NaturalKey({})", self.0)
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The operator (admin) who made a change.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct OperatorId(String);

impl OperatorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Addresses a row the pipeline can write to.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub enum RowKey {
    Base(NaturalKey),
    Custom(CustomRowId),
}

impl RowKey {
    /// Storage form: `base:<natural key>` or `custom:<uuid>`.
    pub fn storage_key(&self) -> String {
        match self {
            Self::Base(key) => format!("base:{key}"),
            Self::Custom(id) => format!("custom:{id}"),
        }
    }

    pub fn parse_storage_key(s: &str) -> Result<Self, CoreError> {
        if let Some(rest) = s.strip_prefix("base:") {
            return Ok(Self::Base(NaturalKey::parse(rest)?));
        }
        if let Some(rest) = s.strip_prefix("custom:") {
            return Ok(Self::Custom(CustomRowId::parse(rest)?));
        }
        Err(CoreError::InvalidKey(format!("unrecognised row key {s:?}")))
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, Self::Custom(_))
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

impl From<NaturalKey> for RowKey {
    fn from(key: NaturalKey) -> Self {
        Self::Base(key)
    }
}

impl From<CustomRowId> for RowKey {
    fn from(id: CustomRowId) -> Self {
        Self::Custom(id)
    }
}
