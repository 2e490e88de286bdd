use crate::error::CoreError;
use crate::field_value::{FieldMap, FieldValue};
use crate::ids::NaturalKey;

/// Validation family a field key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldFamily {
    Currency,
    Percentage,
    Count,
    /// Free text, or an identifier restricted to `[A-Za-z0-9._-]`.
    Text { identifier: bool },
}

impl FieldFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Currency => "currency",
            Self::Percentage => "percentage",
            Self::Count => "count",
            Self::Text { identifier: true } => "identifier",
            Self::Text { identifier: false } => "text",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub key: &'static str,
    pub family: FieldFamily,
    /// Required fields may not be cleared to `Unset`.
    pub required: bool,
}

const fn field(key: &'static str, family: FieldFamily, required: bool) -> FieldSpec {
    FieldSpec { key, family, required }
}

const IDENT: FieldFamily = FieldFamily::Text { identifier: true };
const TEXT: FieldFamily = FieldFamily::Text { identifier: false };

pub const CATALOG: &[FieldSpec] = &[
    field("input_per_1m", FieldFamily::Currency, false),
    field("output_per_1m", FieldFamily::Currency, false),
    field("cached_input_per_1m", FieldFamily::Currency, false),
    field("hourly_rate", FieldFamily::Currency, false),
    field("monthly_commit", FieldFamily::Currency, false),
    field("discount_pct", FieldFamily::Percentage, false),
    field("margin_pct", FieldFamily::Percentage, false),
    field("gpu_count", FieldFamily::Count, false),
    field("vcpu_count", FieldFamily::Count, false),
    field("memory_gb", FieldFamily::Count, false),
    field("context_window", FieldFamily::Count, false),
    field("provider", IDENT, true),
    field("model", IDENT, true),
    field("region", IDENT, true),
    field("instance_type", IDENT, true),
    field("accelerator", IDENT, true),
    field("display_name", TEXT, false),
    field("notes", TEXT, false),
];

/// Key fields for LLM model pricing rows.
pub const MODEL_KEY_FIELDS: &[&str] = &["provider", "model", "region"];

/// Key fields for compute instance pricing rows.
pub const COMPUTE_KEY_FIELDS: &[&str] = &["instance_type", "accelerator", "region"];

pub fn lookup(key: &str) -> Option<&'static FieldSpec> {
    CATALOG.iter().find(|spec| spec.key == key)
}

/// Derive a row's natural key from its semantic attributes. Rows carrying a
/// `model` use the model key fields, rows carrying an `instance_type` use the
/// compute key fields.
pub fn derive_natural_key(fields: &FieldMap) -> Result<NaturalKey, CoreError> {
    let key_fields = if fields.contains_key("model") {
        MODEL_KEY_FIELDS
    } else if fields.contains_key("instance_type") {
        COMPUTE_KEY_FIELDS
    } else {
        return Err(CoreError::InvalidKey(
            "row has neither a model nor an instance_type".into(),
        ));
    };

    let mut parts = Vec::with_capacity(key_fields.len());
    for key in key_fields {
        match fields.get(*key) {
            Some(FieldValue::Text(value)) => parts.push(value.as_str()),
            Some(_) | None => {
                return Err(CoreError::InvalidKey(format!("missing key field {key}")));
            }
        }
    }
    NaturalKey::from_parts(&parts)
}
