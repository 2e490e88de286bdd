//! Field validation. Every value entering the edit pipeline passes through
//! [`validate`], which resolves the raw input to a typed [`FieldValue`] once.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::{self, FieldFamily, FieldSpec};
use crate::field_value::{FieldMap, FieldValue};

/// Largest integer a count may hold and still round-trip through f64 input.
pub const MAX_COUNT: u64 = (1 << 53) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationLimits {
    /// Upper bound for any currency field, enforced before the network.
    pub max_currency: f64,
    pub max_text_len: usize,
    pub max_identifier_len: usize,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_currency: 1_000_000.0,
            max_text_len: 256,
            max_identifier_len: 128,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: ValidationReason,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationReason {
    #[error("unknown field")]
    UnknownField,

    #[error("a value is required")]
    Required,

    #[error("not a number")]
    NotANumber,

    #[error("must be a finite number")]
    NotFinite,

    #[error("must not be negative")]
    Negative,

    #[error("must be at most {max}")]
    AboveMaximum { max: f64 },

    #[error("must be between {min} and {max}")]
    OutOfRange { min: f64, max: f64 },

    #[error("must be a whole number")]
    Fractional,

    #[error("must be at most {max} characters")]
    TooLong { max: usize },

    #[error("character {0:?} is not allowed")]
    DisallowedCharacter(char),

    #[error("expected a {expected} value")]
    WrongFamily { expected: &'static str },
}

/// Validate raw cell input for `field_key`.
///
/// Empty (or all-whitespace) input on an optional field yields
/// [`FieldValue::Unset`], never a zero. On a required field it is rejected.
pub fn validate(
    field_key: &str,
    raw: &str,
    limits: &ValidationLimits,
) -> Result<FieldValue, ValidationError> {
    let spec = spec_for(field_key)?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return if spec.required {
            Err(fail(spec, ValidationReason::Required))
        } else {
            Ok(FieldValue::Unset)
        };
    }

    match spec.family {
        FieldFamily::Currency => {
            let n = parse_number(spec, trimmed)?;
            check_currency(spec, n, limits).map(FieldValue::Currency)
        }
        FieldFamily::Percentage => {
            let n = parse_number(spec, trimmed)?;
            check_percentage(spec, n).map(FieldValue::Percentage)
        }
        FieldFamily::Count => {
            let n = parse_number(spec, trimmed)?;
            check_count(spec, n).map(FieldValue::Count)
        }
        FieldFamily::Text { identifier } => {
            check_text(spec, trimmed, identifier, limits).map(|s| FieldValue::Text(s.to_string()))
        }
    }
}

/// Validate an already-typed value, e.g. the fields of a custom row being
/// added. The variant must match the field's family.
pub fn validate_value(
    field_key: &str,
    value: &FieldValue,
    limits: &ValidationLimits,
) -> Result<(), ValidationError> {
    let spec = spec_for(field_key)?;
    match (spec.family, value) {
        (_, FieldValue::Unset) if spec.required => Err(fail(spec, ValidationReason::Required)),
        (_, FieldValue::Unset) => Ok(()),
        (FieldFamily::Currency, FieldValue::Currency(n)) => {
            check_currency(spec, *n, limits).map(|_| ())
        }
        (FieldFamily::Percentage, FieldValue::Percentage(n)) => {
            check_percentage(spec, *n).map(|_| ())
        }
        (FieldFamily::Count, FieldValue::Count(n)) => {
            if *n > MAX_COUNT {
                Err(fail(spec, ValidationReason::AboveMaximum { max: MAX_COUNT as f64 }))
            } else {
                Ok(())
            }
        }
        (FieldFamily::Text { identifier }, FieldValue::Text(s)) => {
            if s.is_empty() && spec.required {
                return Err(fail(spec, ValidationReason::Required));
            }
            check_text(spec, s, identifier, limits).map(|_| ())
        }
        (family, _) => Err(fail(
            spec,
            ValidationReason::WrongFamily {
                expected: family.as_str(),
            },
        )),
    }
}

/// Validate every field in a map, stopping at the first error.
pub fn validate_map(fields: &FieldMap, limits: &ValidationLimits) -> Result<(), ValidationError> {
    for (key, value) in fields {
        validate_value(key, value, limits)?;
    }
    Ok(())
}

fn spec_for(field_key: &str) -> Result<&'static FieldSpec, ValidationError> {
    catalog::lookup(field_key).ok_or_else(|| ValidationError {
        field: field_key.to_string(),
        reason: ValidationReason::UnknownField,
    })
}

fn fail(spec: &FieldSpec, reason: ValidationReason) -> ValidationError {
    ValidationError {
        field: spec.key.to_string(),
        reason,
    }
}

fn parse_number(spec: &FieldSpec, raw: &str) -> Result<f64, ValidationError> {
    let n: f64 = raw
        .parse()
        .map_err(|_| fail(spec, ValidationReason::NotANumber))?;
    if !n.is_finite() {
        return Err(fail(spec, ValidationReason::NotFinite));
    }
    // Normalise -0 so equality and encodings agree with 0.
    Ok(n + 0.0)
}

fn check_currency(spec: &FieldSpec, n: f64, limits: &ValidationLimits) -> Result<f64, ValidationError> {
    if !n.is_finite() {
        return Err(fail(spec, ValidationReason::NotFinite));
    }
    if n < 0.0 {
        return Err(fail(spec, ValidationReason::Negative));
    }
    if n > limits.max_currency {
        return Err(fail(
            spec,
            ValidationReason::AboveMaximum {
                max: limits.max_currency,
            },
        ));
    }
    Ok(n)
}

fn check_percentage(spec: &FieldSpec, n: f64) -> Result<f64, ValidationError> {
    if !n.is_finite() {
        return Err(fail(spec, ValidationReason::NotFinite));
    }
    if !(0.0..=100.0).contains(&n) {
        return Err(fail(
            spec,
            ValidationReason::OutOfRange {
                min: 0.0,
                max: 100.0,
            },
        ));
    }
    Ok(n)
}

fn check_count(spec: &FieldSpec, n: f64) -> Result<u64, ValidationError> {
    if n < 0.0 {
        return Err(fail(spec, ValidationReason::Negative));
    }
    if n.floor() != n {
        return Err(fail(spec, ValidationReason::Fractional));
    }
    if n > MAX_COUNT as f64 {
        return Err(fail(
            spec,
            ValidationReason::AboveMaximum {
                max: MAX_COUNT as f64,
            },
        ));
    }
    Ok(n as u64)
}

fn check_text<'a>(
    spec: &FieldSpec,
    s: &'a str,
    identifier: bool,
    limits: &ValidationLimits,
) -> Result<&'a str, ValidationError> {
    let max = if identifier {
        limits.max_identifier_len
    } else {
        limits.max_text_len
    };
    if s.chars().count() > max {
        return Err(fail(spec, ValidationReason::TooLong { max }));
    }
    if identifier {
        if let Some(bad) = s
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(fail(spec, ValidationReason::DisallowedCharacter(bad)));
        }
    }
    Ok(s)
}
