pub mod catalog;
pub mod clock;
pub mod error;
pub mod field_value;
pub mod ids;
pub mod rows;
pub mod validate;

pub use catalog::{FieldFamily, FieldSpec};
pub use error::CoreError;
pub use field_value::{FieldMap, FieldValue};
pub use ids::*;
pub use rows::{BaseRow, CustomRow, MergedRow, OverrideEntry, RowOrigin};
pub use validate::{ValidationError, ValidationLimits, ValidationReason};
