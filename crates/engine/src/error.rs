use pricebook_core::{CoreError, ValidationError};
use pricebook_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("unknown row: {0}")]
    UnknownRow(String),

    #[error("duplicate row: {0}")]
    DuplicateRow(String),

    #[error("field {field} on {row} has an unresolved conflict")]
    FieldConflicted { row: String, field: String },

    #[error("no conflict on row: {0}")]
    NoConflict(String),

    #[error("row has an operation in flight: {0}")]
    RowBusy(String),

    #[error("no failed write for row: {0}")]
    NoFailedWrite(String),

    #[error("editor has been torn down")]
    TornDown,

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("config parse error: {0}")]
    Config(#[from] toml::de::Error),
}
