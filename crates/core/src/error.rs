use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid natural key: {0}")]
    InvalidKey(String),

    #[error("invalid data: {0}")]
    InvalidData(String),
}
