//! Crate-wide error type.
//! Precondition violations surface here; numeric degeneracies are absorbed
//! where they occur and never reach the caller as errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("empty feature set")]
    EmptyFeatureSet,

    #[error("no models")]
    NoModels,

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("sample rate mismatch: model trained at {model} Hz, test audio is {test} Hz")]
    SampleRateMismatch { model: u32, test: u32 },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl From<rusqlite::Error> for CoreError {
    fn from(e: rusqlite::Error) -> Self {
        CoreError::Store(e.to_string())
    }
}
