use crate::host::FetchError;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Failed to load {key}: {source}")]
    Load {
        key: String,
        #[source]
        source: FetchError,
    },

    #[error("Invalid JSON in {key}: {message}")]
    InvalidJson { key: String, message: String },

    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    #[error("Collection set '{id}' not found in {folder}")]
    SetNotFound { folder: String, id: String },
}

pub type Result<T> = std::result::Result<T, EngineError>;
