/// All errors that can be returned by a callflow storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// No record of the given kind with the given id.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A record with this id already exists and may not be re-created.
    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: &'static str, id: String },

    /// The record exceeds the backend's inline item size limit.
    #[error("record {id} is {size} bytes, inline limit is {limit}")]
    PayloadTooLarge { id: String, size: usize, limit: usize },

    /// A value could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A backend-specific storage error (connection, throttling, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}
