use callflow_storage::StorageError;

/// A test script that cannot be parsed. Fails only the test it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScriptError {
    #[error("line {line}: {message}")]
    Malformed { line: usize, message: String },

    #[error("line {line}: unknown line type '{kind}'")]
    UnknownType { line: usize, kind: String },

    #[error("line {line}: invalid payload for '{kind}': {message}")]
    Payload {
        line: usize,
        kind: String,
        message: String,
    },
}

/// Errors that end a whole batch with `ERROR` status.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("no tests selected")]
    NoTests,

    #[error("result encoding failed: {0}")]
    Encoding(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<serde_json::Error> for BatchError {
    fn from(e: serde_json::Error) -> Self {
        BatchError::Encoding(e.to_string())
    }
}

impl From<std::io::Error> for BatchError {
    fn from(e: std::io::Error) -> Self {
        BatchError::Encoding(e.to_string())
    }
}
