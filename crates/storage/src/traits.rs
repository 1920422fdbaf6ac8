use async_trait::async_trait;
use callflow_interchange::RuleBundle;

use crate::error::StorageError;
use crate::record::{BatchRecord, FlatState, StateChanges, TestCaseRecord};

/// Per-session key/value state with a time-to-live.
///
/// The engine reads the whole session once per pass and writes back only
/// the keys it changed. Values are opaque strings; object and array values
/// arrive already JSON-encoded.
///
/// ## Expiry
///
/// Every `set_state_subset` call resets the session's expiry to `ttl_secs`
/// from now. An expired session reads as empty. There is no explicit
/// delete.
///
/// ## Concurrency
///
/// No locking is performed. Two writers on the same session race with
/// last-write-wins per key; the platform guarantees at most one in-flight
/// invocation per contact under normal operation.
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    /// Read every key of a session. Missing or expired sessions read as empty.
    async fn get_state(&self, session_id: &str) -> Result<FlatState, StorageError>;

    /// Apply a subset write. `None` values delete their key.
    async fn set_state_subset(
        &self,
        session_id: &str,
        changes: &StateChanges,
        ttl_secs: u64,
    ) -> Result<(), StorageError>;
}

/// Source of published rule configuration.
///
/// `last_change_token` is cheap and consulted on every request; the bundle
/// is only loaded when the token moves.
#[async_trait]
pub trait ConfigStore: Send + Sync + 'static {
    /// Token updated by the management side on every configuration change.
    async fn last_change_token(&self) -> Result<String, StorageError>;

    /// Load the full published rule bundle.
    async fn load_bundle(&self) -> Result<RuleBundle, StorageError>;
}

/// Read access to recorded test cases.
#[async_trait]
pub trait TestStore: Send + Sync + 'static {
    /// Returns `Err(StorageError::NotFound)` if no test has this id.
    async fn get_test(&self, test_id: &str) -> Result<TestCaseRecord, StorageError>;

    async fn list_tests(&self) -> Result<Vec<TestCaseRecord>, StorageError>;
}

/// Persistence for batch runs.
#[async_trait]
pub trait BatchStore: Send + Sync + 'static {
    /// Maximum serialized size of a single record, in bytes.
    fn inline_limit(&self) -> usize;

    /// Create the record at submission. Returns `AlreadyExists` on reuse of an id.
    async fn create_batch(&self, record: &BatchRecord) -> Result<(), StorageError>;

    /// Record how many tests have finished.
    async fn update_progress(&self, batch_id: &str, completed: usize) -> Result<(), StorageError>;

    /// Terminal save. Returns `PayloadTooLarge` when the serialized record
    /// exceeds [`inline_limit`](Self::inline_limit).
    async fn save_batch(&self, record: &BatchRecord) -> Result<(), StorageError>;

    async fn get_batch(&self, batch_id: &str) -> Result<BatchRecord, StorageError>;
}

/// Opaque blob storage for payloads too large to keep inline.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    async fn put_blob(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError>;

    async fn get_blob(&self, key: &str) -> Result<Vec<u8>, StorageError>;
}
