use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Flat, string-valued session state exactly as persisted.
pub type FlatState = BTreeMap<String, String>;

/// A subset write against a session: `Some` sets the key, `None` deletes it.
pub type StateChanges = BTreeMap<String, Option<String>>;

/// A recorded test case: a script plus the number the simulated call dials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseRecord {
    pub test_id: String,
    pub name: String,
    #[serde(default)]
    pub folder: String,
    pub dialed_number: String,
    pub script: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Which tests a batch runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BatchSelection {
    /// An explicit list of test ids.
    Ids { test_ids: Vec<String> },
    /// Every test whose folder equals `folder`, or starts with it when
    /// `recursive` is set.
    Folder { folder: String, recursive: bool },
}

/// Batch lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Running,
    Complete,
    Error,
}

/// Where the per-test results of a batch live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "encoding", rename_all = "snake_case")]
pub enum ResultPayload {
    /// No results recorded yet.
    Empty,
    /// Results gzip-compressed and base64-encoded.
    Compressed { data: String },
    /// Compressed results overflowed to blob storage under `key`.
    Blob { key: String },
}

/// A persisted batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRecord {
    pub batch_id: String,
    pub requested_by: String,
    pub selection: BatchSelection,
    pub status: BatchStatus,
    /// RFC 3339 timestamp.
    pub started_at: String,
    /// RFC 3339 timestamp. None while running.
    pub ended_at: Option<String>,
    pub total: usize,
    pub completed: usize,
    pub success: bool,
    pub warning: bool,
    #[serde(default)]
    pub coverage: serde_json::Value,
    pub results: ResultPayload,
    /// Reason for an `ERROR` status.
    #[serde(default)]
    pub error: Option<String>,
}
