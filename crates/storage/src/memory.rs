//! In-memory storage backends.
//!
//! Used by the CLI for local runs and by every test in the workspace.
//! Each backend is a thin `tokio::sync::RwLock` around a map.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use callflow_interchange::RuleBundle;
use tokio::sync::RwLock;

use crate::error::StorageError;
use crate::record::{BatchRecord, FlatState, StateChanges, TestCaseRecord};
use crate::traits::{BatchStore, BlobStore, ConfigStore, SessionStore, TestStore};

/// Default inline item limit, matching common document-store item caps.
pub const DEFAULT_INLINE_LIMIT: usize = 400 * 1024;

// ── Sessions ────────────────────────────────────────────────────────

struct SessionEntry {
    values: FlatState,
    expires_at: Instant,
}

/// Session state held in process memory with lazy expiry.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, SessionEntry>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) sessions.
    pub async fn session_count(&self) -> usize {
        let now = Instant::now();
        self.sessions
            .read()
            .await
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get_state(&self, session_id: &str) -> Result<FlatState, StorageError> {
        let now = Instant::now();
        {
            let sessions = self.sessions.read().await;
            match sessions.get(session_id) {
                Some(entry) if entry.expires_at > now => return Ok(entry.values.clone()),
                Some(_) => {}
                None => return Ok(FlatState::new()),
            }
        }
        // Expired: evict.
        self.sessions.write().await.remove(session_id);
        Ok(FlatState::new())
    }

    async fn set_state_subset(
        &self,
        session_id: &str,
        changes: &StateChanges,
        ttl_secs: u64,
    ) -> Result<(), StorageError> {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;
        // Sessions that are never read again would otherwise stay forever.
        sessions.retain(|id, e| e.expires_at > now || id == session_id);
        let entry = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionEntry {
                values: FlatState::new(),
                expires_at: now,
            });
        if entry.expires_at <= now {
            entry.values.clear();
        }
        for (key, value) in changes {
            match value {
                Some(v) => {
                    entry.values.insert(key.clone(), v.clone());
                }
                None => {
                    entry.values.remove(key);
                }
            }
        }
        entry.expires_at = now + Duration::from_secs(ttl_secs);
        Ok(())
    }
}

// ── Config ──────────────────────────────────────────────────────────

/// A published rule bundle with a change token, plus a load counter so
/// tests can observe cache behaviour.
pub struct MemoryConfigStore {
    bundle: RwLock<RuleBundle>,
    loads: AtomicUsize,
}

impl MemoryConfigStore {
    pub fn new(bundle: RuleBundle) -> Self {
        MemoryConfigStore {
            bundle: RwLock::new(bundle),
            loads: AtomicUsize::new(0),
        }
    }

    /// Replace the published bundle. The token is bumped when the new
    /// bundle carries the same token as the old one, so a publish is always
    /// observable.
    pub async fn publish(&self, mut bundle: RuleBundle) {
        let mut current = self.bundle.write().await;
        if bundle.token == current.token {
            bundle.token = format!("{}+", current.token);
        }
        *current = bundle;
    }

    /// How many times the full bundle has been loaded.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn last_change_token(&self) -> Result<String, StorageError> {
        Ok(self.bundle.read().await.token.clone())
    }

    async fn load_bundle(&self) -> Result<RuleBundle, StorageError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.bundle.read().await.clone())
    }
}

// ── Tests ───────────────────────────────────────────────────────────

/// Test cases keyed by id, listed in insertion order.
#[derive(Default)]
pub struct MemoryTestStore {
    tests: RwLock<Vec<TestCaseRecord>>,
}

impl MemoryTestStore {
    pub fn new(tests: Vec<TestCaseRecord>) -> Self {
        MemoryTestStore {
            tests: RwLock::new(tests),
        }
    }
}

#[async_trait]
impl TestStore for MemoryTestStore {
    async fn get_test(&self, test_id: &str) -> Result<TestCaseRecord, StorageError> {
        self.tests
            .read()
            .await
            .iter()
            .find(|t| t.test_id == test_id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                kind: "test",
                id: test_id.to_string(),
            })
    }

    async fn list_tests(&self) -> Result<Vec<TestCaseRecord>, StorageError> {
        Ok(self.tests.read().await.clone())
    }
}

// ── Batches ─────────────────────────────────────────────────────────

/// Batch records with an enforced inline size limit.
pub struct MemoryBatchStore {
    batches: RwLock<HashMap<String, BatchRecord>>,
    inline_limit: usize,
}

impl Default for MemoryBatchStore {
    fn default() -> Self {
        Self::with_inline_limit(DEFAULT_INLINE_LIMIT)
    }
}

impl MemoryBatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_inline_limit(inline_limit: usize) -> Self {
        MemoryBatchStore {
            batches: RwLock::new(HashMap::new()),
            inline_limit,
        }
    }

    fn check_size(&self, record: &BatchRecord) -> Result<(), StorageError> {
        let size = serde_json::to_vec(record)?.len();
        if size > self.inline_limit {
            return Err(StorageError::PayloadTooLarge {
                id: record.batch_id.clone(),
                size,
                limit: self.inline_limit,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl BatchStore for MemoryBatchStore {
    fn inline_limit(&self) -> usize {
        self.inline_limit
    }

    async fn create_batch(&self, record: &BatchRecord) -> Result<(), StorageError> {
        self.check_size(record)?;
        let mut batches = self.batches.write().await;
        if batches.contains_key(&record.batch_id) {
            return Err(StorageError::AlreadyExists {
                kind: "batch",
                id: record.batch_id.clone(),
            });
        }
        batches.insert(record.batch_id.clone(), record.clone());
        Ok(())
    }

    async fn update_progress(&self, batch_id: &str, completed: usize) -> Result<(), StorageError> {
        let mut batches = self.batches.write().await;
        let record = batches
            .get_mut(batch_id)
            .ok_or_else(|| StorageError::NotFound {
                kind: "batch",
                id: batch_id.to_string(),
            })?;
        record.completed = completed;
        Ok(())
    }

    async fn save_batch(&self, record: &BatchRecord) -> Result<(), StorageError> {
        self.check_size(record)?;
        self.batches
            .write()
            .await
            .insert(record.batch_id.clone(), record.clone());
        Ok(())
    }

    async fn get_batch(&self, batch_id: &str) -> Result<BatchRecord, StorageError> {
        self.batches
            .read()
            .await
            .get(batch_id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                kind: "batch",
                id: batch_id.to_string(),
            })
    }
}

// ── Blobs ───────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put_blob(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        self.blobs.write().await.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get_blob(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.blobs
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                kind: "blob",
                id: key.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformance::run_conformance_suite;
    use crate::record::{BatchSelection, BatchStatus, ResultPayload};

    #[tokio::test]
    async fn memory_session_store_passes_conformance() {
        let report = run_conformance_suite(|| async { MemorySessionStore::new() }).await;
        assert!(report.failed == 0, "{report}");
        assert!(report.total > 0);
    }

    #[tokio::test]
    async fn publish_always_moves_the_token() {
        let store = MemoryConfigStore::new(RuleBundle {
            token: "v1".to_string(),
            ..RuleBundle::default()
        });
        let before = store.last_change_token().await.unwrap();
        store
            .publish(RuleBundle {
                token: "v1".to_string(),
                ..RuleBundle::default()
            })
            .await;
        let after = store.last_change_token().await.unwrap();
        assert_ne!(before, after);
        assert_eq!(store.load_count(), 0);
        store.load_bundle().await.unwrap();
        assert_eq!(store.load_count(), 1);
    }

    #[tokio::test]
    async fn writes_sweep_expired_sessions() {
        let store = MemorySessionStore::new();
        let changes: StateChanges = [("k".to_string(), Some("v".to_string()))].into_iter().collect();
        store.set_state_subset("old", &changes, 0).await.unwrap();
        store.set_state_subset("new", &changes, 60).await.unwrap();

        let sessions = store.sessions.read().await;
        assert!(!sessions.contains_key("old"));
        assert!(sessions.contains_key("new"));
        assert_eq!(sessions.len(), 1);
    }

    fn batch(id: &str, results: ResultPayload) -> BatchRecord {
        BatchRecord {
            batch_id: id.to_string(),
            requested_by: "tester".to_string(),
            selection: BatchSelection::Ids { test_ids: vec![] },
            status: BatchStatus::Running,
            started_at: "2026-01-01T00:00:00Z".to_string(),
            ended_at: None,
            total: 0,
            completed: 0,
            success: true,
            warning: false,
            coverage: serde_json::Value::Null,
            results,
            error: None,
        }
    }

    #[tokio::test]
    async fn batch_store_enforces_inline_limit() {
        let store = MemoryBatchStore::with_inline_limit(512);
        store.create_batch(&batch("b1", ResultPayload::Empty)).await.unwrap();

        let big = ResultPayload::Compressed {
            data: "x".repeat(1000),
        };
        let err = store.save_batch(&batch("b1", big)).await.unwrap_err();
        assert!(matches!(err, StorageError::PayloadTooLarge { .. }));
    }

    #[tokio::test]
    async fn batch_store_rejects_duplicate_create() {
        let store = MemoryBatchStore::new();
        store.create_batch(&batch("b1", ResultPayload::Empty)).await.unwrap();
        let err = store
            .create_batch(&batch("b1", ResultPayload::Empty))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists { .. }));
        store.update_progress("b1", 3).await.unwrap();
        assert_eq!(store.get_batch("b1").await.unwrap().completed, 3);
    }

    #[tokio::test]
    async fn missing_test_is_not_found() {
        let store = MemoryTestStore::default();
        let err = store.get_test("nope").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { kind: "test", .. }));
    }
}
