//! Batch coordinator.
//!
//! Runs a selection of tests in fixed-width chunks: every test in a chunk
//! runs concurrently and the next chunk starts only when the whole chunk
//! is done. A batch always ends with a saved record, `ERROR` status
//! included.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use callflow_eval::CachedConfig;
use callflow_storage::{
    BatchRecord, BatchSelection, BatchStatus, BatchStore, BlobStore, ConfigStore, ResultPayload,
    TestCaseRecord, TestStore,
};
use futures::future::join_all;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

use crate::config::BatchConfig;
use crate::coverage::compute_coverage;
use crate::error::BatchError;
use crate::interpreter::{TestInterpreter, TestResult};
use crate::persist::save_with_results;
use crate::traits::InferenceService;

fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Resolve a selection to test cases. Folder selections skip disabled tests.
pub async fn select_tests(
    store: &dyn TestStore,
    selection: &BatchSelection,
) -> Result<Vec<TestCaseRecord>, BatchError> {
    let tests = match selection {
        BatchSelection::Ids { test_ids } => {
            let mut tests = Vec::with_capacity(test_ids.len());
            for id in test_ids {
                tests.push(store.get_test(id).await?);
            }
            tests
        }
        BatchSelection::Folder { folder, recursive } => store
            .list_tests()
            .await?
            .into_iter()
            .filter(|t| t.enabled)
            .filter(|t| t.folder == *folder || (*recursive && t.folder.starts_with(folder.as_str())))
            .collect(),
    };
    if tests.is_empty() {
        return Err(BatchError::NoTests);
    }
    Ok(tests)
}

/// A created batch with its resolved tests, ready to run.
pub struct PendingBatch {
    pub record: BatchRecord,
    tests: Vec<TestCaseRecord>,
}

pub struct BatchCoordinator {
    tests: Arc<dyn TestStore>,
    batches: Arc<dyn BatchStore>,
    blobs: Arc<dyn BlobStore>,
    config_store: Arc<dyn ConfigStore>,
    service: Arc<dyn InferenceService>,
    config: BatchConfig,
}

impl BatchCoordinator {
    pub fn new(
        tests: Arc<dyn TestStore>,
        batches: Arc<dyn BatchStore>,
        blobs: Arc<dyn BlobStore>,
        config_store: Arc<dyn ConfigStore>,
        service: Arc<dyn InferenceService>,
    ) -> Self {
        BatchCoordinator {
            tests,
            batches,
            blobs,
            config_store,
            service,
            config: BatchConfig::default(),
        }
    }

    pub fn with_config(mut self, config: BatchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn batches(&self) -> &Arc<dyn BatchStore> {
        &self.batches
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    /// Resolve the selection and create the batch record.
    ///
    /// A selection that cannot be resolved is not an error here: the
    /// record is created with `ERROR` status and the reason. Only a failure
    /// to create the record itself is returned.
    pub async fn submit(
        &self,
        requested_by: &str,
        selection: BatchSelection,
    ) -> Result<PendingBatch, BatchError> {
        let selected = select_tests(self.tests.as_ref(), &selection).await;
        let mut record = BatchRecord {
            batch_id: Uuid::new_v4().to_string(),
            requested_by: requested_by.to_string(),
            selection,
            status: BatchStatus::Running,
            started_at: now_rfc3339(),
            ended_at: None,
            total: 0,
            completed: 0,
            success: false,
            warning: false,
            coverage: serde_json::Value::Null,
            results: ResultPayload::Empty,
            error: None,
        };
        let tests = match selected {
            Ok(tests) => {
                record.total = tests.len();
                tests
            }
            Err(e) => {
                tracing::warn!(error = %e, "batch selection failed");
                record.status = BatchStatus::Error;
                record.ended_at = Some(now_rfc3339());
                record.error = Some(e.to_string());
                Vec::new()
            }
        };
        self.batches.create_batch(&record).await?;
        tracing::info!(batch_id = %record.batch_id, total = record.total, "batch submitted");
        Ok(PendingBatch { record, tests })
    }

    /// Run a submitted batch to completion and save the final record.
    pub async fn run(&self, pending: PendingBatch) -> BatchRecord {
        let PendingBatch { mut record, tests } = pending;
        if record.status == BatchStatus::Error {
            return record;
        }

        let results = self.run_tests(&record.batch_id, &tests).await;
        record.completed = results.len();
        if let Err(e) = self.finalize(&mut record, results).await {
            tracing::error!(batch_id = %record.batch_id, error = %e, "batch failed");
            record.status = BatchStatus::Error;
            record.error = Some(e.to_string());
            record.results = ResultPayload::Empty;
            if let Err(e) = self.batches.save_batch(&record).await {
                tracing::warn!(batch_id = %record.batch_id, error = %e, "could not save failed batch");
            }
        }
        record
    }

    /// Submit and run in one call.
    pub async fn run_selection(
        &self,
        requested_by: &str,
        selection: BatchSelection,
    ) -> Result<BatchRecord, BatchError> {
        let pending = self.submit(requested_by, selection).await?;
        Ok(self.run(pending).await)
    }

    async fn run_tests(&self, batch_id: &str, tests: &[TestCaseRecord]) -> Vec<TestResult> {
        let interpreter = TestInterpreter::new(self.service.clone(), self.config.max_interactions);
        let completed = AtomicUsize::new(0);
        let mut results = Vec::with_capacity(tests.len());

        for chunk in tests.chunks(self.config.batch_width.max(1)) {
            let runs = chunk.iter().map(|test| {
                let interpreter = &interpreter;
                let completed = &completed;
                async move {
                    let result = interpreter.run(test).await;
                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    if let Err(e) = self.batches.update_progress(batch_id, done).await {
                        tracing::warn!(batch_id, error = %e, "could not record batch progress");
                    }
                    result
                }
            });
            results.extend(join_all(runs).await);
            tracing::debug!(batch_id, completed = results.len(), "chunk finished");
        }
        results
    }

    async fn finalize(
        &self,
        record: &mut BatchRecord,
        mut results: Vec<TestResult>,
    ) -> Result<(), BatchError> {
        results.sort_by(|a, b| a.name.cmp(&b.name));
        record.success = results.iter().all(|r| r.success);
        record.warning = results.iter().any(|r| r.warning);

        let token = self.config_store.last_change_token().await?;
        let rules = CachedConfig::from_bundle(&token, self.config_store.load_bundle().await?);
        record.coverage = serde_json::to_value(compute_coverage(&rules.rule_sets, &results))?;

        record.status = BatchStatus::Complete;
        record.ended_at = Some(now_rfc3339());
        save_with_results(self.batches.as_ref(), self.blobs.as_ref(), record, &results).await?;
        tracing::info!(
            batch_id = %record.batch_id,
            success = record.success,
            warning = record.warning,
            "batch complete"
        );
        Ok(())
    }
}
