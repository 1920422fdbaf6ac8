//! Result persistence.
//!
//! Per-test results are serialized to JSON, gzip-compressed and stored in
//! the batch record as base64. When the record would then exceed the batch
//! store's inline limit, the compressed bytes go to blob storage instead
//! and the record keeps only the blob key.

use std::io::{Read, Write};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use callflow_storage::{BatchRecord, BatchStore, BlobStore, ResultPayload, StorageError};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::BatchError;
use crate::interpreter::TestResult;

pub fn blob_key(batch_id: &str) -> String {
    format!("batches/{}/results.json.gz", batch_id)
}

pub fn compress_results(results: &[TestResult]) -> Result<Vec<u8>, BatchError> {
    let json = serde_json::to_vec(results)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    Ok(encoder.finish()?)
}

pub fn decompress_results(bytes: &[u8]) -> Result<Vec<TestResult>, BatchError> {
    let mut json = Vec::new();
    GzDecoder::new(bytes).read_to_end(&mut json)?;
    Ok(serde_json::from_slice(&json)?)
}

/// Attach `results` to `record` and save it, overflowing to blob storage
/// when the batch store rejects the inline payload.
pub async fn save_with_results(
    batches: &dyn BatchStore,
    blobs: &dyn BlobStore,
    record: &mut BatchRecord,
    results: &[TestResult],
) -> Result<(), BatchError> {
    let compressed = compress_results(results)?;
    record.results = ResultPayload::Compressed {
        data: BASE64.encode(&compressed),
    };
    match batches.save_batch(record).await {
        Ok(()) => Ok(()),
        Err(StorageError::PayloadTooLarge { size, limit, .. }) => {
            let key = blob_key(&record.batch_id);
            tracing::info!(
                batch_id = %record.batch_id,
                size,
                limit,
                blob = %key,
                "results exceed inline limit; writing to blob storage"
            );
            blobs.put_blob(&key, compressed).await?;
            record.results = ResultPayload::Blob { key };
            batches.save_batch(record).await?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Read back the per-test results of a saved batch.
pub async fn load_results(
    blobs: &dyn BlobStore,
    record: &BatchRecord,
) -> Result<Vec<TestResult>, BatchError> {
    match &record.results {
        ResultPayload::Empty => Ok(Vec::new()),
        ResultPayload::Compressed { data } => {
            let bytes = BASE64
                .decode(data)
                .map_err(|e| BatchError::Encoding(e.to_string()))?;
            decompress_results(&bytes)
        }
        ResultPayload::Blob { key } => decompress_results(&blobs.get_blob(key).await?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callflow_storage::memory::{MemoryBatchStore, MemoryBlobStore};
    use callflow_storage::{BatchSelection, BatchStatus};

    fn record(id: &str) -> BatchRecord {
        BatchRecord {
            batch_id: id.to_string(),
            requested_by: "tester".into(),
            selection: BatchSelection::Ids { test_ids: vec![] },
            status: BatchStatus::Complete,
            started_at: "2026-03-04T00:00:00Z".into(),
            ended_at: Some("2026-03-04T00:01:00Z".into()),
            total: 0,
            completed: 0,
            success: true,
            warning: false,
            coverage: serde_json::Value::Null,
            results: ResultPayload::Empty,
            error: None,
        }
    }

    fn results(n: usize) -> Vec<TestResult> {
        (0..n)
            .map(|i| TestResult {
                test_id: format!("t{}", i),
                name: format!("Test {}", i),
                session_id: uuid::Uuid::new_v4().to_string(),
                success: true,
                warning: false,
                end: None,
                error: None,
                lines: vec![],
                interactions: vec![],
            })
            .collect()
    }

    #[tokio::test]
    async fn small_results_stay_inline() {
        let batches = MemoryBatchStore::new();
        let blobs = MemoryBlobStore::new();
        let mut rec = record("b1");
        batches.create_batch(&rec).await.unwrap();
        save_with_results(&batches, &blobs, &mut rec, &results(3)).await.unwrap();

        let saved = batches.get_batch("b1").await.unwrap();
        assert!(matches!(saved.results, ResultPayload::Compressed { .. }));
        let loaded = load_results(&blobs, &saved).await.unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[0].name, "Test 0");
    }

    #[tokio::test]
    async fn large_results_overflow_to_blob() {
        let batches = MemoryBatchStore::with_inline_limit(1024);
        let blobs = MemoryBlobStore::new();
        let mut rec = record("b2");
        batches.create_batch(&rec).await.unwrap();
        save_with_results(&batches, &blobs, &mut rec, &results(200)).await.unwrap();

        let saved = batches.get_batch("b2").await.unwrap();
        assert_eq!(
            saved.results,
            ResultPayload::Blob {
                key: "batches/b2/results.json.gz".into()
            }
        );
        let loaded = load_results(&blobs, &saved).await.unwrap();
        assert_eq!(loaded.len(), 200);
        assert_eq!(loaded[199].test_id, "t199");
    }

    #[tokio::test]
    async fn empty_payload_loads_nothing() {
        let blobs = MemoryBlobStore::new();
        assert!(load_results(&blobs, &record("b3")).await.unwrap().is_empty());
    }
}
