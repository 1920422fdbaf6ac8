//! HTTP route handlers: health, inference and batches.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use callflow_batch::persist::load_results;
use callflow_eval::InferenceRequest;
use callflow_storage::{BatchSelection, BatchStatus, StorageError};
use serde::Deserialize;

use super::json_error;
use super::state::AppState;

/// Fallback handler for unmatched routes.
pub(crate) async fn handle_not_found() -> impl IntoResponse {
    json_error(StatusCode::NOT_FOUND, "not found")
}

/// GET /health
pub(crate) async fn handle_health() -> impl IntoResponse {
    let response = serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    });
    (StatusCode::OK, Json(response))
}

/// POST /inference
///
/// Configuration errors answer 422; storage and platform failures 503.
pub(crate) async fn handle_inference(
    State(state): State<Arc<AppState>>,
    Json(request): Json<InferenceRequest>,
) -> impl IntoResponse {
    match state.engine.invoke(request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => {
            let status = if e.is_fatal() {
                StatusCode::UNPROCESSABLE_ENTITY
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            json_error(status, &e.to_string()).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct BatchSubmission {
    #[serde(default)]
    requested_by: Option<String>,
    selection: BatchSelection,
}

/// POST /batches
///
/// Creates the batch and runs it in the background. Answers 202 with the
/// initial record; poll `GET /batches/{id}` for the outcome.
pub(crate) async fn handle_submit_batch(
    State(state): State<Arc<AppState>>,
    Json(submission): Json<BatchSubmission>,
) -> impl IntoResponse {
    let requested_by = submission.requested_by.as_deref().unwrap_or("api");
    let pending = match state
        .coordinator
        .submit(requested_by, submission.selection)
        .await
    {
        Ok(p) => p,
        Err(e) => return json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()).into_response(),
    };
    let record = pending.record.clone();
    if record.status == BatchStatus::Running {
        let coordinator = state.coordinator.clone();
        tokio::spawn(async move {
            coordinator.run(pending).await;
        });
    }
    (StatusCode::ACCEPTED, Json(record)).into_response()
}

/// GET /batches/{id}
///
/// The record, plus decoded per-test results once the batch is complete.
pub(crate) async fn handle_get_batch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let record = match state.coordinator.batches().get_batch(&id).await {
        Ok(r) => r,
        Err(StorageError::NotFound { .. }) => {
            return json_error(StatusCode::NOT_FOUND, &format!("batch '{}' not found", id))
                .into_response()
        }
        Err(e) => return json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()).into_response(),
    };
    let results = match load_results(state.coordinator.blobs().as_ref(), &record).await {
        Ok(r) => r,
        Err(e) => return json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()).into_response(),
    };
    let response = serde_json::json!({ "batch": record, "results": results });
    (StatusCode::OK, Json(response)).into_response()
}
