//! `callflow serve`: HTTP JSON API over the inference engine and the batch
//! runner, backed by in-memory stores loaded at start-up.
//!
//! - CORS headers on all responses (permissive)
//! - Optional API key authentication via `CALLFLOW_API_KEY` or `[serve].api_key`
//!
//! Endpoints:
//! - GET  /health         - Server status (exempt from auth)
//! - POST /inference      - One orchestrator invocation
//! - POST /batches        - Submit a batch; runs in the background
//! - GET  /batches/{id}   - Batch record and results
//!
//! All responses use Content-Type: application/json.

mod handlers;
mod middleware;
mod state;

use std::path::Path;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{middleware as axum_middleware, Json, Router};
use tower_http::cors::{Any, CorsLayer};

use self::handlers::{
    handle_get_batch, handle_health, handle_inference, handle_not_found, handle_submit_batch,
};
use self::middleware::auth_middleware;
use self::state::AppState;
use crate::config::CliConfig;
use crate::runtime::Runtime;

/// Maximum request body size: 10 MB.
const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Construct a JSON error response with the given status code and message.
fn json_error(status: StatusCode, message: &str) -> impl IntoResponse {
    (status, Json(serde_json::json!({"error": message})))
}

pub(crate) fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/inference", post(handle_inference))
        .route("/batches", post(handle_submit_batch))
        .route("/batches/{id}", get(handle_get_batch))
        .fallback(handle_not_found)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .with_state(state)
}

pub async fn start_server(
    rules: &Path,
    tests: Option<&Path>,
    config: &CliConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = Runtime::load(rules, tests, config)?;
    let api_key = config.serve.api_key.clone();
    if api_key.is_some() {
        tracing::info!("API key authentication enabled");
    }

    let state = Arc::new(AppState {
        engine: runtime.engine,
        coordinator: runtime.coordinator,
        api_key,
    });
    let app = router(state);

    let addr = format!("0.0.0.0:{}", config.serve.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("callflow listening on http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server shut down");
    Ok(())
}

/// Wait for Ctrl+C. If the handler cannot be installed, run until killed.
async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
    tracing::info!("received shutdown signal");
}
