//! Application state shared across request handlers.

use std::sync::Arc;

use callflow_batch::BatchCoordinator;
use callflow_eval::Orchestrator;

pub(crate) struct AppState {
    pub(crate) engine: Arc<Orchestrator>,
    /// Batches run in the background on this coordinator.
    pub(crate) coordinator: Arc<BatchCoordinator>,
    /// Optional API key for authentication. None = no auth required.
    pub(crate) api_key: Option<String>,
}
