//! Bounded wait on an external integration's completion signal.

use std::sync::Arc;
use std::time::Duration;

use callflow_storage::{SessionStore, StateChanges};

use crate::config::IntegrationWait;
use crate::error::EngineError;
use crate::state::keys;

pub const STATUS_RUNNING: &str = "RUNNING";
pub const STATUS_DONE: &str = "DONE";
pub const STATUS_ERROR: &str = "ERROR";
pub const STATUS_TIMEOUT: &str = "TIMEOUT";

/// Polls `IntegrationStatus` in the session store until the integration
/// settles or the window closes.
pub struct IntegrationMonitor {
    sessions: Arc<dyn SessionStore>,
    wait: IntegrationWait,
    ttl_secs: u64,
}

impl IntegrationMonitor {
    pub fn new(sessions: Arc<dyn SessionStore>, wait: IntegrationWait, ttl_secs: u64) -> Self {
        IntegrationMonitor {
            sessions,
            wait,
            ttl_secs,
        }
    }

    /// Wait for `DONE` or `ERROR`. On expiry `TIMEOUT` is written to the
    /// session and returned, so flows can branch on it.
    pub async fn wait(&self, session_id: &str) -> Result<String, EngineError> {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(self.wait.window_ms);
        let poll = Duration::from_millis(self.wait.poll_ms.max(1));
        loop {
            let state = self.sessions.get_state(session_id).await?;
            if let Some(status) = state.get(keys::INTEGRATION_STATUS) {
                if status == STATUS_DONE || status == STATUS_ERROR {
                    return Ok(status.clone());
                }
            }
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(poll).await;
        }

        tracing::warn!(session_id, window_ms = self.wait.window_ms, "integration timed out");
        let changes = StateChanges::from([(
            keys::INTEGRATION_STATUS.to_string(),
            Some(STATUS_TIMEOUT.to_string()),
        )]);
        self.sessions
            .set_state_subset(session_id, &changes, self.ttl_secs)
            .await?;
        Ok(STATUS_TIMEOUT.to_string())
    }
}
