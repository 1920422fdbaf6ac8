use serde::{Deserialize, Serialize};

/// Batch runner settings, loaded from the `[batch]` table of
/// `callflow.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Tests run concurrently within one chunk.
    pub batch_width: usize,
    /// Engine round trips allowed per test before it is failed.
    pub max_interactions: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfig {
            batch_width: 10,
            max_interactions: 100,
        }
    }
}
