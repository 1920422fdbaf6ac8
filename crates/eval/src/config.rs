//! Engine settings.
//!
//! Loaded by the CLI from the `[engine]` table of `callflow.toml`; every
//! field has a default so an empty table is valid.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use crate::retry::RetryPolicy;

/// Hard cap on entries in `ContactAttributes` and on a queue export delta.
pub const CONTACT_ATTRIBUTE_LIMIT: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Session state time-to-live, reset on every write.
    pub state_ttl_secs: u64,
    /// Maximum resolution steps in one invocation before failing.
    pub max_steps: usize,
    /// May be lowered, never raised past [`CONTACT_ATTRIBUTE_LIMIT`].
    #[serde(deserialize_with = "capped_attribute_limit")]
    pub attribute_limit: usize,
    /// Backoff for platform attribute calls.
    pub retry: RetryPolicy,
    pub integration: IntegrationWait,
    /// UTC offset used when the `TimeZone` config key is absent.
    pub default_time_zone: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            state_ttl_secs: 24 * 60 * 60,
            max_steps: 100,
            attribute_limit: CONTACT_ATTRIBUTE_LIMIT,
            retry: RetryPolicy::default(),
            integration: IntegrationWait::default(),
            default_time_zone: "+00:00".to_string(),
        }
    }
}

fn capped_attribute_limit<'de, D: Deserializer<'de>>(deserializer: D) -> Result<usize, D::Error> {
    let limit = usize::deserialize(deserializer)?;
    if limit > CONTACT_ATTRIBUTE_LIMIT {
        return Err(D::Error::custom(format!(
            "attribute_limit {} exceeds the cap of {}",
            limit, CONTACT_ATTRIBUTE_LIMIT
        )));
    }
    Ok(limit)
}

/// Bounded wait for an integration's completion signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrationWait {
    pub window_ms: u64,
    pub poll_ms: u64,
}

impl Default for IntegrationWait {
    fn default() -> Self {
        IntegrationWait {
            window_ms: 5_000,
            poll_ms: 250,
        }
    }
}
