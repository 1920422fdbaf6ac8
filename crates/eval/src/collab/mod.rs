//! External collaborators of the inference engine.
//!
//! The engine never talks to the outside world directly. Intent
//! classification, metrics emission and platform attribute reads each sit
//! behind an async trait so a deployment can plug in its own backend and
//! tests can plug in fakes.
//!
//! - [`IntentClassifier`]: free text to an intent with a confidence
//! - [`MetricsSink`]: named counters with dimensions
//! - [`PlatformClient`]: contact attributes held by the telephony platform
//! - [`RandomSource`]: uniform draws for weighted distribution

pub mod http;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub use http::{HttpIntentClassifier, HttpPlatformClient};

// ──────────────────────────────────────────────
// CollaboratorError
// ──────────────────────────────────────────────

/// Failure reported by a collaborator.
///
/// Transient failures may be retried with backoff; permanent ones are
/// returned to the caller as-is.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollaboratorError {
    #[error("transient: {0}")]
    Transient(String),
    #[error("{0}")]
    Permanent(String),
}

impl CollaboratorError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CollaboratorError::Transient(_))
    }
}

// ──────────────────────────────────────────────
// Traits
// ──────────────────────────────────────────────

/// A classified intent.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Intent {
    pub name: String,
    pub confidence: f64,
}

#[async_trait]
pub trait IntentClassifier: Send + Sync {
    /// Classify `text` in the context of a session. `Ok(None)` means no
    /// intent was recognised.
    async fn classify(&self, session_id: &str, text: &str)
        -> Result<Option<Intent>, CollaboratorError>;
}

#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn emit(
        &self,
        name: &str,
        value: f64,
        dimensions: &BTreeMap<String, String>,
    ) -> Result<(), CollaboratorError>;
}

/// Read access to the telephony platform's view of a contact.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    async fn get_contact_attributes(
        &self,
        session_id: &str,
    ) -> Result<BTreeMap<String, String>, CollaboratorError>;
}

/// Source of uniform draws in `[0, 100)` used by weighted distribution.
pub trait RandomSource: Send + Sync {
    fn roll_percent(&self) -> f64;
}

// ──────────────────────────────────────────────
// Built-in implementations
// ──────────────────────────────────────────────

/// Writes every metric to the tracing log.
pub struct LogMetrics;

#[async_trait]
impl MetricsSink for LogMetrics {
    async fn emit(
        &self,
        name: &str,
        value: f64,
        dimensions: &BTreeMap<String, String>,
    ) -> Result<(), CollaboratorError> {
        tracing::info!(metric = name, value, ?dimensions, "metric");
        Ok(())
    }
}

/// Thread-local RNG.
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn roll_percent(&self) -> f64 {
        rand::thread_rng().gen_range(0.0..100.0)
    }
}

/// Seeded RNG for reproducible runs.
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        SeededRandom {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandom {
    fn roll_percent(&self) -> f64 {
        let mut rng = match self.rng.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        rng.gen_range(0.0..100.0)
    }
}

/// The engine's collaborator set.
#[derive(Clone)]
pub struct Collaborators {
    pub classifier: Option<Arc<dyn IntentClassifier>>,
    pub metrics: Arc<dyn MetricsSink>,
    pub platform: Option<Arc<dyn PlatformClient>>,
    pub random: Arc<dyn RandomSource>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Collaborators {
            classifier: None,
            metrics: Arc::new(LogMetrics),
            platform: None,
            random: Arc::new(ThreadRandom),
        }
    }
}
