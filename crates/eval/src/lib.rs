//! callflow session inference engine.
//!
//! Walks the rule graph for one session per invocation: resolves the
//! current rule set and the next active rule, runs local rule types
//! in-process and suspends on rule types the telephony platform renders.
//! State lives in a [`SessionStore`](callflow_storage::SessionStore);
//! configuration comes through a token-invalidated [`RuleSetCache`].
//!
//! ```ignore
//! let engine = Orchestrator::new(config_store, session_store);
//! let response = engine.invoke(InferenceRequest {
//!     session_id: "c-1".into(),
//!     dialed_number: Some("+61200000000".into()),
//!     event: InferenceEvent::NewInteraction,
//!     contact_attributes: None,
//! }).await?;
//! ```

pub mod cache;
pub mod collab;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod handlers;
pub mod integration;
pub mod orchestrator;
pub mod retry;
pub mod state;
pub mod system;

pub use cache::{CachedConfig, RuleSetCache};
pub use collab::{
    CollaboratorError, Collaborators, HttpIntentClassifier, HttpPlatformClient, Intent,
    IntentClassifier, MetricsSink, PlatformClient, RandomSource, SeededRandom, ThreadRandom,
};
pub use config::{EngineConfig, CONTACT_ATTRIBUTE_LIMIT};
pub use error::EngineError;
pub use evaluator::{ActivationEvaluator, ConditionEvaluator};
pub use integration::IntegrationMonitor;
pub use orchestrator::{InferenceEvent, InferenceRequest, InferenceResponse, Orchestrator};
pub use retry::RetryPolicy;
pub use state::{ReturnFrame, SessionState};
pub use system::{Clock, FixedClock, SystemClock};
