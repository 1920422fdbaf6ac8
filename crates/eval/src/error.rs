use callflow_storage::StorageError;

use crate::collab::CollaboratorError;

/// Errors raised by the inference engine.
///
/// Configuration errors abort the current invocation and propagate to the
/// platform unchanged; nothing inside the engine retries them. Storage and
/// platform errors are the transient class.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// No rule set could be resolved by `NextRuleSet`, `CurrentRuleSet` or
    /// the dialed number.
    #[error("no rule set resolvable for session {session_id} (dialed number: {dialed_number:?})")]
    NoRuleSet {
        session_id: String,
        dialed_number: Option<String>,
    },

    #[error("rule set not found: {name}")]
    RuleSetNotFound { name: String },

    #[error("rule '{rule}' not found in rule set '{rule_set}'")]
    RuleNotFound { rule_set: String, rule: String },

    /// The rule set ran out of rules and there is no frame to return to.
    #[error("rule set '{rule_set}' exhausted with an empty return stack")]
    RuleSetExhausted { rule_set: String },

    /// A pop was requested on an empty return stack.
    #[error("return stack is empty")]
    ReturnStackEmpty,

    #[error("contact attribute delta has {count} entries, limit is {limit}")]
    AttributeDeltaOverflow { count: usize, limit: usize },

    #[error("contact attributes would hold {count} entries, limit is {limit}")]
    AttributeLimit { count: usize, limit: usize },

    #[error("invalid distribution on rule '{rule}': {message}")]
    Distribution { rule: String, message: String },

    #[error("invalid parameter '{param}' on rule '{rule}': {message}")]
    InvalidParam {
        rule: String,
        param: String,
        message: String,
    },

    #[error("malformed session value for '{key}': {message}")]
    MalformedState { key: String, message: String },

    /// Guard against rule-set cycles that never reach a remote rule.
    #[error("session {session_id} exceeded {max_steps} resolution steps")]
    StepLimit { session_id: String, max_steps: usize },

    #[error("invalid engine configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("platform call failed: {0}")]
    Platform(#[from] CollaboratorError),
}

impl EngineError {
    /// True for configuration errors, which must never be retried.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, EngineError::Storage(_) | EngineError::Platform(_))
    }
}
