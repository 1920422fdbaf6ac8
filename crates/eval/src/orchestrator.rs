//! Session inference orchestrator.
//!
//! One invocation walks the rule graph for one session until it reaches a
//! rule the telephony platform has to render:
//!
//! ```text
//! ResolveRuleSet -> ResolveNextRule -> LocalDispatch  -> (loop)
//!                                   -> RemoteDispatch -> persist, suspend
//!                                   -> PopReturn      -> (loop, reload)
//! ```
//!
//! A rule-set change persists the session and re-reads it from the store
//! before the next pass, so every pass starts from durable state.

use std::collections::BTreeMap;
use std::sync::Arc;

use callflow_interchange::{Rule, RuleRef, RuleSet, RuleType};
use callflow_storage::{ConfigStore, FlatState, SessionStore};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::format_description::well_known::Rfc3339;

use crate::cache::{CachedConfig, RuleSetCache};
use crate::collab::Collaborators;
use crate::config::{EngineConfig, CONTACT_ATTRIBUTE_LIMIT};
use crate::error::EngineError;
use crate::evaluator::{ActivationEvaluator, ConditionEvaluator};
use crate::handlers::{dispatch, HandlerContext, HandlerOutcome};
use crate::integration::{IntegrationMonitor, STATUS_RUNNING};
use crate::retry::with_backoff;
use crate::state::{display_value, keys, SessionState};
use crate::system::{compute_system, parse_offset, Clock, SystemClock};

/// What the platform is reporting on this invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InferenceEvent {
    /// A new contact arrived.
    NewInteraction,
    /// The platform finished rendering the current rule.
    NextStep,
    /// The caller answered a menu or input rule.
    UserInput { input: String },
    /// An integration reported back.
    IntegrationCallback {
        status: String,
        #[serde(default)]
        result: Value,
    },
    /// Block until the running integration settles, then continue.
    IntegrationWait,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub session_id: String,
    #[serde(default)]
    pub dialed_number: Option<String>,
    pub event: InferenceEvent,
    /// Platform-reported contact attributes, if the platform sent them.
    #[serde(default)]
    pub contact_attributes: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResponse {
    pub session_id: String,
    /// The session's string-valued entries. Objects and arrays such as
    /// `System` or `ContactAttributes` are left out.
    pub state: FlatState,
    /// Rules activated during this invocation, in order.
    pub activated: Vec<RuleRef>,
}

enum Resolution {
    Rule(usize),
    PopReturn,
}

pub struct Orchestrator {
    cache: RuleSetCache,
    sessions: Arc<dyn SessionStore>,
    evaluator: Arc<dyn ActivationEvaluator>,
    collaborators: Collaborators,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl Orchestrator {
    /// An orchestrator with the reference evaluator, the system clock and
    /// default collaborators.
    pub fn new(config_store: Arc<dyn ConfigStore>, sessions: Arc<dyn SessionStore>) -> Self {
        Orchestrator {
            cache: RuleSetCache::new(config_store),
            sessions,
            evaluator: Arc::new(ConditionEvaluator),
            collaborators: Collaborators::default(),
            clock: Arc::new(SystemClock),
            config: EngineConfig::default(),
        }
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn ActivationEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_collaborators(mut self, collaborators: Collaborators) -> Self {
        self.collaborators = collaborators;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// `attribute_limit` is clamped to [`CONTACT_ATTRIBUTE_LIMIT`].
    pub fn with_config(mut self, mut config: EngineConfig) -> Self {
        config.attribute_limit = config.attribute_limit.min(CONTACT_ATTRIBUTE_LIMIT);
        self.config = config;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current durable state of a session.
    pub async fn session_state(&self, session_id: &str) -> Result<SessionState, EngineError> {
        let flat = self.sessions.get_state(session_id).await?;
        Ok(SessionState::from_flat(session_id, &flat))
    }

    #[tracing::instrument(skip(self, request), fields(session_id = %request.session_id))]
    pub async fn invoke(&self, request: InferenceRequest) -> Result<InferenceResponse, EngineError> {
        let cfg = self.cache.snapshot().await?;

        if request.event == InferenceEvent::IntegrationWait {
            let monitor = IntegrationMonitor::new(
                Arc::clone(&self.sessions),
                self.config.integration.clone(),
                self.config.state_ttl_secs,
            );
            let status = monitor.wait(&request.session_id).await?;
            tracing::debug!(status = %status, "integration settled");
        }

        let mut state = self.session_state(&request.session_id).await?;
        let platform_attrs = self.platform_attributes(&request).await?;
        if !platform_attrs.is_empty() || !state.contains(keys::CONTACT_ATTRIBUTES) {
            state.merge_platform_attributes(&platform_attrs, self.config.attribute_limit)?;
        }

        if !state.contains(keys::SYSTEM) {
            let system = self.compute_system(&cfg, request.dialed_number.as_deref())?;
            state.set(keys::SYSTEM, system);
            tracing::info!(dialed_number = ?request.dialed_number, "session started");
        }

        self.apply_event(&cfg, &mut state, &request.event)?;

        let mut activated = Vec::new();
        let mut reload = false;
        for _ in 0..self.config.max_steps {
            if reload {
                self.persist(&mut state).await?;
                state = self.session_state(&request.session_id).await?;
                reload = false;
            }

            let rule_set = self.resolve_rule_set(&cfg, &mut state, request.dialed_number.as_deref())?;
            let rule = match self.resolve_next_rule(&cfg, rule_set, &state)? {
                Resolution::PopReturn => {
                    self.pop_return(rule_set, &mut state)?;
                    reload = true;
                    continue;
                }
                Resolution::Rule(index) => rule_set.rules.get(index).ok_or_else(|| {
                    EngineError::Config(format!(
                        "evaluator chose index {} of {} in rule set '{}'",
                        index,
                        rule_set.rules.len(),
                        rule_set.name
                    ))
                })?,
            };

            self.activate(rule_set, rule, &mut state, &platform_attrs)?;
            activated.push(RuleRef {
                rule_set: rule_set.name.clone(),
                rule: rule.name.clone(),
            });

            let ctx = HandlerContext {
                rule_set,
                rule,
                collaborators: &self.collaborators,
                attribute_limit: self.config.attribute_limit,
            };
            match dispatch(&ctx, &mut state).await? {
                HandlerOutcome::Continue => {}
                HandlerOutcome::RuleSetChanged => reload = true,
                HandlerOutcome::Remote => {
                    self.persist(&mut state).await?;
                    tracing::info!(
                        rule_set = %rule_set.name,
                        rule = %rule.name,
                        rule_type = %rule.rule_type,
                        "suspending on remote rule"
                    );
                    return Ok(InferenceResponse {
                        session_id: request.session_id.clone(),
                        state: state.string_entries(),
                        activated,
                    });
                }
            }
        }

        Err(EngineError::StepLimit {
            session_id: request.session_id.clone(),
            max_steps: self.config.max_steps,
        })
    }

    /// Attributes from the request, or from the platform with retry.
    async fn platform_attributes(
        &self,
        request: &InferenceRequest,
    ) -> Result<BTreeMap<String, String>, EngineError> {
        if let Some(attrs) = &request.contact_attributes {
            return Ok(attrs.clone());
        }
        let Some(platform) = self.collaborators.platform.as_ref() else {
            return Ok(BTreeMap::new());
        };
        let attrs = with_backoff(
            &self.config.retry,
            "get_contact_attributes",
            |e: &crate::collab::CollaboratorError| e.is_transient(),
            || platform.get_contact_attributes(&request.session_id),
        )
        .await?;
        Ok(attrs)
    }

    fn now(&self) -> String {
        self.clock
            .now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| "unknown".to_string())
    }

    fn compute_system(&self, cfg: &CachedConfig, dialed: Option<&str>) -> Result<Value, EngineError> {
        let default_offset = parse_offset(&self.config.default_time_zone).ok_or_else(|| {
            EngineError::Config(format!(
                "invalid default_time_zone '{}'",
                self.config.default_time_zone
            ))
        })?;
        Ok(compute_system(
            self.clock.now_utc(),
            dialed,
            &cfg.config,
            &cfg.holidays,
            default_offset,
        ))
    }

    fn current_rule<'c>(&self, cfg: &'c CachedConfig, state: &SessionState) -> Option<&'c Rule> {
        cfg.rule_set(state.current_rule_set()?)?
            .rule(state.current_rule()?)
    }

    fn apply_event(
        &self,
        cfg: &CachedConfig,
        state: &mut SessionState,
        event: &InferenceEvent,
    ) -> Result<(), EngineError> {
        match event {
            InferenceEvent::NewInteraction | InferenceEvent::NextStep | InferenceEvent::IntegrationWait => {}
            InferenceEvent::UserInput { input } => {
                state.set_str("UserInput", input.as_str());
                let Some(rule) = self.current_rule(cfg, state) else {
                    return Ok(());
                };
                if !rule.rule_type.collects_input() {
                    tracing::debug!(rule = %rule.name, rule_type = %rule.rule_type, "input for a rule that collects none");
                    return Ok(());
                }
                match rule.rule_type {
                    RuleType::DtmfMenu | RuleType::NluMenu => {
                        let prefix = if rule.rule_type == RuleType::DtmfMenu {
                            "dtmf"
                        } else {
                            "intent"
                        };
                        match rule.param_str(&format!("{}{}", prefix, input)) {
                            Some(target) if !target.is_empty() => state.set_next_rule_set(&target),
                            _ => tracing::debug!(rule = %rule.name, input = %input, "menu input without a branch"),
                        }
                    }
                    RuleType::DtmfInput | RuleType::NluInput => {
                        let key = rule
                            .param_str("outputStateKey")
                            .filter(|k| !k.is_empty())
                            .unwrap_or_else(|| "UserInput".to_string());
                        state.set_str(&key, input.as_str());
                    }
                    _ => {}
                }
            }
            InferenceEvent::IntegrationCallback { status, result } => {
                state.set_str(keys::INTEGRATION_STATUS, status.as_str());
                let merged = match (state.get(keys::INTEGRATION_RESULT), result) {
                    (Some(Value::Object(existing)), Value::Object(incoming)) => {
                        let mut merged = existing.clone();
                        merged.extend(incoming.clone());
                        Value::Object(merged)
                    }
                    (_, incoming) => incoming.clone(),
                };
                state.set(keys::INTEGRATION_RESULT, merged);
            }
        }
        Ok(())
    }

    fn resolve_rule_set<'c>(
        &self,
        cfg: &'c CachedConfig,
        state: &mut SessionState,
        dialed: Option<&str>,
    ) -> Result<&'c RuleSet, EngineError> {
        if let Some(next) = state.take_next_rule_set() {
            state.clear_rule_position();
            let rule_set = cfg
                .rule_set(&next)
                .ok_or(EngineError::RuleSetNotFound { name: next })?;
            state.set_str(keys::CURRENT_RULE_SET, rule_set.name.as_str());
            state.set_str(keys::RULE_SET_START, self.now());
            tracing::debug!(rule_set = %rule_set.name, "entered rule set");
            return Ok(rule_set);
        }

        if let Some(current) = state.current_rule_set() {
            return cfg.rule_set(current).ok_or_else(|| EngineError::RuleSetNotFound {
                name: current.to_string(),
            });
        }

        let dialed = dialed.map(str::to_string).or_else(|| {
            state
                .get_path("System.DialedNumber")
                .map(display_value)
                .filter(|d| !d.is_empty())
        });
        let rule_set = dialed
            .as_deref()
            .and_then(|d| cfg.rule_set_for_number(d))
            .ok_or_else(|| EngineError::NoRuleSet {
                session_id: state.session_id().to_string(),
                dialed_number: dialed.clone(),
            })?;
        state.set_str(keys::CURRENT_RULE_SET, rule_set.name.as_str());
        state.set_str(keys::RULE_SET_START, self.now());
        tracing::debug!(rule_set = %rule_set.name, "entered initial rule set");
        Ok(rule_set)
    }

    fn resolve_next_rule(
        &self,
        cfg: &CachedConfig,
        rule_set: &RuleSet,
        state: &SessionState,
    ) -> Result<Resolution, EngineError> {
        let start = match state.current_rule() {
            None => 0,
            Some(name) => {
                rule_set
                    .rule_index(name)
                    .ok_or_else(|| EngineError::RuleNotFound {
                        rule_set: rule_set.name.clone(),
                        rule: name.to_string(),
                    })?
                    + 1
            }
        };
        if start >= rule_set.rules.len() {
            return Ok(Resolution::PopReturn);
        }

        let mut view = state.to_json();
        if let Value::Object(map) = &mut view {
            map.insert(keys::CONFIG.to_string(), cfg.config_json());
        }
        Ok(match self.evaluator.next_rule(&rule_set.rules, start, &view) {
            Some(index) => Resolution::Rule(index),
            None => Resolution::PopReturn,
        })
    }

    fn pop_return(&self, rule_set: &RuleSet, state: &mut SessionState) -> Result<(), EngineError> {
        let frame = match state.pop_return() {
            Ok(frame) => frame,
            Err(EngineError::ReturnStackEmpty) => {
                return Err(EngineError::RuleSetExhausted {
                    rule_set: rule_set.name.clone(),
                })
            }
            Err(e) => return Err(e),
        };
        tracing::debug!(
            from = %rule_set.name,
            rule_set = %frame.rule_set,
            rule = %frame.rule,
            "returning to caller"
        );
        state.clear_scratch();
        state.remove(keys::CURRENT_RULE_TYPE);
        state.set_str(keys::CURRENT_RULE_SET, frame.rule_set);
        state.set_str(keys::CURRENT_RULE, frame.rule);
        Ok(())
    }

    /// Make `rule` current: rewrite the scratch namespace and position keys.
    fn activate(
        &self,
        rule_set: &RuleSet,
        rule: &Rule,
        state: &mut SessionState,
        platform_attrs: &BTreeMap<String, String>,
    ) -> Result<(), EngineError> {
        let delta = if rule.rule_type == RuleType::Queue {
            let delta = state.attribute_delta(platform_attrs);
            if delta.len() > self.config.attribute_limit {
                return Err(EngineError::AttributeDeltaOverflow {
                    count: delta.len(),
                    limit: self.config.attribute_limit,
                });
            }
            delta
        } else {
            Vec::new()
        };

        state.clear_scratch();
        for (param, value) in &rule.params {
            let value = match value {
                Value::String(s) => Value::String(state.render_template(s)),
                Value::Number(_) | Value::Bool(_) => Value::String(display_value(value)),
                other => other.clone(),
            };
            state.set_scratch(param, value);
        }
        for (i, (key, value)) in delta.into_iter().enumerate() {
            state.set_scratch(&format!("attributeKey{}", i + 1), Value::String(key));
            state.set_scratch(&format!("attributeValue{}", i + 1), Value::String(value));
        }

        state.set_str(keys::CURRENT_RULE, rule.name.as_str());
        state.set_str(keys::CURRENT_RULE_TYPE, rule.rule_type.as_str());
        state.set_str(keys::RULE_START, self.now());

        if rule.rule_type == RuleType::Integration {
            state.set_str(keys::INTEGRATION_STATUS, STATUS_RUNNING);
            state.remove(keys::INTEGRATION_RESULT);
        }

        tracing::debug!(
            rule_set = %rule_set.name,
            rule = %rule.name,
            rule_type = %rule.rule_type,
            "rule activated"
        );
        Ok(())
    }

    async fn persist(&self, state: &mut SessionState) -> Result<(), EngineError> {
        let changes = state.take_changes();
        if changes.is_empty() {
            return Ok(());
        }
        self.sessions
            .set_state_subset(state.session_id(), &changes, self.config.state_ttl_secs)
            .await?;
        Ok(())
    }
}
