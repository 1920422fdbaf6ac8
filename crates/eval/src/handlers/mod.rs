//! Local rule-type handlers.
//!
//! Local rule types are resolved in-process; every other type is handed
//! to the telephony platform. [`dispatch`] matches exhaustively on
//! [`RuleType`] so a new type cannot be added without deciding where it
//! runs.

mod distribution;
mod metric;
mod rule_set;
mod set_attributes;
mod text_inference;
mod update_states;

pub use distribution::{parse_options, select_rule_set, DistributionOption};

use callflow_interchange::{Rule, RuleSet, RuleType};
use serde_json::Value;

use crate::collab::Collaborators;
use crate::error::EngineError;
use crate::state::SessionState;

/// What the orchestrator does after a rule has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Resolve the next rule in the same rule set.
    Continue,
    /// Persist, re-read state and resolve a new rule set.
    RuleSetChanged,
    /// Persist and suspend until the platform calls back.
    Remote,
}

/// Everything a handler can see besides the session.
pub struct HandlerContext<'a> {
    pub rule_set: &'a RuleSet,
    pub rule: &'a Rule,
    pub collaborators: &'a Collaborators,
    pub attribute_limit: usize,
}

pub async fn dispatch(
    ctx: &HandlerContext<'_>,
    state: &mut SessionState,
) -> Result<HandlerOutcome, EngineError> {
    match ctx.rule.rule_type {
        RuleType::RuleSet => rule_set::handle(ctx, state),
        RuleType::UpdateStates => update_states::handle(ctx, state),
        RuleType::SetAttributes => set_attributes::handle(ctx, state),
        RuleType::TextInference => text_inference::handle(ctx, state).await,
        RuleType::Distribution => distribution::handle(ctx, state),
        RuleType::Metric => metric::handle(ctx, state).await,
        RuleType::Message
        | RuleType::SmsMessage
        | RuleType::DtmfMenu
        | RuleType::DtmfInput
        | RuleType::NluMenu
        | RuleType::NluInput
        | RuleType::Queue
        | RuleType::Terminate
        | RuleType::ExternalNumber
        | RuleType::Integration
        | RuleType::Wait => Ok(HandlerOutcome::Remote),
    }
}

/// Read a key/value list parameter. Accepts an array of
/// `{"key", "value"}` objects, a plain object, or either encoded as a
/// JSON string. Absent parameters yield an empty list.
pub(crate) fn key_value_pairs(rule: &Rule, param: &str) -> Result<Vec<(String, Value)>, EngineError> {
    let invalid = |message: String| EngineError::InvalidParam {
        rule: rule.name.clone(),
        param: param.to_string(),
        message,
    };

    let raw = match rule.params.get(param) {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(Vec::new()),
        Some(Value::String(s)) => {
            serde_json::from_str::<Value>(s).map_err(|e| invalid(format!("not JSON: {}", e)))?
        }
        Some(other) => other.clone(),
    };

    match raw {
        Value::Object(map) => Ok(map.into_iter().collect()),
        Value::Array(items) => items
            .into_iter()
            .map(|item| {
                let key = item
                    .get("key")
                    .and_then(Value::as_str)
                    .filter(|k| !k.is_empty())
                    .ok_or_else(|| invalid("entry without a key".to_string()))?;
                let value = item.get("value").cloned().unwrap_or(Value::Null);
                Ok((key.to_string(), value))
            })
            .collect(),
        other => Err(invalid(format!("expected a list or object, got {}", other))),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use callflow_interchange::{Rule, RuleSet, RuleType};
    use serde_json::Value;

    pub fn rule(name: &str, rule_type: RuleType, params: Value) -> Rule {
        Rule {
            rule_id: format!("id-{}", name),
            rule_set_id: "rs-main".to_string(),
            name: name.to_string(),
            enabled: true,
            priority: 0,
            activation: Value::Null,
            rule_type,
            params: serde_json::from_value(params).unwrap_or_default(),
        }
    }

    pub fn rule_set(name: &str, rules: Vec<Rule>) -> RuleSet {
        RuleSet {
            rule_set_id: format!("rs-{}", name),
            name: name.to_string(),
            enabled: true,
            folder: String::new(),
            endpoints: Vec::new(),
            rules,
        }
    }
}
