//! Rule activation.
//!
//! The orchestrator asks an [`ActivationEvaluator`] for the next rule to
//! run, starting at a given index of a rule list already sorted by
//! descending priority. [`ConditionEvaluator`] is the reference
//! implementation used by local runs and tests.

use callflow_interchange::Rule;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::state::display_value;

pub trait ActivationEvaluator: Send + Sync {
    /// Index of the first rule at or after `start` whose activation holds
    /// against `state`, or `None`.
    fn next_rule(&self, rules: &[Rule], start: usize, state: &Value) -> Option<usize>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConditionOp {
    Equals,
    NotEquals,
    Exists,
    NotExists,
    Contains,
    Matches,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Condition {
    pub key: String,
    pub op: ConditionOp,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Activation {
    #[serde(default)]
    conditions: Vec<Condition>,
}

/// Resolve a dotted path against a JSON value.
pub fn lookup_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(root, |current, part| match current {
        Value::Object(m) => m.get(part),
        Value::Array(items) => items.get(part.parse::<usize>().ok()?),
        _ => None,
    })
}

impl Condition {
    pub fn holds(&self, state: &Value) -> bool {
        let found = lookup_path(state, &self.key).filter(|v| !v.is_null());
        match self.op {
            ConditionOp::Exists => found.is_some_and(|v| !display_value(v).is_empty()),
            ConditionOp::NotExists => found.map_or(true, |v| display_value(v).is_empty()),
            ConditionOp::Equals => found.is_some_and(|v| display_value(v) == self.value),
            ConditionOp::NotEquals => found.map_or(true, |v| display_value(v) != self.value),
            ConditionOp::Contains => match found {
                Some(Value::Array(items)) => items.iter().any(|i| display_value(i) == self.value),
                Some(v) => display_value(v).contains(&self.value),
                None => false,
            },
            ConditionOp::Matches => match Regex::new(&self.value) {
                Ok(re) => found.is_some_and(|v| re.is_match(&display_value(v))),
                Err(e) => {
                    tracing::warn!(pattern = %self.value, error = %e, "invalid activation pattern");
                    false
                }
            },
        }
    }
}

/// Activates a rule when every condition in its descriptor holds. An empty
/// or absent descriptor always activates; a descriptor that cannot be
/// parsed never does.
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    pub fn is_active(rule: &Rule, state: &Value) -> bool {
        let activation = match &rule.activation {
            Value::Null => return true,
            Value::Object(m) if m.is_empty() => return true,
            other => match Activation::deserialize(other) {
                Ok(a) => a,
                Err(e) => {
                    tracing::warn!(rule = %rule.name, error = %e, "unreadable activation descriptor");
                    return false;
                }
            },
        };
        activation.conditions.iter().all(|c| c.holds(state))
    }
}

impl ActivationEvaluator for ConditionEvaluator {
    fn next_rule(&self, rules: &[Rule], start: usize, state: &Value) -> Option<usize> {
        rules
            .iter()
            .enumerate()
            .skip(start)
            .find(|(_, rule)| Self::is_active(rule, state))
            .map(|(i, _)| i)
    }
}
