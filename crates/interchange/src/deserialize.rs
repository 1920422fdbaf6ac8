//! Deserialization of rule bundles from JSON.
//!
//! The main entry point is [`from_bundle_json`], which takes a
//! `&serde_json::Value` and produces a validated [`RuleBundle`].

use std::collections::BTreeSet;
use std::fmt;

use crate::types::*;

/// Errors during rule bundle deserialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterchangeError {
    /// The bundle is missing a required top-level field.
    MissingField { field: String },
    /// A rule set or rule is malformed.
    ConstructError {
        kind: String,
        id: String,
        message: String,
    },
    /// A rule names a type outside the closed rule-type set.
    UnknownRuleType { rule: String, rule_type: String },
    /// The bundle structure is invalid.
    InvalidBundle(String),
}

impl fmt::Display for InterchangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterchangeError::MissingField { field } => {
                write!(f, "bundle missing required field: '{}'", field)
            }
            InterchangeError::ConstructError { kind, id, message } => {
                write!(f, "{} '{}': {}", kind, id, message)
            }
            InterchangeError::UnknownRuleType { rule, rule_type } => {
                write!(f, "rule '{}' has unknown type '{}'", rule, rule_type)
            }
            InterchangeError::InvalidBundle(msg) => {
                write!(f, "invalid bundle: {}", msg)
            }
        }
    }
}

impl std::error::Error for InterchangeError {}

/// Deserialize a rule bundle.
///
/// Rule types are checked against the closed [`RuleType`] set before the
/// typed decode so that an unknown type is reported by rule name. Rule-set
/// names must be unique, as must rule names within one rule set.
pub fn from_bundle_json(bundle: &serde_json::Value) -> Result<RuleBundle, InterchangeError> {
    let rule_sets = bundle
        .get("rule_sets")
        .and_then(|v| v.as_array())
        .ok_or_else(|| InterchangeError::MissingField {
            field: "rule_sets".to_string(),
        })?;

    for rs in rule_sets {
        let rs_name = rs.get("name").and_then(|v| v.as_str()).unwrap_or("");
        let rules = rs.get("rules").and_then(|v| v.as_array());
        for rule in rules.into_iter().flatten() {
            let rule_name = rule.get("name").and_then(|v| v.as_str()).unwrap_or("");
            let type_str = rule.get("type").and_then(|v| v.as_str()).ok_or_else(|| {
                InterchangeError::ConstructError {
                    kind: "Rule".to_string(),
                    id: format!("{}/{}", rs_name, rule_name),
                    message: "missing 'type' field".to_string(),
                }
            })?;
            if RuleType::parse(type_str).is_none() {
                return Err(InterchangeError::UnknownRuleType {
                    rule: format!("{}/{}", rs_name, rule_name),
                    rule_type: type_str.to_string(),
                });
            }
        }
    }

    let parsed: RuleBundle = serde_json::from_value(bundle.clone())
        .map_err(|e| InterchangeError::InvalidBundle(e.to_string()))?;

    validate(&parsed)?;
    Ok(parsed)
}

/// Deserialize a rule bundle from JSON text.
pub fn from_bundle_str(text: &str) -> Result<RuleBundle, InterchangeError> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| InterchangeError::InvalidBundle(format!("not valid JSON: {}", e)))?;
    from_bundle_json(&value)
}

fn validate(bundle: &RuleBundle) -> Result<(), InterchangeError> {
    let mut seen_sets = BTreeSet::new();
    for rs in &bundle.rule_sets {
        if rs.name.is_empty() {
            return Err(InterchangeError::ConstructError {
                kind: "RuleSet".to_string(),
                id: rs.rule_set_id.clone(),
                message: "name must not be empty".to_string(),
            });
        }
        if !seen_sets.insert(rs.name.as_str()) {
            return Err(InterchangeError::ConstructError {
                kind: "RuleSet".to_string(),
                id: rs.name.clone(),
                message: "duplicate rule set name".to_string(),
            });
        }
        let mut seen_rules = BTreeSet::new();
        for rule in &rs.rules {
            if !seen_rules.insert(rule.name.as_str()) {
                return Err(InterchangeError::ConstructError {
                    kind: "Rule".to_string(),
                    id: format!("{}/{}", rs.name, rule.name),
                    message: "duplicate rule name within rule set".to_string(),
                });
            }
        }
    }
    Ok(())
}
