//! Structured session state.
//!
//! The store holds a flat `String -> String` map. Inside the engine the
//! session is a [`SessionState`]: values are decoded to JSON on load, edits
//! are tracked per key, and only the changed subset is encoded back at the
//! persistence boundary.
//!
//! Key conventions:
//!
//! - `CurrentRule_<param>` keys form the rule-scoped scratch namespace. They
//!   are rewritten in bulk whenever the current rule changes.
//! - `ReturnStack` is a JSON array of `{ruleSetName, ruleName}` frames.
//! - `ContactAttributes` is a JSON object capped by the attribute limit.
//! - `System` is computed once per session.

use std::collections::{BTreeMap, BTreeSet};

use callflow_storage::{FlatState, StateChanges};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::EngineError;

/// Well-known session keys.
pub mod keys {
    pub const CURRENT_RULE_SET: &str = "CurrentRuleSet";
    pub const CURRENT_RULE: &str = "CurrentRule";
    pub const CURRENT_RULE_TYPE: &str = "CurrentRuleType";
    pub const RULE_START: &str = "RuleStart";
    pub const RULE_SET_START: &str = "RuleSetStart";
    pub const NEXT_RULE_SET: &str = "NextRuleSet";
    pub const RETURN_STACK: &str = "ReturnStack";
    pub const SYSTEM: &str = "System";
    pub const CONTACT_ATTRIBUTES: &str = "ContactAttributes";
    pub const INTEGRATION_STATUS: &str = "IntegrationStatus";
    pub const INTEGRATION_RESULT: &str = "IntegrationResult";
    /// Read-only view of the cached config; never persisted.
    pub const CONFIG: &str = "Config";
    pub const CURRENT_RULE_PREFIX: &str = "CurrentRule_";
}

/// Decode a persisted value. Anything that looks like a JSON object or
/// array is parsed back; every other value stays a string.
pub fn decode_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    let looks_structured = (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'));
    if looks_structured {
        if let Ok(v) = serde_json::from_str(trimmed) {
            return v;
        }
    }
    Value::String(raw.to_string())
}

/// Encode a value for persistence. `None` means delete.
pub fn encode_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Render a value as the plain string a caller or template expects.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// One frame of the subroutine return stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnFrame {
    #[serde(rename = "ruleSetName")]
    pub rule_set: String,
    #[serde(rename = "ruleName")]
    pub rule: String,
}

/// A session's state with per-key change tracking.
#[derive(Debug, Clone)]
pub struct SessionState {
    session_id: String,
    values: BTreeMap<String, Value>,
    dirty: BTreeSet<String>,
}

impl SessionState {
    pub fn new(session_id: &str) -> Self {
        SessionState {
            session_id: session_id.to_string(),
            values: BTreeMap::new(),
            dirty: BTreeSet::new(),
        }
    }

    /// Build from persisted values. Nothing is marked changed.
    pub fn from_flat(session_id: &str, flat: &FlatState) -> Self {
        let values = flat
            .iter()
            .map(|(k, v)| (k.clone(), decode_value(v)))
            .collect();
        SessionState {
            session_id: session_id.to_string(),
            values,
            dirty: BTreeSet::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Set a key. Setting `Null` removes it.
    pub fn set(&mut self, key: &str, value: Value) {
        if value.is_null() {
            self.remove(key);
            return;
        }
        self.values.insert(key.to_string(), value);
        self.dirty.insert(key.to_string());
    }

    pub fn set_str(&mut self, key: &str, value: impl Into<String>) {
        self.set(key, Value::String(value.into()));
    }

    pub fn remove(&mut self, key: &str) {
        self.values.remove(key);
        self.dirty.insert(key.to_string());
    }

    pub fn has_changes(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Drain the change set into a subset write.
    pub fn take_changes(&mut self) -> StateChanges {
        let dirty = std::mem::take(&mut self.dirty);
        dirty
            .into_iter()
            .map(|k| {
                let encoded = self.values.get(&k).and_then(encode_value);
                (k, encoded)
            })
            .collect()
    }

    /// The string-valued entries, as returned to the platform. Objects and
    /// arrays stay in the store.
    pub fn string_entries(&self) -> FlatState {
        self.values
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
            .collect()
    }

    pub fn to_json(&self) -> Value {
        Value::Object(
            self.values
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    // ── Position ────────────────────────────────────────────────────

    pub fn current_rule_set(&self) -> Option<&str> {
        self.get_str(keys::CURRENT_RULE_SET)
    }

    pub fn current_rule(&self) -> Option<&str> {
        self.get_str(keys::CURRENT_RULE)
    }

    pub fn set_next_rule_set(&mut self, name: &str) {
        self.set_str(keys::NEXT_RULE_SET, name);
    }

    /// Consume the one-shot `NextRuleSet` directive.
    pub fn take_next_rule_set(&mut self) -> Option<String> {
        let next = self
            .get_str(keys::NEXT_RULE_SET)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        if self.contains(keys::NEXT_RULE_SET) {
            self.remove(keys::NEXT_RULE_SET);
        }
        next
    }

    /// Forget the current rule so resolution restarts at the top of the
    /// current rule set.
    pub fn clear_rule_position(&mut self) {
        for key in [keys::CURRENT_RULE, keys::CURRENT_RULE_TYPE, keys::RULE_START] {
            if self.contains(key) {
                self.remove(key);
            }
        }
    }

    // ── Scratch namespace ───────────────────────────────────────────

    /// Delete every `CurrentRule_*` key.
    pub fn clear_scratch(&mut self) {
        let scoped: Vec<String> = self
            .values
            .keys()
            .filter(|k| k.starts_with(keys::CURRENT_RULE_PREFIX))
            .cloned()
            .collect();
        for key in scoped {
            self.remove(&key);
        }
    }

    pub fn set_scratch(&mut self, param: &str, value: Value) {
        self.set(&format!("{}{}", keys::CURRENT_RULE_PREFIX, param), value);
    }

    pub fn scratch_count(&self) -> usize {
        self.values
            .keys()
            .filter(|k| k.starts_with(keys::CURRENT_RULE_PREFIX))
            .count()
    }

    // ── Return stack ────────────────────────────────────────────────

    pub fn return_stack(&self) -> Result<Vec<ReturnFrame>, EngineError> {
        match self.get(keys::RETURN_STACK) {
            None => Ok(Vec::new()),
            Some(Value::String(s)) if s.is_empty() => Ok(Vec::new()),
            Some(v) => serde_json::from_value(v.clone()).map_err(|e| EngineError::MalformedState {
                key: keys::RETURN_STACK.to_string(),
                message: e.to_string(),
            }),
        }
    }

    fn store_return_stack(&mut self, stack: Vec<ReturnFrame>) -> Result<(), EngineError> {
        let value = serde_json::to_value(stack).map_err(|e| EngineError::MalformedState {
            key: keys::RETURN_STACK.to_string(),
            message: e.to_string(),
        })?;
        self.set(keys::RETURN_STACK, value);
        Ok(())
    }

    pub fn push_return(&mut self, frame: ReturnFrame) -> Result<(), EngineError> {
        let mut stack = self.return_stack()?;
        stack.push(frame);
        self.store_return_stack(stack)
    }

    pub fn peek_return(&self) -> Result<Option<ReturnFrame>, EngineError> {
        Ok(self.return_stack()?.pop())
    }

    pub fn pop_return(&mut self) -> Result<ReturnFrame, EngineError> {
        let mut stack = self.return_stack()?;
        let frame = stack.pop().ok_or(EngineError::ReturnStackEmpty)?;
        self.store_return_stack(stack)?;
        Ok(frame)
    }

    // ── Contact attributes ──────────────────────────────────────────

    pub fn contact_attributes(&self) -> Map<String, Value> {
        match self.get(keys::CONTACT_ATTRIBUTES) {
            Some(Value::Object(m)) => m.clone(),
            _ => Map::new(),
        }
    }

    fn store_attributes(&mut self, attrs: Map<String, Value>, limit: usize) -> Result<(), EngineError> {
        if attrs.len() > limit {
            return Err(EngineError::AttributeLimit {
                count: attrs.len(),
                limit,
            });
        }
        self.set(keys::CONTACT_ATTRIBUTES, Value::Object(attrs));
        Ok(())
    }

    /// Set one contact attribute, failing if the map would exceed `limit`.
    pub fn set_contact_attribute(
        &mut self,
        key: &str,
        value: &str,
        limit: usize,
    ) -> Result<(), EngineError> {
        let mut attrs = self.contact_attributes();
        attrs.insert(key.to_string(), Value::String(value.to_string()));
        self.store_attributes(attrs, limit)
    }

    /// Add platform-reported attributes the session does not hold yet.
    /// Session values win on conflict.
    pub fn merge_platform_attributes(
        &mut self,
        platform: &BTreeMap<String, String>,
        limit: usize,
    ) -> Result<(), EngineError> {
        let mut attrs = self.contact_attributes();
        let mut added = false;
        for (k, v) in platform {
            if !attrs.contains_key(k) {
                attrs.insert(k.clone(), Value::String(v.clone()));
                added = true;
            }
        }
        if !added && self.contains(keys::CONTACT_ATTRIBUTES) {
            return Ok(());
        }
        self.store_attributes(attrs, limit)
    }

    /// Session attributes whose value differs from, or is missing on, the
    /// platform side. Ordered by key.
    pub fn attribute_delta(&self, platform: &BTreeMap<String, String>) -> Vec<(String, String)> {
        self.contact_attributes()
            .iter()
            .map(|(k, v)| (k.clone(), display_value(v)))
            .filter(|(k, v)| platform.get(k) != Some(v))
            .collect()
    }

    // ── Paths and templates ─────────────────────────────────────────

    /// Resolve a dotted path such as `ContactAttributes.accountType` or
    /// `IntegrationResult.items.0`.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.values.get(parts.next()?)?;
        for part in parts {
            current = match current {
                Value::Object(m) => m.get(part)?,
                Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Replace every `{{path}}` placeholder with the value at that path.
    /// Unknown paths render as the empty string.
    pub fn render_template(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find("}}") {
                Some(end) => {
                    let path = after[..end].trim();
                    if let Some(v) = self.get_path(path) {
                        out.push_str(&display_value(v));
                    }
                    rest = &after[end + 2..];
                }
                None => {
                    out.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn flat(pairs: &[(&str, &str)]) -> FlatState {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn json_object_round_trips_structurally() {
        let mut state = SessionState::new("s1");
        let obj = json!({"a": 1, "b": {"c": [true, "x"]}});
        state.set("Thing", obj.clone());
        let changes = state.take_changes();
        let persisted: FlatState = changes
            .into_iter()
            .filter_map(|(k, v)| v.map(|v| (k, v)))
            .collect();
        let reloaded = SessionState::from_flat("s1", &persisted);
        assert_eq!(reloaded.get("Thing"), Some(&obj));
    }

    #[test]
    fn non_json_braces_stay_strings() {
        let state = SessionState::from_flat("s1", &flat(&[("Odd", "{not json}")]));
        assert_eq!(state.get_str("Odd"), Some("{not json}"));
    }

    #[test]
    fn take_changes_reports_deletes() {
        let mut state = SessionState::from_flat("s1", &flat(&[("A", "1"), ("B", "2")]));
        state.remove("A");
        state.set_str("C", "3");
        let changes = state.take_changes();
        assert_eq!(changes.get("A"), Some(&None));
        assert_eq!(changes.get("C"), Some(&Some("3".to_string())));
        assert!(!changes.contains_key("B"));
        assert!(!state.has_changes());
    }

    #[test]
    fn clear_scratch_only_touches_rule_scope() {
        let mut state = SessionState::from_flat(
            "s1",
            &flat(&[
                ("CurrentRule_message", "hi"),
                ("CurrentRule_x", "1"),
                ("CurrentRule", "Welcome"),
            ]),
        );
        state.clear_scratch();
        assert_eq!(state.scratch_count(), 0);
        assert_eq!(state.current_rule(), Some("Welcome"));
    }

    #[test]
    fn push_then_pop_restores_frame() {
        let mut state = SessionState::new("s1");
        let frame = ReturnFrame {
            rule_set: "Main".into(),
            rule: "Menu".into(),
        };
        state.push_return(frame.clone()).unwrap();
        assert_eq!(state.peek_return().unwrap(), Some(frame.clone()));
        assert_eq!(state.pop_return().unwrap(), frame);
        assert!(state.return_stack().unwrap().is_empty());
    }

    #[test]
    fn over_pop_is_an_error() {
        let mut state = SessionState::new("s1");
        assert!(matches!(
            state.pop_return(),
            Err(EngineError::ReturnStackEmpty)
        ));
    }

    #[test]
    fn return_stack_uses_wire_field_names() {
        let mut state = SessionState::new("s1");
        state
            .push_return(ReturnFrame {
                rule_set: "A".into(),
                rule: "r".into(),
            })
            .unwrap();
        let changes = state.take_changes();
        assert_eq!(
            changes.get("ReturnStack"),
            Some(&Some(r#"[{"ruleSetName":"A","ruleName":"r"}]"#.to_string()))
        );
    }

    #[test]
    fn session_attribute_wins_on_merge() {
        let mut state = SessionState::from_flat(
            "s1",
            &flat(&[("ContactAttributes", r#"{"tier":"gold"}"#)]),
        );
        let platform: BTreeMap<String, String> = [("tier", "silver"), ("lang", "en")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        state.merge_platform_attributes(&platform, 200).unwrap();
        let attrs = state.contact_attributes();
        assert_eq!(attrs["tier"], json!("gold"));
        assert_eq!(attrs["lang"], json!("en"));
        assert_eq!(
            state.attribute_delta(&platform),
            vec![("tier".to_string(), "gold".to_string())]
        );
    }

    #[test]
    fn attribute_cap_is_enforced() {
        let mut state = SessionState::new("s1");
        for i in 0..3 {
            state.set_contact_attribute(&format!("k{}", i), "v", 3).unwrap();
        }
        assert!(matches!(
            state.set_contact_attribute("k3", "v", 3),
            Err(EngineError::AttributeLimit { count: 4, limit: 3 })
        ));
    }

    #[test]
    fn dotted_paths_and_templates() {
        let state = SessionState::from_flat(
            "s1",
            &flat(&[
                ("ContactAttributes", r#"{"name":"Ada"}"#),
                ("IntegrationResult", r#"{"items":[{"id":7}]}"#),
            ]),
        );
        assert_eq!(
            state.get_path("IntegrationResult.items.0.id"),
            Some(&json!(7))
        );
        assert_eq!(
            state.render_template("Hi {{ContactAttributes.name}}, {{Missing}}!"),
            "Hi Ada, !"
        );
        assert_eq!(state.render_template("no close {{x"), "no close {{x");
    }

    #[test]
    fn next_rule_set_is_one_shot() {
        let mut state = SessionState::new("s1");
        state.set_next_rule_set("Billing");
        assert_eq!(state.take_next_rule_set().as_deref(), Some("Billing"));
        assert_eq!(state.take_next_rule_set(), None);
    }

    #[test]
    fn string_entries_leave_out_structured_values() {
        let mut state = SessionState::from_flat("s1", &flat(&[("A", "x"), ("Stack", "[]")]));
        state.set("B", json!({"k": 1}));
        state.set("N", json!(3));
        let entries = state.string_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries["A"], "x");
    }
}
