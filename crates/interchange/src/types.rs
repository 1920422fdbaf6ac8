//! Typed structs for the callflow rule bundle.
//!
//! A rule bundle is the published snapshot of everything the inference
//! engine needs from the rule management side: rule sets with their rules,
//! inbound number routing, config key/values and the holiday calendar.
//! Rule parameters are kept as `serde_json::Value` because each rule type
//! interprets its own parameters.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Parameter map carried by every rule. Keys are the rule type's parameter
/// names (`message`, `ruleSetName`, `optionCount`, ...).
pub type RuleParams = BTreeMap<String, serde_json::Value>;

// ── Rule type ───────────────────────────────────────────────────────

/// The closed set of rule types.
///
/// Local types are resolved in-process by the engine; every other type is
/// rendered by the telephony platform, which calls back when done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RuleType {
    // Local
    RuleSet,
    UpdateStates,
    SetAttributes,
    TextInference,
    Distribution,
    Metric,
    // Remote
    Message,
    #[serde(rename = "SMSMessage")]
    SmsMessage,
    #[serde(rename = "DTMFMenu")]
    DtmfMenu,
    #[serde(rename = "DTMFInput")]
    DtmfInput,
    #[serde(rename = "NLUMenu")]
    NluMenu,
    #[serde(rename = "NLUInput")]
    NluInput,
    Queue,
    Terminate,
    ExternalNumber,
    Integration,
    Wait,
}

impl RuleType {
    pub const ALL: [RuleType; 17] = [
        RuleType::RuleSet,
        RuleType::UpdateStates,
        RuleType::SetAttributes,
        RuleType::TextInference,
        RuleType::Distribution,
        RuleType::Metric,
        RuleType::Message,
        RuleType::SmsMessage,
        RuleType::DtmfMenu,
        RuleType::DtmfInput,
        RuleType::NluMenu,
        RuleType::NluInput,
        RuleType::Queue,
        RuleType::Terminate,
        RuleType::ExternalNumber,
        RuleType::Integration,
        RuleType::Wait,
    ];

    /// Wire name, as stored in `CurrentRuleType`.
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::RuleSet => "RuleSet",
            RuleType::UpdateStates => "UpdateStates",
            RuleType::SetAttributes => "SetAttributes",
            RuleType::TextInference => "TextInference",
            RuleType::Distribution => "Distribution",
            RuleType::Metric => "Metric",
            RuleType::Message => "Message",
            RuleType::SmsMessage => "SMSMessage",
            RuleType::DtmfMenu => "DTMFMenu",
            RuleType::DtmfInput => "DTMFInput",
            RuleType::NluMenu => "NLUMenu",
            RuleType::NluInput => "NLUInput",
            RuleType::Queue => "Queue",
            RuleType::Terminate => "Terminate",
            RuleType::ExternalNumber => "ExternalNumber",
            RuleType::Integration => "Integration",
            RuleType::Wait => "Wait",
        }
    }

    /// Parse a wire name. Returns `None` for unknown types.
    pub fn parse(s: &str) -> Option<RuleType> {
        RuleType::ALL.iter().copied().find(|t| t.as_str() == s)
    }

    /// True when the engine handles this type without the platform.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            RuleType::RuleSet
                | RuleType::UpdateStates
                | RuleType::SetAttributes
                | RuleType::TextInference
                | RuleType::Distribution
                | RuleType::Metric
        )
    }

    /// True for menu/input types, where the platform collects caller input.
    pub fn collects_input(&self) -> bool {
        matches!(
            self,
            RuleType::DtmfMenu | RuleType::DtmfInput | RuleType::NluMenu | RuleType::NluInput
        )
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Rule / RuleSet ──────────────────────────────────────────────────

/// A single step within a rule set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub rule_id: String,
    pub rule_set_id: String,
    /// Unique within the owning rule set.
    pub name: String,
    pub enabled: bool,
    pub priority: i64,
    /// Activation predicate descriptor, interpreted by the activation evaluator.
    #[serde(default)]
    pub activation: serde_json::Value,
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    #[serde(default)]
    pub params: RuleParams,
}

impl Rule {
    /// String form of a parameter. Non-string scalars are rendered with
    /// their JSON text; absent or null parameters yield `None`.
    pub fn param_str(&self, key: &str) -> Option<String> {
        match self.params.get(key)? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Boolean form of a parameter; accepts `true` and `"true"`.
    pub fn param_bool(&self, key: &str) -> bool {
        match self.params.get(key) {
            Some(serde_json::Value::Bool(b)) => *b,
            Some(serde_json::Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }
}

/// A named, ordered collection of rules: one IVR menu or flow segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    pub rule_set_id: String,
    /// Globally unique.
    pub name: String,
    pub enabled: bool,
    #[serde(default)]
    pub folder: String,
    /// Endpoint names routed to this rule set.
    #[serde(default)]
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl RuleSet {
    /// Position of the named rule within this rule set's rule list.
    pub fn rule_index(&self, rule_name: &str) -> Option<usize> {
        self.rules.iter().position(|r| r.name == rule_name)
    }

    pub fn rule(&self, rule_name: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.name == rule_name)
    }

    /// Sort rules by descending priority. Ties keep their declared order.
    pub fn sort_rules(&mut self) {
        self.rules.sort_by(|a, b| b.priority.cmp(&a.priority));
    }
}

/// A (rule set, rule) pair identifying one activated rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuleRef {
    pub rule_set: String,
    pub rule: String,
}

// ── Routing ─────────────────────────────────────────────────────────

/// Maps an inbound dialed number to a routing endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberRoute {
    pub number: String,
    pub endpoint: String,
}

// ── Bundle ──────────────────────────────────────────────────────────

/// Everything the engine loads from the rule management side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleBundle {
    /// Last-change token at the time the bundle was published.
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub rule_sets: Vec<RuleSet>,
    #[serde(default)]
    pub routes: Vec<NumberRoute>,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
    /// Holiday dates as `YYYY-MM-DD`.
    #[serde(default)]
    pub holidays: Vec<String>,
}
