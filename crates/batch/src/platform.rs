//! Simulated telephony platform.
//!
//! Reads the suspended rule out of an engine response the way the real
//! contact flow does and decides what happens next in the call.

use callflow_eval::state::keys;
use callflow_interchange::RuleType;
use callflow_storage::FlatState;
use serde::{Deserialize, Serialize};

const MESSAGE_PARAM: &str = "message";
const QUEUE_PARAM: &str = "queueName";
const EXTERNAL_NUMBER_PARAM: &str = "externalNumber";

/// What the platform does after rendering the current rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlatformAction {
    /// Ask the engine for the next step.
    Continue,
    /// Wait for the caller to press keys or speak.
    CollectInput,
    /// Run the integration and call back.
    Callback,
    Queue { name: String },
    Terminate,
    ExternalNumber { number: String },
}

/// One rendered platform step: the message played, if any, and the action
/// that follows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformStep {
    pub message: Option<String>,
    pub action: PlatformAction,
}

fn scratch(state: &FlatState, param: &str) -> Option<String> {
    state
        .get(&format!("{}{}", keys::CURRENT_RULE_PREFIX, param))
        .filter(|s| !s.is_empty())
        .cloned()
}

/// Render the rule the engine suspended on.
pub fn render(state: &FlatState) -> Result<PlatformStep, String> {
    let raw_type = state
        .get(keys::CURRENT_RULE_TYPE)
        .ok_or_else(|| "response carries no current rule type".to_string())?;
    let rule_type =
        RuleType::parse(raw_type).ok_or_else(|| format!("unknown rule type '{}'", raw_type))?;
    let message = scratch(state, MESSAGE_PARAM);

    let action = match rule_type {
        RuleType::Message | RuleType::SmsMessage | RuleType::Wait | RuleType::RuleSet => {
            PlatformAction::Continue
        }
        RuleType::DtmfMenu | RuleType::DtmfInput | RuleType::NluMenu | RuleType::NluInput => {
            PlatformAction::CollectInput
        }
        RuleType::Integration => PlatformAction::Callback,
        RuleType::Queue => PlatformAction::Queue {
            name: scratch(state, QUEUE_PARAM).unwrap_or_default(),
        },
        RuleType::Terminate => PlatformAction::Terminate,
        RuleType::ExternalNumber => PlatformAction::ExternalNumber {
            number: scratch(state, EXTERNAL_NUMBER_PARAM).unwrap_or_default(),
        },
        RuleType::UpdateStates
        | RuleType::SetAttributes
        | RuleType::TextInference
        | RuleType::Distribution
        | RuleType::Metric => {
            return Err(format!("engine suspended on local rule type '{}'", rule_type));
        }
    };
    Ok(PlatformStep { message, action })
}
