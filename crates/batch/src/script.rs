//! Test script parsing.
//!
//! A script is line oriented, one directive per line:
//!
//! ```text
//! # comment
//! message: "Welcome.*"
//! input: "1"
//! queue: "Sales"
//! terminate
//! externalNumber: "\\+612.*"
//! attribute: {"key": "accountType", "value": "gold"}
//! state: {"key": "IntegrationResult.balance", "value": ""}
//! ```
//!
//! The payload after the first colon is JSON. The colon must not appear
//! before index 5, so no directive name can be confused with a shorter
//! prefix.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ScriptError;

const MIN_COLON_INDEX: usize = 5;

/// One parsed script directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Directive {
    /// An expected outbound message, as a pattern.
    Message { pattern: String },
    /// Caller input supplied when the platform asks for it.
    Input { value: String },
    /// The call should end in a queue. No pattern accepts any queue.
    Queue { pattern: Option<String> },
    /// The call should hang up.
    Terminate,
    /// The call should transfer out. No pattern accepts any number.
    ExternalNumber { pattern: Option<String> },
    /// Final contact attribute check.
    Attribute { key: String, value: String },
    /// Final session state check on a dotted path.
    State { key: String, value: String },
}

impl Directive {
    pub fn kind(&self) -> &'static str {
        match self {
            Directive::Message { .. } => "message",
            Directive::Input { .. } => "input",
            Directive::Queue { .. } => "queue",
            Directive::Terminate => "terminate",
            Directive::ExternalNumber { .. } => "externalNumber",
            Directive::Attribute { .. } => "attribute",
            Directive::State { .. } => "state",
        }
    }

    pub fn is_assertion(&self) -> bool {
        matches!(self, Directive::Attribute { .. } | Directive::State { .. })
    }
}

/// A directive with its position in the source script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptLine {
    /// 1-based line number in the source.
    pub line: usize,
    pub text: String,
    pub directive: Directive,
}

/// Non-blank, non-comment lines with their 1-based line numbers.
pub fn raw_lines(source: &str) -> Vec<(usize, String)> {
    source
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty() && !l.starts_with('#'))
        .map(|(n, l)| (n, l.to_string()))
        .collect()
}

/// Parse a whole script. The first bad line fails the parse.
pub fn parse_script(source: &str) -> Result<Vec<ScriptLine>, ScriptError> {
    raw_lines(source)
        .into_iter()
        .map(|(line, text)| {
            let directive = parse_line(line, &text)?;
            Ok(ScriptLine {
                line,
                text,
                directive,
            })
        })
        .collect()
}

fn parse_line(line: usize, text: &str) -> Result<Directive, ScriptError> {
    let Some(colon) = text.find(':') else {
        return match text {
            "terminate" => Ok(Directive::Terminate),
            "queue" => Ok(Directive::Queue { pattern: None }),
            "externalNumber" => Ok(Directive::ExternalNumber { pattern: None }),
            other => Err(ScriptError::Malformed {
                line,
                message: format!("expected '<type>: <json>' but found '{}'", other),
            }),
        };
    };
    if colon < MIN_COLON_INDEX {
        return Err(ScriptError::Malformed {
            line,
            message: format!("separator at index {} is too early", colon),
        });
    }

    let kind = text[..colon].trim();
    let raw_payload = text[colon + 1..].trim();
    let payload: Value = if raw_payload.is_empty() {
        Value::Null
    } else {
        serde_json::from_str(raw_payload).map_err(|e| ScriptError::Payload {
            line,
            kind: kind.to_string(),
            message: e.to_string(),
        })?
    };
    let bad = |message: &str| ScriptError::Payload {
        line,
        kind: kind.to_string(),
        message: message.to_string(),
    };

    match kind {
        "message" => Ok(Directive::Message {
            pattern: scalar(&payload).ok_or_else(|| bad("expected a string"))?,
        }),
        "input" => Ok(Directive::Input {
            value: scalar(&payload).ok_or_else(|| bad("expected a string"))?,
        }),
        "queue" => Ok(Directive::Queue {
            pattern: optional_scalar(&payload).map_err(|_| bad("expected a string"))?,
        }),
        "externalNumber" => Ok(Directive::ExternalNumber {
            pattern: optional_scalar(&payload).map_err(|_| bad("expected a string"))?,
        }),
        "terminate" => match payload {
            Value::Null => Ok(Directive::Terminate),
            _ => Err(bad("terminate takes no payload")),
        },
        "attribute" => {
            let (key, value) = key_value(&payload).ok_or_else(|| bad("expected {\"key\", \"value\"}"))?;
            Ok(Directive::Attribute { key, value })
        }
        "state" => {
            let (key, value) = key_value(&payload).ok_or_else(|| bad("expected {\"key\", \"value\"}"))?;
            Ok(Directive::State { key, value })
        }
        other => Err(ScriptError::UnknownType {
            line,
            kind: other.to_string(),
        }),
    }
}

fn scalar(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn optional_scalar(v: &Value) -> Result<Option<String>, ()> {
    match v {
        Value::Null => Ok(None),
        other => scalar(other).map(Some).ok_or(()),
    }
}

fn key_value(v: &Value) -> Option<(String, String)> {
    let obj = v.as_object()?;
    let key = obj.get("key")?.as_str()?.to_string();
    if key.is_empty() {
        return None;
    }
    let value = match obj.get("value") {
        None | Some(Value::Null) => String::new(),
        Some(other) => scalar(other)?,
    };
    Some((key, value))
}
