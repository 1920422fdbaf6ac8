use serde::Deserialize;

use crate::error::EngineError;
use crate::state::SessionState;

use super::{HandlerContext, HandlerOutcome};

/// One entry of the `intentRuleSets` parameter.
#[derive(Debug, Clone, Deserialize)]
struct IntentRoute {
    intent: String,
    #[serde(rename = "ruleSetName")]
    rule_set: String,
    /// Minimum confidence, 0 when absent.
    #[serde(default)]
    confidence: f64,
}

fn routes(ctx: &HandlerContext<'_>) -> Vec<IntentRoute> {
    let parsed = match ctx.rule.params.get("intentRuleSets") {
        Some(serde_json::Value::String(s)) => serde_json::from_str(s),
        Some(v) => serde_json::from_value(v.clone()),
        None => return Vec::new(),
    };
    parsed.unwrap_or_else(|e| {
        tracing::warn!(rule = %ctx.rule.name, error = %e, "unreadable intentRuleSets");
        Vec::new()
    })
}

/// Classify the rendered `input` text and branch on the intent. Any
/// failure (no classifier, no intent, low confidence, classifier error)
/// falls through to the next rule.
pub(super) async fn handle(
    ctx: &HandlerContext<'_>,
    state: &mut SessionState,
) -> Result<HandlerOutcome, EngineError> {
    let input = ctx
        .rule
        .param_str("input")
        .map(|t| state.render_template(&t))
        .unwrap_or_default();
    if input.trim().is_empty() {
        return Ok(HandlerOutcome::Continue);
    }

    let Some(classifier) = ctx.collaborators.classifier.as_ref() else {
        tracing::warn!(rule = %ctx.rule.name, "no intent classifier configured");
        return Ok(HandlerOutcome::Continue);
    };

    let intent = match classifier.classify(state.session_id(), &input).await {
        Ok(Some(intent)) => intent,
        Ok(None) => return Ok(HandlerOutcome::Continue),
        Err(e) => {
            tracing::warn!(rule = %ctx.rule.name, error = %e, "intent classification failed");
            return Ok(HandlerOutcome::Continue);
        }
    };

    let matched = routes(ctx)
        .into_iter()
        .find(|r| r.intent == intent.name && intent.confidence >= r.confidence);
    match matched {
        Some(route) => {
            tracing::debug!(
                intent = %intent.name,
                confidence = intent.confidence,
                rule_set = %route.rule_set,
                "intent matched"
            );
            state.set_next_rule_set(&route.rule_set);
            Ok(HandlerOutcome::RuleSetChanged)
        }
        None => Ok(HandlerOutcome::Continue),
    }
}
