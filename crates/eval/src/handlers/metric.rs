use std::collections::BTreeMap;

use crate::error::EngineError;
use crate::state::SessionState;

use super::{HandlerContext, HandlerOutcome};

/// Emit a named counter. Metrics never affect the call: every failure is
/// logged and swallowed.
pub(super) async fn handle(
    ctx: &HandlerContext<'_>,
    state: &mut SessionState,
) -> Result<HandlerOutcome, EngineError> {
    let Some(name) = ctx.rule.param_str("metricName").filter(|s| !s.is_empty()) else {
        tracing::warn!(rule = %ctx.rule.name, "metric rule without metricName");
        return Ok(HandlerOutcome::Continue);
    };
    let value = match ctx.rule.param_str("metricValue") {
        None => 1.0,
        Some(raw) => match state.render_template(&raw).trim().parse::<f64>() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(rule = %ctx.rule.name, value = %raw, "non-numeric metricValue, using 1");
                1.0
            }
        },
    };

    let dimensions = BTreeMap::from([
        ("RuleSet".to_string(), ctx.rule_set.name.clone()),
        ("Rule".to_string(), ctx.rule.name.clone()),
    ]);
    if let Err(e) = ctx.collaborators.metrics.emit(&name, value, &dimensions).await {
        tracing::warn!(metric = %name, error = %e, "metric emission failed");
    }
    Ok(HandlerOutcome::Continue)
}
