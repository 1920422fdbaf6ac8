use serde_json::Value;

use crate::error::EngineError;
use crate::state::{display_value, SessionState};

use super::{key_value_pairs, HandlerContext, HandlerOutcome};

const INCREMENT: &str = "increment";

pub(super) fn handle(
    ctx: &HandlerContext<'_>,
    state: &mut SessionState,
) -> Result<HandlerOutcome, EngineError> {
    for (key, value) in key_value_pairs(ctx.rule, "updateStates")? {
        if value.as_str() == Some(INCREMENT) {
            let next = incremented(state.get(&key));
            state.set_str(&key, next.to_string());
        } else {
            state.set(&key, value);
        }
    }
    Ok(HandlerOutcome::Continue)
}

/// Current numeric value plus one. Missing or non-numeric values count
/// as zero.
fn incremented(current: Option<&Value>) -> i64 {
    current
        .map(display_value)
        .and_then(|s| s.trim().parse::<f64>().ok())
        .map(|n| n.floor() as i64)
        .unwrap_or(0)
        + 1
}
