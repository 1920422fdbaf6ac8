use crate::error::EngineError;
use crate::state::{display_value, SessionState};

use super::{key_value_pairs, HandlerContext, HandlerOutcome};

/// Merge `setAttributes` pairs into `ContactAttributes`. Values are
/// rendered against the session first so `{{path}}` placeholders resolve.
pub(super) fn handle(
    ctx: &HandlerContext<'_>,
    state: &mut SessionState,
) -> Result<HandlerOutcome, EngineError> {
    for (key, value) in key_value_pairs(ctx.rule, "setAttributes")? {
        let rendered = state.render_template(&display_value(&value));
        state.set_contact_attribute(&key, &rendered, ctx.attribute_limit)?;
    }
    Ok(HandlerOutcome::Continue)
}
