use crate::error::EngineError;
use crate::state::{ReturnFrame, SessionState};

use super::{HandlerContext, HandlerOutcome};

/// Transfer to another rule set, optionally as a subroutine call.
///
/// With `returnHere` the current position is pushed first so that the
/// target's exhaustion resumes after this rule. A non-empty `message`
/// is spoken by the platform before the transfer, which makes this a
/// remote exit.
pub(super) fn handle(
    ctx: &HandlerContext<'_>,
    state: &mut SessionState,
) -> Result<HandlerOutcome, EngineError> {
    let target = ctx
        .rule
        .param_str("ruleSetName")
        .filter(|s| !s.is_empty())
        .ok_or_else(|| EngineError::InvalidParam {
            rule: ctx.rule.name.clone(),
            param: "ruleSetName".to_string(),
            message: "missing target rule set".to_string(),
        })?;

    if ctx.rule.param_bool("returnHere") {
        state.push_return(ReturnFrame {
            rule_set: ctx.rule_set.name.clone(),
            rule: ctx.rule.name.clone(),
        })?;
    }
    state.set_next_rule_set(&target);

    let has_message = ctx
        .rule
        .param_str("message")
        .is_some_and(|m| !m.trim().is_empty());
    if has_message {
        Ok(HandlerOutcome::Remote)
    } else {
        Ok(HandlerOutcome::RuleSetChanged)
    }
}
