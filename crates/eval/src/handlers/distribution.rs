use callflow_interchange::Rule;

use crate::error::EngineError;
use crate::state::SessionState;

use super::{HandlerContext, HandlerOutcome};

/// One weighted branch of a distribution.
#[derive(Debug, Clone, PartialEq)]
pub struct DistributionOption {
    pub rule_set: String,
    pub percentage: f64,
}

fn number_param(rule: &Rule, key: &str) -> Result<Option<f64>, EngineError> {
    match rule.param_str(key) {
        None => Ok(None),
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| EngineError::Distribution {
                rule: rule.name.clone(),
                message: format!("'{}' is not a number: {}", key, s),
            }),
    }
}

/// Tolerance for weights such as 33.3 + 33.3 + 33.4.
const WEIGHT_EPSILON: f64 = 1e-9;

/// Read and validate `optionCount`, `ruleSetName<i>`, `percentage<i>`
/// (1-based) and `defaultRuleSetName`.
///
/// Rejects negative weights, a total over 100, and a missing default when
/// the weights fall short of 100, so nothing is selected from an invalid
/// distribution. When the weights cover 100 the default is optional and
/// falls back to the last option.
pub fn parse_options(rule: &Rule) -> Result<(Vec<DistributionOption>, String), EngineError> {
    let fail = |message: String| EngineError::Distribution {
        rule: rule.name.clone(),
        message,
    };

    let count = number_param(rule, "optionCount")?.unwrap_or(0.0);
    if count < 0.0 || count.fract() != 0.0 {
        return Err(fail(format!("invalid optionCount {}", count)));
    }

    let mut options = Vec::new();
    for i in 1..=(count as usize) {
        let rule_set = rule
            .param_str(&format!("ruleSetName{}", i))
            .filter(|s| !s.is_empty())
            .ok_or_else(|| fail(format!("option {} has no rule set", i)))?;
        let percentage = number_param(rule, &format!("percentage{}", i))?.unwrap_or(0.0);
        if percentage < 0.0 {
            return Err(fail(format!("option {} has negative weight", i)));
        }
        options.push(DistributionOption {
            rule_set,
            percentage,
        });
    }

    let total: f64 = options.iter().map(|o| o.percentage).sum();
    if total > 100.0 + WEIGHT_EPSILON {
        return Err(fail(format!("weights sum to {}, over 100", total)));
    }

    let declared = rule
        .param_str("defaultRuleSetName")
        .filter(|s| !s.is_empty());
    let default = match declared {
        Some(name) => name,
        None if total < 100.0 - WEIGHT_EPSILON => {
            return Err(fail(format!(
                "weights sum to {} and there is no defaultRuleSetName",
                total
            )))
        }
        None => options
            .last()
            .map(|o| o.rule_set.clone())
            .ok_or_else(|| fail("no options".to_string()))?,
    };

    Ok((options, default))
}

/// Pick a rule set for a roll in `[0, 100)`. Options own consecutive
/// bands in declared order; the remainder up to 100 goes to the default.
pub fn select_rule_set<'a>(options: &'a [DistributionOption], default: &'a str, roll: f64) -> &'a str {
    let mut upper = 0.0;
    for option in options {
        upper += option.percentage;
        if roll < upper {
            return &option.rule_set;
        }
    }
    default
}

pub(super) fn handle(
    ctx: &HandlerContext<'_>,
    state: &mut SessionState,
) -> Result<HandlerOutcome, EngineError> {
    let (options, default) = parse_options(ctx.rule)?;
    let roll = ctx.collaborators.random.roll_percent();
    let chosen = select_rule_set(&options, &default, roll);
    tracing::debug!(rule = %ctx.rule.name, roll, chosen, "distribution selected");
    state.set_next_rule_set(chosen);
    Ok(HandlerOutcome::RuleSetChanged)
}
