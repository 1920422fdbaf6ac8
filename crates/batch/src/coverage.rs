//! Rule coverage across a batch.
//!
//! Percentages are integers in 0..=100, rounded down:
//!
//! - rule set: distinct rules activated / enabled rules in the set
//! - rule: tests that activated the rule / tests in the batch
//! - overall: distinct rules activated / enabled rules everywhere

use std::collections::{BTreeMap, BTreeSet};

use callflow_interchange::{RuleRef, RuleSet};
use serde::{Deserialize, Serialize};

use crate::interpreter::TestResult;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coverage {
    pub overall: u32,
    pub rule_sets: Vec<RuleSetCoverage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSetCoverage {
    pub name: String,
    pub coverage: u32,
    pub rules: Vec<RuleCoverage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleCoverage {
    pub name: String,
    pub coverage: u32,
    /// Tests that activated this rule at least once.
    pub tests: usize,
}

fn percent(part: usize, whole: usize) -> u32 {
    if whole == 0 {
        return 0;
    }
    (part * 100 / whole) as u32
}

/// Coverage of the enabled rule sets by a batch's results.
pub fn compute_coverage(rule_sets: &BTreeMap<String, RuleSet>, results: &[TestResult]) -> Coverage {
    let mut tests_per_rule: BTreeMap<RuleRef, usize> = BTreeMap::new();
    for result in results {
        let hit: BTreeSet<&RuleRef> = result.activated().collect();
        for rule in hit {
            *tests_per_rule.entry(rule.clone()).or_default() += 1;
        }
    }

    let mut total_rules = 0;
    let mut total_hit = 0;
    let rule_sets = rule_sets
        .values()
        .map(|rs| {
            let rules: Vec<RuleCoverage> = rs
                .rules
                .iter()
                .map(|rule| {
                    let key = RuleRef {
                        rule_set: rs.name.clone(),
                        rule: rule.name.clone(),
                    };
                    let tests = tests_per_rule.get(&key).copied().unwrap_or(0);
                    RuleCoverage {
                        name: rule.name.clone(),
                        coverage: percent(tests, results.len()),
                        tests,
                    }
                })
                .collect();
            let hit = rules.iter().filter(|r| r.tests > 0).count();
            total_rules += rules.len();
            total_hit += hit;
            RuleSetCoverage {
                name: rs.name.clone(),
                coverage: percent(hit, rules.len()),
                rules,
            }
        })
        .collect();

    Coverage {
        overall: percent(total_hit, total_rules),
        rule_sets,
    }
}
