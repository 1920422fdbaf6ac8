//! Pattern matching for expected messages and assertions.
//!
//! Patterns are regular expressions searched anywhere in the actual value.
//! A pattern that is not a valid regex is matched as literal text.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    /// Matched only when case was ignored.
    CaseInsensitive,
    NoMatch,
}

impl MatchKind {
    pub fn matched(self) -> bool {
        !matches!(self, MatchKind::NoMatch)
    }
}

fn build(pattern: &str, case_insensitive: bool) -> Option<Regex> {
    let compiled = RegexBuilder::new(pattern)
        .case_insensitive(case_insensitive)
        .build();
    match compiled {
        Ok(re) => Some(re),
        Err(_) => RegexBuilder::new(&regex::escape(pattern))
            .case_insensitive(case_insensitive)
            .build()
            .ok(),
    }
}

/// Case-sensitive only.
pub fn matches_exact(pattern: &str, actual: &str) -> bool {
    build(pattern, false).is_some_and(|re| re.is_match(actual))
}

/// Exact match first, then a case-insensitive retry.
pub fn match_pattern(pattern: &str, actual: &str) -> MatchKind {
    if matches_exact(pattern, actual) {
        MatchKind::Exact
    } else if build(pattern, true).is_some_and(|re| re.is_match(actual)) {
        MatchKind::CaseInsensitive
    } else {
        MatchKind::NoMatch
    }
}

/// Compare an assertion's expected value with the actual value.
///
/// An empty expectation only matches an empty or missing value; a
/// non-empty expectation never matches a missing one.
pub fn match_assertion(expected: &str, actual: Option<&str>) -> MatchKind {
    let actual = actual.unwrap_or("");
    match (expected.is_empty(), actual.is_empty()) {
        (true, true) => MatchKind::Exact,
        (true, false) | (false, true) => MatchKind::NoMatch,
        (false, false) => match_pattern(expected, actual),
    }
}
