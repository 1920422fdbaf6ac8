//! Test interpreter: one simulated call per test case.
//!
//! The interpreter plays the telephony platform. It starts a session,
//! renders each suspended rule, answers menus from the script's `input`
//! lines and stops at the first queue, hang-up or transfer. Messages are
//! matched against the *message stack*: the `message` lines between the
//! previous `input` line and the next one, in any order.

use std::collections::VecDeque;
use std::sync::Arc;

use callflow_eval::integration::STATUS_DONE;
use callflow_eval::state::display_value;
use callflow_eval::{InferenceEvent, InferenceRequest, InferenceResponse, SessionState};
use callflow_interchange::RuleRef;
use callflow_storage::{FlatState, TestCaseRecord};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::ScriptError;
use crate::matching::{match_assertion, match_pattern, matches_exact, MatchKind};
use crate::platform::{render, PlatformAction};
use crate::script::{parse_script, raw_lines, Directive, ScriptLine};
use crate::traits::InferenceService;

const NOT_EXECUTED: &str = "not executed";
const UNMATCHED_MESSAGE: &str = "Failed to match message";

// ──────────────────────────────────────────────
// Result records
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LineStatus {
    NotExecuted,
    Passed,
    /// Passed with at least one warning.
    Warning,
    Failed,
}

impl LineStatus {
    pub fn is_success(self) -> bool {
        matches!(self, LineStatus::Passed | LineStatus::Warning)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineOutcome {
    pub line: usize,
    pub text: String,
    pub status: LineStatus,
    #[serde(default)]
    pub info: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl LineOutcome {
    fn new(line: usize, text: &str) -> Self {
        LineOutcome {
            line,
            text: text.to_string(),
            status: LineStatus::NotExecuted,
            info: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn pass(&mut self, info: String) {
        self.info.push(info);
        self.status = if self.warnings.is_empty() {
            LineStatus::Passed
        } else {
            LineStatus::Warning
        };
    }

    fn warn(&mut self, warning: &str) {
        self.warnings.push(warning.to_string());
        if self.status == LineStatus::Passed {
            self.status = LineStatus::Warning;
        }
    }

    fn fail(&mut self, info: String) {
        self.info.push(info);
        self.status = LineStatus::Failed;
    }

    /// Record a pattern comparison.
    fn record(&mut self, kind: MatchKind, matched: String, failed: String) {
        match kind {
            MatchKind::Exact => self.pass(matched),
            MatchKind::CaseInsensitive => {
                self.warn("matched case-insensitively");
                self.pass(matched);
            }
            MatchKind::NoMatch => self.fail(failed),
        }
    }
}

/// One engine round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub event: InferenceEvent,
    pub rule_set: Option<String>,
    pub rule: Option<String>,
    pub rule_type: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub activated: Vec<RuleRef>,
    #[serde(default)]
    pub state: FlatState,
}

impl Interaction {
    fn new(event: InferenceEvent, response: &InferenceResponse, message: Option<String>) -> Self {
        let get = |k: &str| response.state.get(k).cloned();
        Interaction {
            event,
            rule_set: get("CurrentRuleSet"),
            rule: get("CurrentRule"),
            rule_type: get("CurrentRuleType"),
            message,
            activated: response.activated.clone(),
            state: response.state.clone(),
        }
    }
}

/// How the simulated call ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum CallEnd {
    Queue { name: String },
    Terminate,
    ExternalNumber { number: String },
    /// The platform asked for input and the script had none left.
    InputExhausted,
    InteractionLimit,
    Error { message: String },
}

impl CallEnd {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            CallEnd::InputExhausted | CallEnd::InteractionLimit | CallEnd::Error { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub test_id: String,
    pub name: String,
    pub session_id: String,
    pub success: bool,
    pub warning: bool,
    pub end: Option<CallEnd>,
    /// Parse failure, when the script never ran.
    pub error: Option<String>,
    pub lines: Vec<LineOutcome>,
    pub interactions: Vec<Interaction>,
}

impl TestResult {
    fn parse_failure(test: &TestCaseRecord, err: ScriptError) -> Self {
        let lines = raw_lines(&test.script)
            .into_iter()
            .map(|(n, text)| {
                let mut o = LineOutcome::new(n, &text);
                o.info.push(NOT_EXECUTED.to_string());
                o
            })
            .collect();
        TestResult {
            test_id: test.test_id.clone(),
            name: test.name.clone(),
            session_id: String::new(),
            success: false,
            warning: false,
            end: None,
            error: Some(err.to_string()),
            lines,
            interactions: Vec::new(),
        }
    }

    /// Every rule activated across the call, in order.
    pub fn activated(&self) -> impl Iterator<Item = &RuleRef> {
        self.interactions.iter().flat_map(|i| i.activated.iter())
    }
}

// ──────────────────────────────────────────────
// Script progress
// ──────────────────────────────────────────────

struct StackEntry {
    index: usize,
    matched: bool,
}

/// Per-line bookkeeping for one run of a script.
struct ScriptRun<'a> {
    lines: &'a [ScriptLine],
    outcomes: Vec<LineOutcome>,
    inputs: VecDeque<usize>,
    stack: Vec<StackEntry>,
    first_queue: Option<usize>,
    first_terminate: Option<usize>,
    first_external: Option<usize>,
    assertions: Vec<usize>,
}

impl<'a> ScriptRun<'a> {
    fn new(lines: &'a [ScriptLine]) -> Self {
        let mut outcomes: Vec<LineOutcome> = lines
            .iter()
            .map(|l| LineOutcome::new(l.line, &l.text))
            .collect();
        let mut inputs = VecDeque::new();
        let mut assertions = Vec::new();
        let (mut first_queue, mut first_terminate, mut first_external) = (None, None, None);

        for (i, line) in lines.iter().enumerate() {
            let slot = match &line.directive {
                Directive::Input { .. } => {
                    inputs.push_back(i);
                    continue;
                }
                Directive::Queue { .. } => &mut first_queue,
                Directive::Terminate => &mut first_terminate,
                Directive::ExternalNumber { .. } => &mut first_external,
                d if d.is_assertion() => {
                    assertions.push(i);
                    continue;
                }
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(i);
            } else {
                outcomes[i].pass(format!(
                    "only the first {} line is checked",
                    line.directive.kind()
                ));
            }
        }

        let mut run = ScriptRun {
            lines,
            outcomes,
            inputs,
            stack: Vec::new(),
            first_queue,
            first_terminate,
            first_external,
            assertions,
        };
        run.load_segment(0);
        run
    }

    /// Message lines from `from` up to the next input line.
    fn load_segment(&mut self, from: usize) {
        self.stack = self.lines[from..]
            .iter()
            .enumerate()
            .take_while(|(_, l)| !matches!(l.directive, Directive::Input { .. }))
            .filter(|(_, l)| matches!(l.directive, Directive::Message { .. }))
            .map(|(offset, _)| StackEntry {
                index: from + offset,
                matched: false,
            })
            .collect();
    }

    fn pattern(&self, entry: &StackEntry) -> &str {
        match &self.lines[entry.index].directive {
            Directive::Message { pattern } => pattern,
            _ => "",
        }
    }

    /// Satisfy the first open stack entry that matches, preferring exact
    /// matches over case-insensitive ones.
    fn observe_message(&mut self, actual: &str) {
        let open = |e: &&StackEntry| !e.matched;
        let found = self
            .stack
            .iter()
            .filter(open)
            .find(|e| matches_exact(self.pattern(e), actual))
            .map(|e| (e.index, MatchKind::Exact))
            .or_else(|| {
                self.stack
                    .iter()
                    .filter(open)
                    .find(|e| match_pattern(self.pattern(e), actual).matched())
                    .map(|e| (e.index, MatchKind::CaseInsensitive))
            });
        let Some((index, kind)) = found else {
            tracing::debug!(message = %actual, "message not on the stack");
            return;
        };

        let out_of_order = self.stack.iter().any(|e| e.index > index && e.matched);
        if let Some(entry) = self.stack.iter_mut().find(|e| e.index == index) {
            entry.matched = true;
        }
        let outcome = &mut self.outcomes[index];
        if out_of_order {
            outcome.warn("matched out of order");
        }
        outcome.record(kind, format!("matched '{}'", actual), String::new());
    }

    fn close_stack(&mut self) {
        for entry in self.stack.drain(..).filter(|e| !e.matched) {
            self.outcomes[entry.index].fail(UNMATCHED_MESSAGE.to_string());
        }
    }

    /// Consume the next input line and open its message segment.
    fn next_input(&mut self) -> Option<String> {
        let index = self.inputs.pop_front()?;
        self.close_stack();
        let value = match &self.lines[index].directive {
            Directive::Input { value } => value.clone(),
            _ => String::new(),
        };
        self.outcomes[index].pass(format!("sent '{}'", value));
        self.load_segment(index + 1);
        Some(value)
    }

    fn check_end(&mut self, end: &CallEnd) {
        match end {
            CallEnd::Queue { name } => {
                if let Some(i) = self.first_queue {
                    self.check_target(i, "queue", name);
                }
            }
            CallEnd::ExternalNumber { number } => {
                if let Some(i) = self.first_external {
                    self.check_target(i, "external number", number);
                }
            }
            CallEnd::Terminate => {
                if let Some(i) = self.first_terminate {
                    self.outcomes[i].pass("call terminated".to_string());
                }
            }
            _ => {}
        }
    }

    fn check_target(&mut self, index: usize, what: &str, actual: &str) {
        let pattern = match &self.lines[index].directive {
            Directive::Queue { pattern } | Directive::ExternalNumber { pattern } => pattern.clone(),
            _ => None,
        };
        let kind = match &pattern {
            None => MatchKind::Exact,
            Some(p) => match_pattern(p, actual),
        };
        self.outcomes[index].record(
            kind,
            format!("reached {} '{}'", what, actual),
            format!(
                "expected {} matching '{}' but reached '{}'",
                what,
                pattern.unwrap_or_default(),
                actual
            ),
        );
    }

    fn check_assertions(&mut self, session: &SessionState) {
        let attributes = session.contact_attributes();
        for &i in &self.assertions {
            let (key, expected, actual) = match &self.lines[i].directive {
                Directive::Attribute { key, value } => {
                    (key, value, attributes.get(key).map(display_value))
                }
                Directive::State { key, value } => (key, value, session.get_path(key).map(display_value)),
                _ => continue,
            };
            let shown = actual.clone().unwrap_or_default();
            self.outcomes[i].record(
                match_assertion(expected, actual.as_deref()),
                format!("{} = '{}'", key, shown),
                format!("expected {} to match '{}' but found '{}'", key, expected, shown),
            );
        }
    }

    fn finish(mut self, end: &CallEnd, final_state: Option<&SessionState>) -> Vec<LineOutcome> {
        self.close_stack();
        self.check_end(end);
        if let Some(state) = final_state {
            self.check_assertions(state);
        }
        for outcome in &mut self.outcomes {
            if outcome.status == LineStatus::NotExecuted {
                outcome.info.push(NOT_EXECUTED.to_string());
            }
        }
        self.outcomes
    }
}

// ──────────────────────────────────────────────
// Interpreter
// ──────────────────────────────────────────────

pub struct TestInterpreter {
    service: Arc<dyn InferenceService>,
    max_interactions: usize,
}

impl TestInterpreter {
    pub fn new(service: Arc<dyn InferenceService>, max_interactions: usize) -> Self {
        TestInterpreter {
            service,
            max_interactions,
        }
    }

    /// Run one test. Never fails: every problem is recorded in the result.
    #[tracing::instrument(skip_all, fields(test_id = %test.test_id))]
    pub async fn run(&self, test: &TestCaseRecord) -> TestResult {
        let script = match parse_script(&test.script) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "test script does not parse");
                return TestResult::parse_failure(test, e);
            }
        };

        let mut run = ScriptRun::new(&script);
        let session_id = format!("test-{}", Uuid::new_v4());
        let mut interactions: Vec<Interaction> = Vec::new();
        let mut event = InferenceEvent::NewInteraction;

        let end = loop {
            if interactions.len() >= self.max_interactions {
                break CallEnd::InteractionLimit;
            }
            let request = InferenceRequest {
                session_id: session_id.clone(),
                dialed_number: Some(test.dialed_number.clone()),
                event: event.clone(),
                contact_attributes: None,
            };
            let response = match self.service.invoke(request).await {
                Ok(r) => r,
                Err(e) => {
                    break CallEnd::Error {
                        message: e.to_string(),
                    }
                }
            };
            let step = render(&response.state);
            let message = step.as_ref().ok().and_then(|s| s.message.clone());
            interactions.push(Interaction::new(event, &response, message));

            let step = match step {
                Ok(s) => s,
                Err(message) => break CallEnd::Error { message },
            };
            tracing::debug!(action = ?step.action, message = ?step.message, "platform step");
            if let Some(message) = &step.message {
                run.observe_message(message);
            }
            event = match step.action {
                PlatformAction::Continue => InferenceEvent::NextStep,
                PlatformAction::Callback => InferenceEvent::IntegrationCallback {
                    status: STATUS_DONE.to_string(),
                    result: Value::Object(Map::new()),
                },
                PlatformAction::CollectInput => match run.next_input() {
                    Some(input) => InferenceEvent::UserInput { input },
                    None => break CallEnd::InputExhausted,
                },
                PlatformAction::Queue { name } => break CallEnd::Queue { name },
                PlatformAction::Terminate => break CallEnd::Terminate,
                PlatformAction::ExternalNumber { number } => break CallEnd::ExternalNumber { number },
            };
        };

        let final_state = if run.assertions.is_empty() || matches!(end, CallEnd::Error { .. }) {
            None
        } else {
            match self.service.session_state(&session_id).await {
                Ok(state) => Some(state),
                Err(e) => {
                    tracing::warn!(error = %e, "final session state unavailable; assertions not executed");
                    None
                }
            }
        };
        let lines = run.finish(&end, final_state.as_ref());
        let success = !end.is_failure() && lines.iter().all(|l| l.status.is_success());
        let warning = lines.iter().any(|l| l.status == LineStatus::Warning);
        tracing::info!(
            test = %test.name,
            success,
            warning,
            interactions = interactions.len(),
            end = ?end,
            "test finished"
        );

        TestResult {
            test_id: test.test_id.clone(),
            name: test.name.clone(),
            session_id,
            success,
            warning,
            end: Some(end),
            error: None,
            lines,
            interactions,
        }
    }
}
