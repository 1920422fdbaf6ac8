//! Conformance test suite for `SessionStore` implementations.
//!
//! This module provides a backend-agnostic test suite that any
//! `SessionStore` implementation can run to verify correctness. The suite
//! covers:
//!
//! - **Reads**: missing sessions read as empty, written values read back
//! - **Subset writes**: untouched keys survive, `None` deletes, sessions
//!   are isolated from one another
//! - **Expiry**: a zero TTL expires the session, a later write revives it
//!   empty
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory function that
//! creates a fresh, empty store for each test:
//!
//! ```ignore
//! use callflow_storage::conformance::run_conformance_suite;
//!
//! #[tokio::test]
//! async fn redis_conformance() {
//!     let report = run_conformance_suite(|| async {
//!         create_test_redis_store().await
//!     }).await;
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```

mod expiry;
mod session;

use std::fmt;
use std::future::Future;

use crate::record::StateChanges;
use crate::SessionStore;

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "session", "expiry").
    pub category: String,
    /// Test name (e.g. "missing_session_reads_empty").
    pub name: String,
    /// Whether the test passed.
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn pass(category: &str, name: &str) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: true,
            message: None,
        }
    }

    fn fail(category: &str, name: &str, msg: String) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: false,
            message: Some(msg),
        }
    }

    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self::pass(category, name),
            Err(msg) => Self::fail(category, name, msg),
        }
    }
}

/// Aggregated report from a full conformance suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in &self.results {
            if !r.passed {
                writeln!(
                    f,
                    "  FAIL [{}/{}]: {}",
                    r.category,
                    r.name,
                    r.message.as_deref().unwrap_or("(no message)")
                )?;
            }
        }
        Ok(())
    }
}

/// Run the full conformance suite against a session store.
///
/// The `factory` function is called once per test to create a fresh, empty
/// store instance, ensuring test isolation.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: SessionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.extend(session::run_session_tests(&factory).await);
    results.extend(expiry::run_expiry_tests(&factory).await);

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    ConformanceReport {
        results,
        passed,
        failed: total - passed,
        total,
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// TTL long enough that nothing expires during a test run.
const LONG_TTL: u64 = 3600;

fn changes(pairs: &[(&str, Option<&str>)]) -> StateChanges {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.map(|s| s.to_string())))
        .collect()
}
