//! callflow batch testing.
//!
//! Replays recorded test scripts against the inference engine through its
//! request/response contract, checks the platform-visible output against
//! each script's expectations and aggregates results and rule coverage
//! across a batch.
//!
//! - [`script`] parses the line-oriented test script language
//! - [`interpreter`] drives one simulated call per test
//! - [`coordinator`] runs a batch in fixed-width concurrent chunks
//! - [`persist`] stores compressed results, overflowing to blob storage

pub mod config;
pub mod coordinator;
pub mod coverage;
mod error;
pub mod interpreter;
pub mod matching;
pub mod persist;
pub mod platform;
pub mod script;
pub mod traits;

pub use config::BatchConfig;
pub use coordinator::{select_tests, BatchCoordinator, PendingBatch};
pub use coverage::{compute_coverage, Coverage};
pub use error::{BatchError, ScriptError};
pub use interpreter::{Interaction, LineOutcome, LineStatus, TestInterpreter, TestResult};
pub use traits::InferenceService;
