//! callflow-interchange: rule bundle types and deserialization.
//!
//! Provides typed structs for rule sets, rules, the closed rule-type
//! enumeration and inbound number routing, plus a single
//! [`from_bundle_json`] entry point that validates a published bundle.
//! The engine, the batch runner and the CLI all consume these types.

pub mod deserialize;
pub mod types;

pub use deserialize::{from_bundle_json, from_bundle_str, InterchangeError};
pub use types::*;
