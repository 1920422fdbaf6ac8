use std::future::Future;

use super::{changes, TestResult, LONG_TTL};
use crate::SessionStore;

pub(super) async fn run_expiry_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: SessionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "expiry",
            "zero_ttl_expires_session",
            zero_ttl_expires_session(factory).await,
        ),
        TestResult::from_result(
            "expiry",
            "write_after_expiry_starts_empty",
            write_after_expiry_starts_empty(factory).await,
        ),
        TestResult::from_result(
            "expiry",
            "long_ttl_survives_reads",
            long_ttl_survives_reads(factory).await,
        ),
    ]
}

// ── Test implementations ──────────────────────────────────────────────────────

async fn zero_ttl_expires_session<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SessionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.set_state_subset("c-1", &changes(&[("k", Some("v"))]), 0)
        .await
        .map_err(|e| e.to_string())?;
    let state = s.get_state("c-1").await.map_err(|e| e.to_string())?;
    if !state.is_empty() {
        return Err(format!("expected expired session, got {:?}", state));
    }
    Ok(())
}

/// Keys from an expired session must not resurface after a fresh write.
async fn write_after_expiry_starts_empty<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SessionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.set_state_subset("c-1", &changes(&[("old", Some("v"))]), 0)
        .await
        .map_err(|e| e.to_string())?;
    s.set_state_subset("c-1", &changes(&[("new", Some("v"))]), LONG_TTL)
        .await
        .map_err(|e| e.to_string())?;
    let state = s.get_state("c-1").await.map_err(|e| e.to_string())?;
    if state.contains_key("old") {
        return Err("expired key resurfaced".to_string());
    }
    if !state.contains_key("new") {
        return Err("fresh key missing".to_string());
    }
    Ok(())
}

async fn long_ttl_survives_reads<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SessionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.set_state_subset("c-1", &changes(&[("k", Some("v"))]), LONG_TTL)
        .await
        .map_err(|e| e.to_string())?;
    for _ in 0..3 {
        let state = s.get_state("c-1").await.map_err(|e| e.to_string())?;
        if state.get("k").map(String::as_str) != Some("v") {
            return Err(format!("value lost across reads: {:?}", state));
        }
    }
    Ok(())
}
