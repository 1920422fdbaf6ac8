use std::future::Future;

use super::{changes, TestResult, LONG_TTL};
use crate::SessionStore;

pub(super) async fn run_session_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: SessionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "session",
            "missing_session_reads_empty",
            missing_session_reads_empty(factory).await,
        ),
        TestResult::from_result(
            "session",
            "written_values_read_back",
            written_values_read_back(factory).await,
        ),
        TestResult::from_result(
            "session",
            "subset_write_preserves_other_keys",
            subset_write_preserves_other_keys(factory).await,
        ),
        TestResult::from_result(
            "session",
            "none_deletes_key",
            none_deletes_key(factory).await,
        ),
        TestResult::from_result(
            "session",
            "sessions_are_isolated",
            sessions_are_isolated(factory).await,
        ),
        TestResult::from_result(
            "session",
            "json_text_is_stored_verbatim",
            json_text_is_stored_verbatim(factory).await,
        ),
    ]
}

// ── Test implementations ──────────────────────────────────────────────────────

/// A session that was never written reads as an empty map, not an error.
async fn missing_session_reads_empty<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SessionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let state = s.get_state("nobody").await.map_err(|e| e.to_string())?;
    if !state.is_empty() {
        return Err(format!("expected empty state, got {} keys", state.len()));
    }
    Ok(())
}

async fn written_values_read_back<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SessionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.set_state_subset(
        "c-1",
        &changes(&[("CurrentRuleSet", Some("Main")), ("CurrentRule", Some("Welcome"))]),
        LONG_TTL,
    )
    .await
    .map_err(|e| e.to_string())?;

    let state = s.get_state("c-1").await.map_err(|e| e.to_string())?;
    match state.get("CurrentRuleSet").map(String::as_str) {
        Some("Main") => {}
        other => return Err(format!("expected CurrentRuleSet=Main, got {:?}", other)),
    }
    if state.len() != 2 {
        return Err(format!("expected 2 keys, got {}", state.len()));
    }
    Ok(())
}

/// Keys absent from a subset write keep their previous values.
async fn subset_write_preserves_other_keys<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SessionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.set_state_subset("c-1", &changes(&[("a", Some("1")), ("b", Some("2"))]), LONG_TTL)
        .await
        .map_err(|e| e.to_string())?;
    s.set_state_subset("c-1", &changes(&[("b", Some("3"))]), LONG_TTL)
        .await
        .map_err(|e| e.to_string())?;

    let state = s.get_state("c-1").await.map_err(|e| e.to_string())?;
    if state.get("a").map(String::as_str) != Some("1") {
        return Err(format!("key 'a' lost or changed: {:?}", state.get("a")));
    }
    if state.get("b").map(String::as_str) != Some("3") {
        return Err(format!("key 'b' not updated: {:?}", state.get("b")));
    }
    Ok(())
}

async fn none_deletes_key<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SessionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.set_state_subset(
        "c-1",
        &changes(&[("CurrentRule_message", Some("hi")), ("keep", Some("x"))]),
        LONG_TTL,
    )
    .await
    .map_err(|e| e.to_string())?;
    s.set_state_subset("c-1", &changes(&[("CurrentRule_message", None)]), LONG_TTL)
        .await
        .map_err(|e| e.to_string())?;

    let state = s.get_state("c-1").await.map_err(|e| e.to_string())?;
    if state.contains_key("CurrentRule_message") {
        return Err("deleted key still present".to_string());
    }
    if !state.contains_key("keep") {
        return Err("unrelated key removed by delete".to_string());
    }
    Ok(())
}

async fn sessions_are_isolated<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SessionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.set_state_subset("c-1", &changes(&[("k", Some("one"))]), LONG_TTL)
        .await
        .map_err(|e| e.to_string())?;
    s.set_state_subset("c-2", &changes(&[("k", Some("two"))]), LONG_TTL)
        .await
        .map_err(|e| e.to_string())?;

    let one = s.get_state("c-1").await.map_err(|e| e.to_string())?;
    let two = s.get_state("c-2").await.map_err(|e| e.to_string())?;
    if one.get("k").map(String::as_str) != Some("one")
        || two.get("k").map(String::as_str) != Some("two")
    {
        return Err(format!("sessions leaked: c-1={:?} c-2={:?}", one, two));
    }
    Ok(())
}

/// The store must not reinterpret JSON text; decoding is the engine's job.
async fn json_text_is_stored_verbatim<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SessionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let text = r#"[{"ruleSetName":"Main","ruleName":"Menu"}]"#;
    s.set_state_subset("c-1", &changes(&[("ReturnStack", Some(text))]), LONG_TTL)
        .await
        .map_err(|e| e.to_string())?;

    let state = s.get_state("c-1").await.map_err(|e| e.to_string())?;
    if state.get("ReturnStack").map(String::as_str) != Some(text) {
        return Err(format!(
            "expected verbatim JSON text, got {:?}",
            state.get("ReturnStack")
        ));
    }
    Ok(())
}
