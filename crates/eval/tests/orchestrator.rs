//! End-to-end inference tests against the in-memory stores.
//!
//! Drives the orchestrator through the same request/response contract the
//! telephony platform uses and checks the durable session state between
//! steps.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use callflow_eval::{
    CollaboratorError, Collaborators, EngineConfig, EngineError, FixedClock, InferenceEvent,
    InferenceRequest, InferenceResponse, Orchestrator, PlatformClient, RetryPolicy,
};
use callflow_interchange::{from_bundle_json, RuleBundle, RuleRef};
use callflow_storage::memory::{MemoryConfigStore, MemorySessionStore};
use callflow_storage::{FlatState, SessionStore, StateChanges};
use serde_json::{json, Value};
use time::macros::datetime;

// ──────────────────────────────────────────────
// Fixtures
// ──────────────────────────────────────────────

const DIALED: &str = "+61200000000";

fn rule(name: &str, rule_type: &str, priority: i64, params: Value) -> Value {
    json!({
        "rule_id": format!("r-{}", name),
        "rule_set_id": "rs",
        "name": name,
        "enabled": true,
        "priority": priority,
        "type": rule_type,
        "params": params
    })
}

fn rule_set(name: &str, endpoints: &[&str], rules: Vec<Value>) -> Value {
    json!({
        "rule_set_id": format!("rs-{}", name),
        "name": name,
        "enabled": true,
        "folder": "/ivr",
        "endpoints": endpoints,
        "rules": rules
    })
}

fn bundle(token: &str, rule_sets: Vec<Value>) -> RuleBundle {
    from_bundle_json(&json!({
        "token": token,
        "rule_sets": rule_sets,
        "routes": [{"number": DIALED, "endpoint": "MainLine"}],
        "config": {"TimeZone": "+10:00"}
    }))
    .unwrap()
}

/// Main: Welcome -> Count -> GoSub(Sub, returnHere) -> Bye -> End
/// Sub:  SubMsg
fn call_flow(token: &str) -> RuleBundle {
    bundle(
        token,
        vec![
            rule_set(
                "Main",
                &["MainLine"],
                vec![
                    rule("Welcome", "Message", 100, json!({"message": "Welcome"})),
                    rule(
                        "Count",
                        "UpdateStates",
                        90,
                        json!({"updateStates": [{"key": "Visits", "value": "increment"}]}),
                    ),
                    rule("GoSub", "RuleSet", 80, json!({"ruleSetName": "Sub", "returnHere": true})),
                    rule("Bye", "Message", 70, json!({"message": "Bye"})),
                    rule("End", "Terminate", 60, json!({})),
                ],
            ),
            rule_set(
                "Sub",
                &[],
                vec![rule("SubMsg", "Message", 10, json!({"message": "In sub"}))],
            ),
        ],
    )
}

struct Harness {
    engine: Orchestrator,
    sessions: Arc<MemorySessionStore>,
    config: Arc<MemoryConfigStore>,
}

fn harness(bundle: RuleBundle) -> Harness {
    let sessions = Arc::new(MemorySessionStore::new());
    let config = Arc::new(MemoryConfigStore::new(bundle));
    let engine = Orchestrator::new(config.clone(), sessions.clone())
        .with_clock(Arc::new(FixedClock(datetime!(2026-03-04 23:30 UTC))));
    Harness {
        engine,
        sessions,
        config,
    }
}

fn request(session_id: &str, event: InferenceEvent) -> InferenceRequest {
    InferenceRequest {
        session_id: session_id.to_string(),
        dialed_number: Some(DIALED.to_string()),
        event,
        contact_attributes: None,
    }
}

fn rule_ref(rule_set: &str, rule: &str) -> RuleRef {
    RuleRef {
        rule_set: rule_set.to_string(),
        rule: rule.to_string(),
    }
}

fn scratch_count(state: &FlatState) -> usize {
    state.keys().filter(|k| k.starts_with("CurrentRule_")).count()
}

async fn step(h: &Harness, session_id: &str, event: InferenceEvent) -> InferenceResponse {
    h.engine.invoke(request(session_id, event)).await.unwrap()
}

// ──────────────────────────────────────────────
// Walkthrough
// ──────────────────────────────────────────────

#[tokio::test]
async fn new_interaction_suspends_on_first_remote_rule() {
    let h = harness(call_flow("v1"));
    let resp = step(&h, "c-1", InferenceEvent::NewInteraction).await;

    assert_eq!(resp.activated, vec![rule_ref("Main", "Welcome")]);
    assert_eq!(resp.state["CurrentRuleSet"], "Main");
    assert_eq!(resp.state["CurrentRule"], "Welcome");
    assert_eq!(resp.state["CurrentRuleType"], "Message");
    assert_eq!(resp.state["CurrentRule_message"], "Welcome");
    assert_eq!(scratch_count(&resp.state), 1);

    let session = h.engine.session_state("c-1").await.unwrap();
    let system = session.get("System").unwrap();
    assert_eq!(system["DialedNumber"], DIALED);
    assert_eq!(system["TimeOfDay"], "morning");

    let stored = h.sessions.get_state("c-1").await.unwrap();
    for (key, value) in &resp.state {
        assert_eq!(stored.get(key), Some(value), "{}", key);
    }
}

#[tokio::test]
async fn response_carries_only_string_entries() {
    let h = harness(call_flow("v1"));
    let mut req = request("c-1", InferenceEvent::NewInteraction);
    req.contact_attributes = Some(BTreeMap::from([("Tier".to_string(), "gold".to_string())]));
    let resp = h.engine.invoke(req).await.unwrap();

    assert!(!resp.state.contains_key("System"));
    assert!(!resp.state.contains_key("ContactAttributes"));
    let structured: Vec<&String> = resp
        .state
        .iter()
        .filter(|(_, v)| v.starts_with('{') || v.starts_with('['))
        .map(|(k, _)| k)
        .collect();
    assert!(structured.is_empty(), "structured keys in response: {:?}", structured);

    let stored = h.sessions.get_state("c-1").await.unwrap();
    assert!(stored.contains_key("System"));
    assert!(stored["ContactAttributes"].contains("gold"));
}

#[tokio::test]
async fn scalar_params_reach_the_platform_as_strings() {
    let h = harness(bundle(
        "w1",
        vec![rule_set(
            "Main",
            &["MainLine"],
            vec![rule("Pause", "Wait", 10, json!({"seconds": 5, "music": true}))],
        )],
    ));
    let resp = step(&h, "c-1", InferenceEvent::NewInteraction).await;
    assert_eq!(resp.state["CurrentRule_seconds"], "5");
    assert_eq!(resp.state["CurrentRule_music"], "true");
    assert_eq!(scratch_count(&resp.state), 2);
}

#[tokio::test]
async fn subroutine_call_and_return_are_balanced() {
    let h = harness(call_flow("v1"));
    step(&h, "c-1", InferenceEvent::NewInteraction).await;

    let into_sub = step(&h, "c-1", InferenceEvent::NextStep).await;
    assert_eq!(
        into_sub.activated,
        vec![
            rule_ref("Main", "Count"),
            rule_ref("Main", "GoSub"),
            rule_ref("Sub", "SubMsg")
        ]
    );
    assert_eq!(into_sub.state["CurrentRuleSet"], "Sub");
    assert_eq!(into_sub.state["CurrentRule_message"], "In sub");
    assert!(!into_sub.state.contains_key("NextRuleSet"));
    assert!(!into_sub.state.contains_key("ReturnStack"));
    let stack = h.engine.session_state("c-1").await.unwrap().return_stack().unwrap();
    assert_eq!(stack.len(), 1);
    assert_eq!(stack[0].rule_set, "Main");
    assert_eq!(stack[0].rule, "GoSub");

    let back = step(&h, "c-1", InferenceEvent::NextStep).await;
    assert_eq!(back.activated, vec![rule_ref("Main", "Bye")]);
    assert_eq!(back.state["CurrentRuleSet"], "Main");
    assert_eq!(back.state["CurrentRule_message"], "Bye");
    assert!(h
        .engine
        .session_state("c-1")
        .await
        .unwrap()
        .return_stack()
        .unwrap()
        .is_empty());
    assert_eq!(back.state["Visits"], "1");

    let end = step(&h, "c-1", InferenceEvent::NextStep).await;
    assert_eq!(end.state["CurrentRuleType"], "Terminate");
    assert_eq!(scratch_count(&end.state), 0);
}

#[tokio::test]
async fn exhausted_rule_set_with_empty_stack_is_fatal() {
    let h = harness(call_flow("v1"));
    step(&h, "c-1", InferenceEvent::NewInteraction).await;
    for _ in 0..3 {
        step(&h, "c-1", InferenceEvent::NextStep).await;
    }
    let err = h
        .engine
        .invoke(request("c-1", InferenceEvent::NextStep))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::RuleSetExhausted { ref rule_set } if rule_set == "Main"));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn unrouted_number_is_fatal() {
    let h = harness(call_flow("v1"));
    let mut req = request("c-9", InferenceEvent::NewInteraction);
    req.dialed_number = Some("+0000".to_string());
    let err = h.engine.invoke(req).await.unwrap_err();
    assert!(matches!(err, EngineError::NoRuleSet { .. }));
}

#[tokio::test]
async fn system_is_computed_once() {
    let h = harness(call_flow("v1"));
    step(&h, "c-1", InferenceEvent::NewInteraction).await;
    let first = h.sessions.get_state("c-1").await.unwrap()["System"].clone();

    let later = Orchestrator::new(h.config.clone(), h.sessions.clone())
        .with_clock(Arc::new(FixedClock(datetime!(2026-03-05 08:00 UTC))));
    later
        .invoke(request("c-1", InferenceEvent::NextStep))
        .await
        .unwrap();
    assert_eq!(h.sessions.get_state("c-1").await.unwrap()["System"], first);
}

// ──────────────────────────────────────────────
// Events
// ──────────────────────────────────────────────

fn menu_flow() -> RuleBundle {
    bundle(
        "m1",
        vec![
            rule_set(
                "Main",
                &["MainLine"],
                vec![
                    rule(
                        "Menu",
                        "DTMFMenu",
                        10,
                        json!({"message": "Press 1 for billing", "dtmf1": "Billing"}),
                    ),
                    rule("NoMatch", "Message", 5, json!({"message": "Sorry"})),
                ],
            ),
            rule_set(
                "Billing",
                &[],
                vec![
                    rule("Account", "DTMFInput", 10, json!({"outputStateKey": "AccountNumber"})),
                    rule("Confirm", "Message", 5, json!({"message": "Account {{AccountNumber}}"})),
                ],
            ),
        ],
    )
}

#[tokio::test]
async fn menu_input_branches_and_input_is_stored() {
    let h = harness(menu_flow());
    step(&h, "c-1", InferenceEvent::NewInteraction).await;

    let billing = step(
        &h,
        "c-1",
        InferenceEvent::UserInput {
            input: "1".to_string(),
        },
    )
    .await;
    assert_eq!(billing.activated, vec![rule_ref("Billing", "Account")]);

    let confirm = step(
        &h,
        "c-1",
        InferenceEvent::UserInput {
            input: "12345".to_string(),
        },
    )
    .await;
    assert_eq!(confirm.state["AccountNumber"], "12345");
    assert_eq!(confirm.state["CurrentRule_message"], "Account 12345");
}

#[tokio::test]
async fn unmatched_menu_input_falls_through() {
    let h = harness(menu_flow());
    step(&h, "c-1", InferenceEvent::NewInteraction).await;
    let resp = step(
        &h,
        "c-1",
        InferenceEvent::UserInput {
            input: "9".to_string(),
        },
    )
    .await;
    assert_eq!(resp.activated, vec![rule_ref("Main", "NoMatch")]);
    assert_eq!(resp.state["UserInput"], "9");
}

#[tokio::test]
async fn input_on_a_non_collecting_rule_only_records_it() {
    let h = harness(call_flow("v1"));
    step(&h, "c-1", InferenceEvent::NewInteraction).await;
    let resp = step(
        &h,
        "c-1",
        InferenceEvent::UserInput {
            input: "5".to_string(),
        },
    )
    .await;
    assert_eq!(resp.state["UserInput"], "5");
    assert_eq!(resp.state["CurrentRuleSet"], "Sub");
    assert_eq!(resp.state["CurrentRule"], "SubMsg");
    assert!(!resp.state.contains_key("NextRuleSet"));
}

#[tokio::test]
async fn integration_callback_merges_result() {
    let h = harness(bundle(
        "i1",
        vec![rule_set(
            "Main",
            &["MainLine"],
            vec![
                rule("Lookup", "Integration", 10, json!({"integration": "crm"})),
                rule("Report", "Message", 5, json!({"message": "Hi {{IntegrationResult.name}}"})),
            ],
        )],
    ));
    let started = step(&h, "c-1", InferenceEvent::NewInteraction).await;
    assert_eq!(started.state["IntegrationStatus"], "RUNNING");

    let resp = step(
        &h,
        "c-1",
        InferenceEvent::IntegrationCallback {
            status: "DONE".to_string(),
            result: json!({"name": "Ada"}),
        },
    )
    .await;
    assert_eq!(resp.state["IntegrationStatus"], "DONE");
    assert_eq!(resp.state["CurrentRule_message"], "Hi Ada");
}

#[tokio::test]
async fn integration_wait_times_out_and_continues() {
    let h = harness(bundle(
        "i1",
        vec![rule_set(
            "Main",
            &["MainLine"],
            vec![
                rule("Lookup", "Integration", 10, json!({})),
                rule("After", "Message", 5, json!({"message": "{{IntegrationStatus}}"})),
            ],
        )],
    ));
    let mut cfg = EngineConfig::default();
    cfg.integration.window_ms = 20;
    cfg.integration.poll_ms = 5;
    let engine = Orchestrator::new(h.config.clone(), h.sessions.clone()).with_config(cfg);

    engine
        .invoke(request("c-1", InferenceEvent::NewInteraction))
        .await
        .unwrap();
    let resp = engine
        .invoke(request("c-1", InferenceEvent::IntegrationWait))
        .await
        .unwrap();
    assert_eq!(resp.state["IntegrationStatus"], "TIMEOUT");
    assert_eq!(resp.state["CurrentRule_message"], "TIMEOUT");
}

// ──────────────────────────────────────────────
// Contact attributes and Queue export
// ──────────────────────────────────────────────

fn queue_flow() -> RuleBundle {
    bundle(
        "q1",
        vec![rule_set(
            "Main",
            &["MainLine"],
            vec![
                rule(
                    "Tag",
                    "SetAttributes",
                    20,
                    json!({"setAttributes": {"Tier": "gold", "Lang": "en"}}),
                ),
                rule("ToSales", "Queue", 10, json!({"queueName": "Sales", "message": "Hold"})),
            ],
        )],
    )
}

#[tokio::test]
async fn queue_exports_changed_attributes() {
    let h = harness(queue_flow());
    let mut req = request("c-1", InferenceEvent::NewInteraction);
    req.contact_attributes = Some(BTreeMap::from([
        ("Lang".to_string(), "en".to_string()),
        ("Tier".to_string(), "silver".to_string()),
    ]));
    let resp = h.engine.invoke(req).await.unwrap();

    assert_eq!(resp.state["CurrentRule_attributeKey1"], "Tier");
    assert_eq!(resp.state["CurrentRule_attributeValue1"], "gold");
    assert!(!resp.state.contains_key("CurrentRule_attributeKey2"));
    // Two params plus one exported pair.
    assert_eq!(scratch_count(&resp.state), 4);
}

#[tokio::test]
async fn oversized_queue_delta_is_fatal_before_export() {
    let h = harness(bundle(
        "q2",
        vec![rule_set(
            "Main",
            &["MainLine"],
            vec![rule("ToSales", "Queue", 10, json!({"queueName": "Sales"}))],
        )],
    ));
    let attrs: serde_json::Map<String, Value> = (0..201)
        .map(|i| (format!("k{}", i), json!("v")))
        .collect();
    let seed = StateChanges::from([(
        "ContactAttributes".to_string(),
        Some(Value::Object(attrs).to_string()),
    )]);
    h.sessions.set_state_subset("c-1", &seed, 3600).await.unwrap();

    let err = h
        .engine
        .invoke(request("c-1", InferenceEvent::NewInteraction))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::AttributeDeltaOverflow {
            count: 201,
            limit: 200
        }
    ));
    let stored = h.sessions.get_state("c-1").await.unwrap();
    assert!(!stored.contains_key("CurrentRule_attributeKey1"));
    assert!(!stored.contains_key("CurrentRule"));
}

struct FlakyPlatform {
    calls: AtomicUsize,
    failures: usize,
}

#[async_trait]
impl PlatformClient for FlakyPlatform {
    async fn get_contact_attributes(
        &self,
        _session_id: &str,
    ) -> Result<BTreeMap<String, String>, CollaboratorError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            Err(CollaboratorError::Transient("throttled".to_string()))
        } else {
            Ok(BTreeMap::from([("Segment".to_string(), "retail".to_string())]))
        }
    }
}

#[tokio::test]
async fn platform_attributes_are_fetched_with_retry() {
    let h = harness(queue_flow());
    let platform = Arc::new(FlakyPlatform {
        calls: AtomicUsize::new(0),
        failures: 2,
    });
    let engine = Orchestrator::new(h.config.clone(), h.sessions.clone())
        .with_collaborators(Collaborators {
            platform: Some(platform.clone()),
            ..Collaborators::default()
        })
        .with_config(EngineConfig {
            retry: RetryPolicy {
                max_retries: 3,
                base_delay_ms: 1,
                max_delay_ms: 2,
            },
            ..EngineConfig::default()
        });

    let resp = engine
        .invoke(request("c-1", InferenceEvent::NewInteraction))
        .await
        .unwrap();
    assert_eq!(platform.calls.load(Ordering::SeqCst), 3);
    assert!(!resp.state.contains_key("ContactAttributes"));
    let attrs = engine.session_state("c-1").await.unwrap().contact_attributes();
    assert_eq!(attrs["Segment"], "retail");
    assert_eq!(attrs["Tier"], "gold");
}

#[tokio::test]
async fn exhausted_platform_retries_are_not_fatal_errors() {
    let h = harness(queue_flow());
    let engine = Orchestrator::new(h.config.clone(), h.sessions.clone())
        .with_collaborators(Collaborators {
            platform: Some(Arc::new(FlakyPlatform {
                calls: AtomicUsize::new(0),
                failures: 10,
            })),
            ..Collaborators::default()
        })
        .with_config(EngineConfig {
            retry: RetryPolicy {
                max_retries: 1,
                base_delay_ms: 1,
                max_delay_ms: 1,
            },
            ..EngineConfig::default()
        });
    let err = engine
        .invoke(request("c-1", InferenceEvent::NewInteraction))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Platform(_)));
    assert!(!err.is_fatal());
}

// ──────────────────────────────────────────────
// Cache and configuration
// ──────────────────────────────────────────────

#[tokio::test]
async fn published_change_is_picked_up() {
    let h = harness(call_flow("v1"));
    step(&h, "c-1", InferenceEvent::NewInteraction).await;

    let mut changed = call_flow("v2");
    changed.rule_sets[0].rules[0].params.insert("message".into(), json!("Hello again"));
    h.config.publish(changed).await;

    let resp = step(&h, "c-2", InferenceEvent::NewInteraction).await;
    assert_eq!(resp.state["CurrentRule_message"], "Hello again");
    assert_eq!(h.config.load_count(), 2);
}

#[tokio::test]
async fn activation_sees_config_view() {
    let h = harness(bundle(
        "c1",
        vec![rule_set(
            "Main",
            &["MainLine"],
            vec![
                json!({
                    "rule_id": "r-au", "rule_set_id": "rs", "name": "Aussie", "enabled": true,
                    "priority": 10, "type": "Message", "params": {"message": "G'day"},
                    "activation": {"conditions": [{"key": "Config.TimeZone", "op": "equals", "value": "+10:00"}]}
                }),
                rule("Default", "Message", 5, json!({"message": "Hello"})),
            ],
        )],
    ));
    let resp = step(&h, "c-1", InferenceEvent::NewInteraction).await;
    assert_eq!(resp.activated, vec![rule_ref("Main", "Aussie")]);
    assert!(!resp.state.contains_key("Config"));
}

#[tokio::test]
async fn rule_set_cycle_hits_step_limit() {
    let h = harness(bundle(
        "loop",
        vec![
            rule_set(
                "Main",
                &["MainLine"],
                vec![rule("ToB", "RuleSet", 1, json!({"ruleSetName": "B"}))],
            ),
            rule_set("B", &[], vec![rule("ToMain", "RuleSet", 1, json!({"ruleSetName": "Main"}))]),
        ],
    ));
    let engine = Orchestrator::new(h.config.clone(), h.sessions.clone()).with_config(EngineConfig {
        max_steps: 10,
        ..EngineConfig::default()
    });
    let err = engine
        .invoke(request("c-1", InferenceEvent::NewInteraction))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::StepLimit { max_steps: 10, .. }));
}

#[tokio::test]
async fn attribute_limit_is_clamped_to_the_cap() {
    let h = harness(call_flow("v1"));
    let engine = Orchestrator::new(h.config.clone(), h.sessions.clone()).with_config(EngineConfig {
        attribute_limit: 10_000,
        ..EngineConfig::default()
    });
    assert_eq!(engine.config().attribute_limit, 200);
}
