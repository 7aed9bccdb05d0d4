//! Integration tests for the turn engine: selection, two-phase dispatch,
//! merge ordering, snapshot isolation, and failure isolation.

use agentboard::agent::{Agent, AgentConfig, AgentError};
use agentboard::callbacks::{CallbackHandler, SkipReason};
use agentboard::engine::AgentEngine;
use agentboard::llm::{ChatMessage, LlmClient};
use agentboard::models::{
    AgentContext, AgentResponse, ConfigOverride, Event, Fact, InsightType, TranscriptSegment,
    TriggerType,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ---- Test fixtures ----

struct NullLlm;

#[async_trait]
impl LlmClient for NullLlm {
    async fn generate_json(&self, _model: &str, _messages: &[ChatMessage]) -> Option<Value> {
        None
    }
}

fn engine() -> AgentEngine {
    let _ = env_logger::builder().is_test(true).try_init();
    AgentEngine::with_llm_client(Arc::new(NullLlm))
}

type ResponseFn = dyn Fn(&AgentContext) -> Result<Option<AgentResponse>, AgentError> + Send + Sync;

/// A scriptable agent: counts calls and delegates to a closure.
struct MockAgent {
    config: AgentConfig,
    calls: Arc<AtomicUsize>,
    respond: Box<ResponseFn>,
}

impl MockAgent {
    fn new(name: &str) -> Self {
        Self {
            config: AgentConfig::new(name),
            calls: Arc::new(AtomicUsize::new(0)),
            respond: Box::new(|_| Ok(Some(AgentResponse::default()))),
        }
    }

    fn configure(mut self, f: impl FnOnce(AgentConfig) -> AgentConfig) -> Self {
        self.config = f(self.config);
        self
    }

    fn responding(
        mut self,
        f: impl Fn(&AgentContext) -> Result<Option<AgentResponse>, AgentError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.respond = Box::new(f);
        self
    }

    fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl Agent for MockAgent {
    fn config(&self) -> &AgentConfig {
        &self.config
    }

    async fn evaluate(&self, context: &AgentContext) -> Result<Option<AgentResponse>, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.respond)(context)
    }
}

/// Records lifecycle callbacks for assertions.
#[derive(Default)]
struct Recorder {
    errors: AtomicUsize,
    skips: Mutex<Vec<(String, SkipReason)>>,
    phases: Mutex<Vec<u32>>,
}

#[async_trait]
impl CallbackHandler for Recorder {
    async fn on_phase_start(&self, phase: u32, _agent_names: &[String]) {
        self.phases.lock().unwrap().push(phase);
    }

    async fn on_agent_error(&self, _agent_name: &str, _error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_agent_skipped(&self, agent_name: &str, reason: SkipReason) {
        self.skips
            .lock()
            .unwrap()
            .push((agent_name.to_string(), reason));
    }
}

fn sample_context() -> AgentContext {
    let mut context = AgentContext::new("test_session")
        .with_segment(TranscriptSegment::new("USER", "Hello", 1.0))
        .with_turn_count(1);
    context.blackboard.set_var("phase", json!("discovery"));
    context
}

fn vars(pairs: &[(&str, Value)]) -> std::collections::HashMap<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

// ---- Registration and lookup helpers ----

#[test]
fn test_register_agent() {
    let mut engine = engine();
    engine.register_agent(Box::new(MockAgent::new("test_agent")));
    assert_eq!(engine.agents().len(), 1);
}

#[test]
fn test_get_agents_by_trigger_type() {
    let mut engine = engine();
    engine.register_agent(Box::new(MockAgent::new("agent1")));
    engine.register_agent(Box::new(
        MockAgent::new("agent2")
            .configure(|c| c.with_trigger_types(vec![TriggerType::Keyword])),
    ));

    assert_eq!(
        engine.get_agents_by_trigger_type(TriggerType::TurnBased).len(),
        1
    );
    assert_eq!(
        engine.get_agents_by_trigger_type(TriggerType::Keyword).len(),
        1
    );
    assert_eq!(
        engine.get_agents_by_trigger_type(TriggerType::Silence).len(),
        0
    );
}

#[test]
fn test_get_event_subscribers() {
    let mut engine = engine();
    engine.register_agent(Box::new(MockAgent::new("agent1").configure(|c| {
        c.with_subscribed_events(vec!["question_detected".to_string()])
    })));
    engine.register_agent(Box::new(MockAgent::new("agent2").configure(|c| {
        c.with_subscribed_events(vec!["objection_raised".to_string()])
    })));
    engine.register_agent(Box::new(MockAgent::new("agent3")));

    let subscribers = engine.get_event_subscribers(&["question_detected".to_string()]);
    assert_eq!(subscribers.len(), 1);
    assert_eq!(subscribers[0].config().name, "agent1");
}

// ---- Basic turns ----

#[tokio::test]
async fn test_basic_turn() {
    let mut engine = engine();
    let agent = MockAgent::new("test_agent");
    let calls = agent.call_counter();
    engine.register_agent(Box::new(agent));

    let mut context = sample_context();
    let response = engine
        .process_turn(&mut context, None, TriggerType::TurnBased, None)
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(response.insights.is_empty());
}

#[tokio::test]
async fn test_sys_variables_stamped() {
    let mut engine = engine();
    engine.register_agent(Box::new(MockAgent::new("test_agent")));

    let mut context = sample_context();
    engine
        .process_turn(&mut context, None, TriggerType::TurnBased, None)
        .await;

    let bb = &context.blackboard;
    assert_eq!(bb.get_var("sys.turn_count"), Some(&json!(1)));
    assert_eq!(bb.get_var("sys.session_id"), Some(&json!("test_session")));
    assert_eq!(bb.get_var("sys.trigger_type"), Some(&json!("turn_based")));
}

#[tokio::test]
async fn test_shared_state_synced_from_blackboard() {
    let mut engine = engine();
    let seen: Arc<Mutex<Option<Value>>> = Arc::new(Mutex::new(None));
    let seen_in_agent = Arc::clone(&seen);

    engine.register_agent(Box::new(MockAgent::new("observer").responding(move |ctx| {
        *seen_in_agent.lock().unwrap() = ctx.shared_state.get("new_key").cloned();
        Ok(Some(AgentResponse::default()))
    })));

    let mut context = sample_context();
    context.blackboard.set_var("new_key", json!("new_value"));
    engine
        .process_turn(&mut context, None, TriggerType::TurnBased, None)
        .await;

    assert_eq!(*seen.lock().unwrap(), Some(json!("new_value")));
}

// ---- Selection ----

#[tokio::test]
async fn test_allowed_agent_ids_filter() {
    let mut engine = engine();
    let agent1 = MockAgent::new("agent1");
    let agent2 = MockAgent::new("agent2");
    let calls1 = agent1.call_counter();
    let calls2 = agent2.call_counter();
    engine.register_agent(Box::new(agent1));
    engine.register_agent(Box::new(agent2));

    let mut context = sample_context();
    engine
        .process_turn(
            &mut context,
            Some(&["agent1".to_string()]),
            TriggerType::TurnBased,
            None,
        )
        .await;

    assert_eq!(calls1.load(Ordering::SeqCst), 1);
    assert_eq!(calls2.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_empty_allow_list_runs_nobody() {
    let mut engine = engine();
    let agent = MockAgent::new("agent1");
    let calls = agent.call_counter();
    engine.register_agent(Box::new(agent));

    let mut context = sample_context();
    let response = engine
        .process_turn(&mut context, Some(&[]), TriggerType::TurnBased, None)
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(response.insights.is_empty());
}

#[tokio::test]
async fn test_trigger_conditions_gate_selection() {
    let recorder = Arc::new(Recorder::default());
    let mut engine = engine().with_callback(recorder.clone());

    let agent = MockAgent::new("conditional_agent").configure(|c| {
        c.with_trigger_conditions(
            serde_json::from_value(json!({
                "mode": "all",
                "rules": [{"var": "phase", "op": "eq", "value": "closing"}]
            }))
            .unwrap(),
        )
    });
    let calls = agent.call_counter();
    engine.register_agent(Box::new(agent));

    // Phase is "discovery"; the condition requires "closing".
    let mut context = sample_context();
    engine
        .process_turn(&mut context, None, TriggerType::TurnBased, None)
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    let skips = recorder.skips.lock().unwrap();
    assert!(skips
        .iter()
        .any(|(name, reason)| name == "conditional_agent"
            && *reason == SkipReason::ConditionsNotMet));
}

#[tokio::test]
async fn test_trigger_type_mismatch_skips() {
    let recorder = Arc::new(Recorder::default());
    let mut engine = engine().with_callback(recorder.clone());

    let agent = MockAgent::new("keyword_only")
        .configure(|c| c.with_trigger_types(vec![TriggerType::Keyword]));
    let calls = agent.call_counter();
    engine.register_agent(Box::new(agent));

    let mut context = sample_context();
    engine
        .process_turn(&mut context, None, TriggerType::TurnBased, None)
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    let skips = recorder.skips.lock().unwrap();
    assert!(skips
        .iter()
        .any(|(name, reason)| name == "keyword_only"
            && *reason == SkipReason::TriggerTypeMismatch));
}

// ---- Two-phase event dispatch ----

#[tokio::test]
async fn test_events_dispatch_phase_two() {
    let recorder = Arc::new(Recorder::default());
    let mut engine = engine().with_callback(recorder.clone());

    let emitter = MockAgent::new("emitter").responding(|_| {
        Ok(Some(AgentResponse {
            events: vec![Event::new("question_detected", "emitter", 1.0)
                .with_payload("question", json!("What is pricing?"))],
            ..Default::default()
        }))
    });
    // Subscription only: no turn-based trigger type at all.
    let subscriber = MockAgent::new("subscriber")
        .configure(|c| {
            c.with_trigger_types(vec![TriggerType::Event])
                .with_subscribed_events(vec!["question_detected".to_string()])
        })
        .responding(|ctx| {
            assert_eq!(ctx.phase, 2);
            assert_eq!(ctx.trigger_type, TriggerType::Event);
            let mut response = AgentResponse::default();
            response.insights.push(agentboard::models::Insight::new(
                "subscriber",
                "subscriber",
                InsightType::Suggestion,
                "Answer the question.",
            ));
            Ok(Some(response))
        });

    let emitter_calls = emitter.call_counter();
    let subscriber_calls = subscriber.call_counter();
    engine.register_agent(Box::new(emitter));
    engine.register_agent(Box::new(subscriber));

    let mut context = sample_context();
    let response = engine
        .process_turn(&mut context, None, TriggerType::TurnBased, None)
        .await;

    assert_eq!(emitter_calls.load(Ordering::SeqCst), 1);
    assert_eq!(subscriber_calls.load(Ordering::SeqCst), 1);
    assert!(response
        .insights
        .iter()
        .any(|i| i.content == "Answer the question."));
    assert_eq!(*recorder.phases.lock().unwrap(), vec![1, 2]);
}

#[tokio::test]
async fn test_phase2_events_recorded_but_not_dispatched() {
    let mut engine = engine();

    let emitter = MockAgent::new("emitter").responding(|_| {
        Ok(Some(AgentResponse {
            events: vec![Event::new("event1", "emitter", 1.0)],
            ..Default::default()
        }))
    });
    let subscriber = MockAgent::new("subscriber")
        .configure(|c| {
            c.with_trigger_types(vec![TriggerType::Event])
                .with_subscribed_events(vec!["event1".to_string()])
        })
        .responding(|_| {
            Ok(Some(AgentResponse {
                events: vec![Event::new("event2", "subscriber", 2.0)],
                ..Default::default()
            }))
        });
    // Would run in a phase 3, if one existed.
    let would_be = MockAgent::new("would_be").configure(|c| {
        c.with_trigger_types(vec![TriggerType::Event])
            .with_subscribed_events(vec!["event2".to_string()])
    });

    let would_be_calls = would_be.call_counter();
    engine.register_agent(Box::new(emitter));
    engine.register_agent(Box::new(subscriber));
    engine.register_agent(Box::new(would_be));

    let mut context = sample_context();
    let response = engine
        .process_turn(&mut context, None, TriggerType::TurnBased, None)
        .await;

    // event2 is recorded in the aggregate…
    assert!(response.events.iter().any(|e| e.name == "event2"));
    // …but dispatches no phase 3.
    assert_eq!(would_be_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_phase2_conditions_see_post_phase1_state() {
    let mut engine = engine();

    let emitter = MockAgent::new("emitter").responding(|_| {
        Ok(Some(AgentResponse {
            variable_updates: vars(&[("ready", json!(true))]),
            events: vec![Event::new("go", "emitter", 1.0)],
            ..Default::default()
        }))
    });
    let subscriber = MockAgent::new("subscriber").configure(|c| {
        c.with_trigger_types(vec![TriggerType::Event])
            .with_subscribed_events(vec!["go".to_string()])
            .with_trigger_conditions(
                serde_json::from_value(json!({
                    "rules": [{"var": "ready", "op": "eq", "value": true}]
                }))
                .unwrap(),
            )
    });

    let subscriber_calls = subscriber.call_counter();
    engine.register_agent(Box::new(emitter));
    engine.register_agent(Box::new(subscriber));

    let mut context = sample_context();
    engine
        .process_turn(&mut context, None, TriggerType::TurnBased, None)
        .await;

    // `ready` was written by phase 1, so the phase-2 condition passes.
    assert_eq!(subscriber_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_events_cleared_at_turn_end() {
    let mut engine = engine();
    engine.register_agent(Box::new(MockAgent::new("emitter").responding(|_| {
        Ok(Some(AgentResponse {
            events: vec![Event::new("transient", "emitter", 1.0)],
            ..Default::default()
        }))
    })));

    let mut context = sample_context();
    let response = engine
        .process_turn(&mut context, None, TriggerType::TurnBased, None)
        .await;

    assert!(context.blackboard.events.is_empty());
    assert!(response.events.iter().any(|e| e.name == "transient"));
}

// ---- Merge ordering ----

#[tokio::test]
async fn test_higher_priority_wins() {
    let mut engine = engine();

    engine.register_agent(Box::new(
        MockAgent::new("low")
            .configure(|c| c.with_priority(1))
            .responding(|_| {
                Ok(Some(AgentResponse {
                    variable_updates: vars(&[("phase", json!("low_priority_value"))]),
                    ..Default::default()
                }))
            }),
    ));
    engine.register_agent(Box::new(
        MockAgent::new("high")
            .configure(|c| c.with_priority(10))
            .responding(|_| {
                Ok(Some(AgentResponse {
                    variable_updates: vars(&[("phase", json!("high_priority_value"))]),
                    ..Default::default()
                }))
            }),
    ));

    let mut context = sample_context();
    let response = engine
        .process_turn(&mut context, None, TriggerType::TurnBased, None)
        .await;

    assert_eq!(
        response.variable_updates.get("phase"),
        Some(&json!("high_priority_value"))
    );
    assert_eq!(
        context.blackboard.get_var("phase"),
        Some(&json!("high_priority_value"))
    );
    // v1 consumers read the same winner from state_updates.
    assert_eq!(
        response.state_updates.get("phase"),
        Some(&json!("high_priority_value"))
    );
}

#[tokio::test]
async fn test_equal_priority_later_registration_wins() {
    let mut engine = engine();

    engine.register_agent(Box::new(MockAgent::new("first").responding(|_| {
        Ok(Some(AgentResponse {
            variable_updates: vars(&[("winner", json!("first"))]),
            ..Default::default()
        }))
    })));
    engine.register_agent(Box::new(MockAgent::new("second").responding(|_| {
        Ok(Some(AgentResponse {
            variable_updates: vars(&[("winner", json!("second"))]),
            ..Default::default()
        }))
    })));

    let mut context = sample_context();
    engine
        .process_turn(&mut context, None, TriggerType::TurnBased, None)
        .await;

    assert_eq!(context.blackboard.get_var("winner"), Some(&json!("second")));
}

#[tokio::test]
async fn test_insights_concatenate_in_merge_order() {
    let mut engine = engine();

    engine.register_agent(Box::new(
        MockAgent::new("later")
            .configure(|c| c.with_priority(5))
            .responding(|_| {
                let mut r = AgentResponse::default();
                r.insights.push(agentboard::models::Insight::new(
                    "later",
                    "later",
                    InsightType::Suggestion,
                    "second",
                ));
                Ok(Some(r))
            }),
    ));
    engine.register_agent(Box::new(
        MockAgent::new("earlier")
            .configure(|c| c.with_priority(1))
            .responding(|_| {
                let mut r = AgentResponse::default();
                r.insights.push(agentboard::models::Insight::new(
                    "earlier",
                    "earlier",
                    InsightType::Suggestion,
                    "first",
                ));
                Ok(Some(r))
            }),
    ));

    let mut context = sample_context();
    let response = engine
        .process_turn(&mut context, None, TriggerType::TurnBased, None)
        .await;

    let contents: Vec<&str> = response.insights.iter().map(|i| i.content.as_str()).collect();
    assert_eq!(contents, vec!["first", "second"]);
}

#[tokio::test]
async fn test_queue_and_fact_and_memory_merge() {
    let mut engine = engine();

    engine.register_agent(Box::new(
        MockAgent::new("extractor")
            .configure(|c| c.with_id("extractor"))
            .responding(|_| {
                Ok(Some(AgentResponse {
                    queue_pushes: [(
                        "tasks".to_string(),
                        vec![json!("follow up"), json!("send quote")],
                    )]
                    .into(),
                    facts: vec![Fact::new("budget", json!(50_000), 0.9, "extractor", 1.0)],
                    memory_updates: vars(&[("seen_budget", json!(true))]),
                    ..Default::default()
                }))
            }),
    ));

    let mut context = sample_context();
    let response = engine
        .process_turn(&mut context, None, TriggerType::TurnBased, None)
        .await;

    assert_eq!(context.blackboard.queue_len("tasks"), 2);
    assert_eq!(context.blackboard.peek_queue("tasks"), Some(&json!("follow up")));
    assert!(context.blackboard.has_fact("budget", None));
    assert_eq!(
        context
            .blackboard
            .memory_of("extractor")
            .and_then(|m| m.get("seen_budget")),
        Some(&json!(true))
    );
    assert_eq!(response.queue_pushes.get("tasks").map(Vec::len), Some(2));
    assert_eq!(response.facts.len(), 1);
}

#[tokio::test]
async fn test_data_sidecar_lists_concatenate() {
    let mut engine = engine();

    engine.register_agent(Box::new(
        MockAgent::new("a")
            .configure(|c| c.with_priority(1))
            .responding(|_| {
                Ok(Some(AgentResponse {
                    data: vars(&[("ui_actions", json!(["highlight"]))]),
                    ..Default::default()
                }))
            }),
    ));
    engine.register_agent(Box::new(
        MockAgent::new("b")
            .configure(|c| c.with_priority(2))
            .responding(|_| {
                Ok(Some(AgentResponse {
                    data: vars(&[("ui_actions", json!(["scroll"]))]),
                    ..Default::default()
                }))
            }),
    ));

    let mut context = sample_context();
    let response = engine
        .process_turn(&mut context, None, TriggerType::TurnBased, None)
        .await;

    assert_eq!(
        response.data.get("ui_actions"),
        Some(&json!(["highlight", "scroll"]))
    );
}

// ---- Snapshot isolation ----

#[tokio::test]
async fn test_agents_see_phase_snapshot() {
    let mut engine = engine();
    let seen: Arc<Mutex<Vec<i64>>> = Arc::new(Mutex::new(Vec::new()));

    for name in ["agent1", "agent2"] {
        let seen = Arc::clone(&seen);
        engine.register_agent(Box::new(MockAgent::new(name).responding(move |ctx| {
            let counter = ctx
                .blackboard
                .get_var("counter")
                .and_then(Value::as_i64)
                .unwrap_or(0);
            seen.lock().unwrap().push(counter);
            Ok(Some(AgentResponse {
                variable_updates: vars(&[("counter", json!(counter + 1))]),
                ..Default::default()
            }))
        })));
    }

    let mut context = sample_context();
    context.blackboard.set_var("counter", json!(0));
    engine
        .process_turn(&mut context, None, TriggerType::TurnBased, None)
        .await;

    // Both agents observed the snapshot value, not each other's writes.
    assert_eq!(*seen.lock().unwrap(), vec![0, 0]);
    // Last-writer-wins: both wrote 1.
    assert_eq!(context.blackboard.get_var("counter"), Some(&json!(1)));
}

// ---- Atomic failure ----

#[tokio::test]
async fn test_failed_agent_contributes_nothing() {
    let recorder = Arc::new(Recorder::default());
    let mut engine = engine().with_callback(recorder.clone());

    engine.register_agent(Box::new(MockAgent::new("success").responding(|_| {
        Ok(Some(AgentResponse {
            variable_updates: vars(&[("ok", json!("yes"))]),
            ..Default::default()
        }))
    })));
    engine.register_agent(Box::new(MockAgent::new("flaky").responding(|_| {
        Err("model exploded".into())
    })));

    let mut context = sample_context();
    let response = engine
        .process_turn(&mut context, None, TriggerType::TurnBased, None)
        .await;

    // The successful agent's updates landed…
    assert_eq!(context.blackboard.get_var("ok"), Some(&json!("yes")));
    // …and the failed agent left no trace beyond the system error insight.
    assert_eq!(response.variable_updates.len(), 1);
    assert!(response.events.is_empty());
    assert!(response.facts.is_empty());
    assert!(context.blackboard.memory_of("flaky").is_none());

    let errors: Vec<&agentboard::models::Insight> = response
        .insights
        .iter()
        .filter(|i| i.insight_type == InsightType::Error)
        .collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].agent_id, "system");
    assert!(errors[0].content.contains("flaky"));
    assert!(errors[0].content.contains("model exploded"));

    assert_eq!(recorder.errors.load(Ordering::SeqCst), 1);
}

// ---- Force semantics ----

#[tokio::test]
async fn test_force_bypasses_type_cooldown_and_conditions() {
    let mut engine = engine();

    let agent = MockAgent::new("stubborn").configure(|c| {
        c.with_trigger_types(vec![TriggerType::Keyword])
            .with_cooldown(9999)
            .with_trigger_conditions(
                serde_json::from_value(json!({
                    "rules": [{"var": "phase", "op": "eq", "value": "never"}]
                }))
                .unwrap(),
            )
    });
    let calls = agent.call_counter();
    engine.register_agent(Box::new(agent));

    let mut context = sample_context();

    // Force runs it despite the keyword-only trigger and false conditions.
    engine
        .process_turn(&mut context, None, TriggerType::Force, None)
        .await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // It "just ran"; force bypasses the 9999s cooldown too.
    engine
        .process_turn(&mut context, None, TriggerType::Force, None)
        .await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // A normal turn still respects the trigger-type check.
    engine
        .process_turn(&mut context, None, TriggerType::TurnBased, None)
        .await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_force_does_not_bypass_allow_list() {
    let mut engine = engine();

    let agent = MockAgent::new("stubborn")
        .configure(|c| c.with_trigger_types(vec![TriggerType::Keyword]));
    let calls = agent.call_counter();
    engine.register_agent(Box::new(agent));

    let mut context = sample_context();
    engine
        .process_turn(
            &mut context,
            Some(&["other".to_string()]),
            TriggerType::Force,
            None,
        )
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

// ---- Cooldown ----

#[tokio::test]
async fn test_cooldown_blocks_second_run() {
    let recorder = Arc::new(Recorder::default());
    let mut engine = engine().with_callback(recorder.clone());

    let agent = MockAgent::new("slow").configure(|c| c.with_cooldown(9999));
    let calls = agent.call_counter();
    engine.register_agent(Box::new(agent));

    let mut context = sample_context();
    engine
        .process_turn(&mut context, None, TriggerType::TurnBased, None)
        .await;
    engine
        .process_turn(&mut context, None, TriggerType::TurnBased, None)
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let skips = recorder.skips.lock().unwrap();
    assert!(skips
        .iter()
        .any(|(name, reason)| name == "slow" && *reason == SkipReason::CooldownActive));
}

#[tokio::test]
async fn test_cooldown_modifier_floors_at_five_seconds() {
    let mut engine = engine();

    let agent = MockAgent::new("tunable").configure(|c| c.with_cooldown(10));
    let calls = agent.call_counter();
    engine.register_agent(Box::new(agent));

    let mut context = sample_context();
    context.agent_config_overrides.insert(
        "tunable".to_string(),
        ConfigOverride {
            cooldown_modifier: Some(-100_000),
            model: None,
        },
    );

    engine
        .process_turn(&mut context, None, TriggerType::TurnBased, None)
        .await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Even with a hugely negative modifier the effective cooldown is floored
    // at 5 seconds, so an immediate re-run is still blocked.
    engine
        .process_turn(&mut context, None, TriggerType::TurnBased, None)
        .await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// ---- Keyword triggers ----

#[test]
fn test_check_keyword_triggers() {
    let mut engine = engine();
    engine.register_agent(Box::new(MockAgent::new("pricing_bot").configure(|c| {
        c.with_trigger_types(vec![TriggerType::Keyword])
            .with_trigger_keywords(vec!["price".to_string(), "budget".to_string()])
    })));
    engine.register_agent(Box::new(MockAgent::new("other_bot")));

    // Case-insensitive substring match.
    let matches = engine.check_keyword_triggers("What's the PRICE of this?", None);
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].0.name, "pricing_bot");
    assert_eq!(matches[0].1, "price");

    // At most one match per agent even when several keywords hit.
    let matches = engine.check_keyword_triggers("price and budget both matter", None);
    assert_eq!(matches.len(), 1);

    // The allow-list applies.
    let matches = engine.check_keyword_triggers("price", Some(&[]));
    assert!(matches.is_empty());

    let matches = engine.check_keyword_triggers("nothing relevant here", None);
    assert!(matches.is_empty());
}

// ---- v1 compatibility ----

#[tokio::test]
async fn test_legacy_state_updates_become_variable_writes() {
    let mut engine = engine();
    engine.register_agent(Box::new(MockAgent::new("legacy").responding(|_| {
        Ok(Some(AgentResponse {
            state_updates: vars(&[("legacy_key", json!("legacy_value"))]),
            ..Default::default()
        }))
    })));

    let mut context = sample_context();
    let response = engine
        .process_turn(&mut context, None, TriggerType::TurnBased, None)
        .await;

    assert_eq!(
        context.blackboard.get_var("legacy_key"),
        Some(&json!("legacy_value"))
    );
    assert_eq!(
        response.state_updates.get("legacy_key"),
        Some(&json!("legacy_value"))
    );
}

#[tokio::test]
async fn test_legacy_memory_key_routes_to_memory_namespace() {
    let mut engine = engine();
    engine.register_agent(Box::new(MockAgent::new("legacy").responding(|_| {
        Ok(Some(AgentResponse {
            state_updates: vars(&[("memory_legacy", json!({"mood": "optimistic"}))]),
            ..Default::default()
        }))
    })));

    let mut context = sample_context();
    engine
        .process_turn(&mut context, None, TriggerType::TurnBased, None)
        .await;

    assert_eq!(
        context
            .blackboard
            .memory_of("legacy")
            .and_then(|m| m.get("mood")),
        Some(&json!("optimistic"))
    );
    // Routed writes do not land in the variable store.
    assert!(!context.blackboard.has_var("memory_legacy"));
}

#[tokio::test]
async fn test_variable_updates_take_precedence_over_state_updates() {
    let mut engine = engine();
    engine.register_agent(Box::new(MockAgent::new("mixed").responding(|_| {
        Ok(Some(AgentResponse {
            variable_updates: vars(&[("v2_key", json!("v2"))]),
            state_updates: vars(&[("v1_key", json!("v1"))]),
            ..Default::default()
        }))
    })));

    let mut context = sample_context();
    engine
        .process_turn(&mut context, None, TriggerType::TurnBased, None)
        .await;

    // When variable_updates is present the legacy field is ignored.
    assert_eq!(context.blackboard.get_var("v2_key"), Some(&json!("v2")));
    assert!(!context.blackboard.has_var("v1_key"));
}
