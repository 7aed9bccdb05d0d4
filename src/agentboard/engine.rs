//! The turn engine: selection, two-phase scheduling, and deterministic merge.
//!
//! One call to [`AgentEngine::process_turn`] is one **turn**. The engine
//! stamps trigger info and `sys.*` variables into the context, selects the
//! eligible agents, snapshots the blackboard, fans the selected agents out
//! **in parallel** against the immutable snapshot, and merges their responses
//! into the live blackboard in `(priority ascending, registration order)`
//! order — so the highest-priority agent writes last and wins under
//! last-write-wins. Events emitted in phase 1 dispatch a second phase to
//! their subscribers; events emitted in phase 2 are recorded in the aggregate
//! response but dispatch no further phase.
//!
//! ```text
//!  process_turn
//!    ├─ stamp sys.* / shared_state sync
//!    ├─ phase 1: select → snapshot → fan out → barrier → merge
//!    ├─ phase 2: subscribers of phase-1 events → snapshot → fan out → merge
//!    └─ clear events, copy variable_updates → state_updates, return
//! ```
//!
//! # Failure isolation
//!
//! An agent whose `evaluate` fails contributes **nothing**: no insights, no
//! variable writes, no facts, no events, no queue pushes, no memory. The
//! engine surfaces the failure as a system `error` insight in the aggregate
//! response and fires `on_agent_error`. `process_turn` itself never errors —
//! the aggregate response is always returned.
//!
//! # Example
//!
//! ```rust,no_run
//! use agentboard::engine::AgentEngine;
//! use agentboard::models::{AgentContext, TranscriptSegment, TriggerType};
//!
//! # async {
//! let mut engine = AgentEngine::new(Some("sk-..."));
//! // engine.register_agent(Box::new(my_agent));
//!
//! let mut context = AgentContext::new("session-1")
//!     .with_segment(TranscriptSegment::new("USER", "What would this cost us?", 12.5))
//!     .with_turn_count(1);
//!
//! let response = engine
//!     .process_turn(&mut context, None, TriggerType::TurnBased, None)
//!     .await;
//! for insight in &response.insights {
//!     println!("[{}] {}", insight.agent_name, insight.content);
//! }
//! # };
//! ```

use crate::agentboard::agent::{Agent, AgentConfig};
use crate::agentboard::blackboard::Blackboard;
use crate::agentboard::callbacks::{CallbackHandler, SkipReason};
use crate::agentboard::clients::openai::OpenAiClient;
use crate::agentboard::conditions::ConditionEvaluator;
use crate::agentboard::llm::LlmClient;
use crate::agentboard::models::{AgentContext, AgentResponse, Insight, InsightType, TriggerType};
use futures_util::future::join_all;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Cooldown floor in seconds when a per-turn override is in play.
const MIN_EFFECTIVE_COOLDOWN: i64 = 5;

/// Default bound on phases per turn: phase 1 plus one event-dispatch phase.
const DEFAULT_MAX_PHASES: u32 = 2;

/// An agent plus the runtime bookkeeping the engine keeps for it.
struct RegisteredAgent {
    agent: Box<dyn Agent>,
    /// 0-based registration order; the stable tie-breaker within equal
    /// priority during merge.
    index: usize,
    /// Wall-clock seconds of the last successful run.
    last_run: Mutex<f64>,
}

impl RegisteredAgent {
    fn config(&self) -> &AgentConfig {
        self.agent.config()
    }
}

/// Outcome of one agent's lifecycle within a phase.
enum AgentOutcome {
    /// Checks failed before evaluation; nothing happened.
    Skipped,
    /// The agent ran and chose to stay silent.
    Silent,
    /// The agent ran and produced a response to merge.
    Responded(AgentResponse),
    /// The agent failed; the whole response is discarded.
    Failed(String),
}

/// The turn-driven scheduler over a set of registered agents.
///
/// The engine owns the only writer of the live blackboard (its merge step);
/// agents read from snapshots and write into their returned responses. Hosts
/// are responsible for serializing turns per session — the engine processes
/// one turn at a time per call.
pub struct AgentEngine {
    agents: Vec<RegisteredAgent>,
    llm: Arc<dyn LlmClient>,
    callbacks: Vec<Arc<dyn CallbackHandler>>,
    evaluator: ConditionEvaluator,
    max_phases: u32,
}

impl AgentEngine {
    /// Create an engine with the bundled OpenAI-compatible client.
    ///
    /// `api_key = None` falls back to the `OPENAI_API_KEY` environment
    /// variable; with neither present, agents that call the model simply get
    /// `None` back (and log the reason).
    pub fn new(api_key: Option<&str>) -> Self {
        Self::with_llm_client(Arc::new(OpenAiClient::new(api_key)))
    }

    /// Create an engine around a custom model client.
    pub fn with_llm_client(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            agents: Vec::new(),
            llm,
            callbacks: Vec::new(),
            evaluator: ConditionEvaluator,
            max_phases: DEFAULT_MAX_PHASES,
        }
    }

    /// Attach an observer (builder pattern). Several may be attached; they
    /// are invoked in attachment order.
    pub fn with_callback(mut self, callback: Arc<dyn CallbackHandler>) -> Self {
        self.callbacks.push(callback);
        self
    }

    /// Override the phase bound (builder pattern). The default of 2 means
    /// events dispatch exactly one follow-up phase.
    pub fn with_max_phases(mut self, max_phases: u32) -> Self {
        self.max_phases = max_phases.max(1);
        self
    }

    /// Register an agent, recording its registration index and injecting the
    /// engine's model client.
    pub fn register_agent(&mut self, mut agent: Box<dyn Agent>) {
        agent.bind_llm(Arc::clone(&self.llm));
        let cfg = agent.config();
        log::info!(
            "Registered agent: {} (id: {}, model: {}, triggers: {:?}, priority: {})",
            cfg.name,
            cfg.id,
            cfg.model,
            cfg.trigger_types,
            cfg.priority
        );
        self.agents.push(RegisteredAgent {
            index: self.agents.len(),
            last_run: Mutex::new(0.0),
            agent,
        });
    }

    /// Replace the model client and re-inject it into every registered agent.
    pub fn update_api_key(&mut self, api_key: Option<&str>) {
        self.llm = Arc::new(OpenAiClient::new(api_key));
        for registered in &mut self.agents {
            registered.agent.bind_llm(Arc::clone(&self.llm));
        }
        log::info!("Updated API key for all agents");
    }

    /// All registered agents, in registration order.
    pub fn agents(&self) -> Vec<&dyn Agent> {
        self.agents.iter().map(|r| r.agent.as_ref()).collect()
    }

    /// Agents that respond to the given trigger type.
    pub fn get_agents_by_trigger_type(&self, trigger_type: TriggerType) -> Vec<&dyn Agent> {
        self.agents
            .iter()
            .filter(|r| r.config().trigger_types.contains(&trigger_type))
            .map(|r| r.agent.as_ref())
            .collect()
    }

    /// Agents that declare keyword triggers.
    pub fn get_agents_with_keywords(&self) -> Vec<&dyn Agent> {
        self.agents
            .iter()
            .filter(|r| !r.config().trigger_keywords.is_empty())
            .map(|r| r.agent.as_ref())
            .collect()
    }

    /// Agents that declare a silence threshold.
    pub fn get_agents_with_silence_threshold(&self) -> Vec<&dyn Agent> {
        self.agents
            .iter()
            .filter(|r| r.config().silence_threshold.is_some())
            .map(|r| r.agent.as_ref())
            .collect()
    }

    /// Agents subscribed to at least one of the given event names.
    pub fn get_event_subscribers(&self, event_names: &[String]) -> Vec<&dyn Agent> {
        self.agents
            .iter()
            .filter(|r| {
                r.config()
                    .subscribed_events
                    .iter()
                    .any(|name| event_names.contains(name))
            })
            .map(|r| r.agent.as_ref())
            .collect()
    }

    /// Which agents should fire on a keyword in `text`.
    ///
    /// Case-insensitive substring match, at most one match per agent, and the
    /// allow-list applies (`None` = all agents, empty list = none).
    pub fn check_keyword_triggers(
        &self,
        text: &str,
        allowed_ids: Option<&[String]>,
    ) -> Vec<(&AgentConfig, String)> {
        let text_lower = text.to_lowercase();
        let mut matches = Vec::new();

        for registered in &self.agents {
            let cfg = registered.config();
            if let Some(allowed) = allowed_ids {
                if !allowed.contains(&cfg.id) {
                    continue;
                }
            }
            for keyword in &cfg.trigger_keywords {
                if text_lower.contains(&keyword.to_lowercase()) {
                    log::info!("Agent '{}' triggered by keyword '{}'", cfg.name, keyword);
                    matches.push((cfg, keyword.clone()));
                    break;
                }
            }
        }
        matches
    }

    /// Process one turn against the session context.
    ///
    /// - `allowed_ids`: `None` runs all agents, an empty slice runs none, and
    ///   a non-empty slice restricts selection to those ids. Not even a
    ///   `Force` trigger bypasses this list.
    /// - `trigger_type`: what caused the turn.
    /// - `trigger_metadata`: trigger detail (matched keyword, silence
    ///   duration, …) made available to agents and conditions.
    ///
    /// Never errors: severe problems surface as `error`-typed insights inside
    /// the returned aggregate response.
    pub async fn process_turn(
        &self,
        context: &mut AgentContext,
        allowed_ids: Option<&[String]>,
        trigger_type: TriggerType,
        trigger_metadata: Option<HashMap<String, Value>>,
    ) -> AgentResponse {
        let turn_started = Instant::now();

        // Stamp trigger info and the engine-owned sys.* variables, then sync
        // the legacy flat view.
        context.trigger_type = trigger_type;
        context.trigger_metadata = trigger_metadata.unwrap_or_default();
        context
            .blackboard
            .set_var("sys.turn_count", Value::from(context.turn_count));
        context
            .blackboard
            .set_var("sys.session_id", Value::from(context.session_id.clone()));
        context
            .blackboard
            .set_var("sys.trigger_type", Value::from(trigger_type.to_string()));
        context.shared_state = context.blackboard.variables.clone();

        for cb in &self.callbacks {
            cb.on_turn_start(context).await;
        }

        let mut aggregate = AgentResponse::default();

        // Phase 1: selection, snapshot fan-out, ordered merge.
        let meta = self.build_meta(context, 1, trigger_type);
        let selected = self
            .select_turn_agents(allowed_ids, trigger_type, &context.blackboard, &meta)
            .await;

        if selected.is_empty() {
            log::debug!("No agents eligible for trigger '{}'", trigger_type);
        }

        let mut pending_events = self
            .run_phase(&selected, context, 1, trigger_type, &mut aggregate)
            .await;

        // Event-dispatch phases, bounded by max_phases. Events from the final
        // phase are recorded in the aggregate but not dispatched.
        let mut phase = 1;
        while !pending_events.is_empty() && phase < self.max_phases {
            phase += 1;
            let event_names: HashSet<String> = pending_events.drain(..).collect();
            let meta = self.build_meta(context, phase, TriggerType::Event);
            let subscribers = self
                .select_event_agents(allowed_ids, &event_names, &context.blackboard, &meta)
                .await;

            if subscribers.is_empty() {
                break;
            }
            log::info!(
                "Dispatching phase {} to {} subscriber(s) of {:?}",
                phase,
                subscribers.len(),
                event_names
            );
            pending_events = self
                .run_phase(&subscribers, context, phase, trigger_type, &mut aggregate)
                .await;
        }

        // Finalize: events never survive a turn, and v1 consumers read
        // variable writes from state_updates.
        context.blackboard.clear_events();
        aggregate.state_updates = aggregate.variable_updates.clone();

        let duration = turn_started.elapsed();
        for cb in &self.callbacks {
            cb.on_turn_end(&aggregate, duration).await;
        }

        aggregate
    }

    /// Execution metadata handed to the condition evaluator.
    fn build_meta(
        &self,
        context: &AgentContext,
        phase: u32,
        trigger_type: TriggerType,
    ) -> HashMap<String, Value> {
        let mut meta = HashMap::new();
        meta.insert("turn_count".to_string(), Value::from(context.turn_count));
        meta.insert("phase".to_string(), Value::from(phase));
        meta.insert(
            "trigger_type".to_string(),
            Value::from(trigger_type.to_string()),
        );
        meta.insert(
            "session_id".to_string(),
            Value::from(context.session_id.clone()),
        );
        meta
    }

    /// Phase-1 selection: allow-list, trigger type, trigger conditions.
    /// `Force` bypasses the type and condition checks but not the allow-list.
    async fn select_turn_agents(
        &self,
        allowed_ids: Option<&[String]>,
        trigger_type: TriggerType,
        blackboard: &Blackboard,
        meta: &HashMap<String, Value>,
    ) -> Vec<&RegisteredAgent> {
        let mut selected = Vec::new();

        for registered in &self.agents {
            let cfg = registered.config();

            if let Some(allowed) = allowed_ids {
                if !allowed.contains(&cfg.id) {
                    self.emit_skipped(&cfg.name, SkipReason::NotInAllowList).await;
                    continue;
                }
            }

            if trigger_type != TriggerType::Force {
                if !cfg.trigger_types.contains(&trigger_type) {
                    self.emit_skipped(&cfg.name, SkipReason::TriggerTypeMismatch)
                        .await;
                    continue;
                }
                if !self.evaluator.evaluate(
                    cfg.trigger_conditions.as_ref(),
                    blackboard,
                    meta,
                    &cfg.id,
                ) {
                    self.emit_skipped(&cfg.name, SkipReason::ConditionsNotMet).await;
                    continue;
                }
            }

            selected.push(registered);
        }

        selected
    }

    /// Event-phase selection: subscription to at least one emitted event,
    /// allow-list, and trigger conditions against the post-merge blackboard.
    /// The agent's declared trigger types are deliberately not consulted —
    /// subscription implies eligibility to the event class.
    async fn select_event_agents(
        &self,
        allowed_ids: Option<&[String]>,
        event_names: &HashSet<String>,
        blackboard: &Blackboard,
        meta: &HashMap<String, Value>,
    ) -> Vec<&RegisteredAgent> {
        let mut selected = Vec::new();

        for registered in &self.agents {
            let cfg = registered.config();

            if !cfg
                .subscribed_events
                .iter()
                .any(|name| event_names.contains(name))
            {
                continue;
            }

            if let Some(allowed) = allowed_ids {
                if !allowed.contains(&cfg.id) {
                    self.emit_skipped(&cfg.name, SkipReason::NotInAllowList).await;
                    continue;
                }
            }

            if !self.evaluator.evaluate(
                cfg.trigger_conditions.as_ref(),
                blackboard,
                meta,
                &cfg.id,
            ) {
                self.emit_skipped(&cfg.name, SkipReason::ConditionsNotMet).await;
                continue;
            }

            selected.push(registered);
        }

        selected
    }

    /// Run one phase: snapshot, parallel fan-out, barrier, ordered merge.
    ///
    /// Returns the names of the events the phase emitted (in merge order),
    /// which drive the next phase's selection.
    async fn run_phase(
        &self,
        selected: &[&RegisteredAgent],
        context: &mut AgentContext,
        phase: u32,
        turn_trigger: TriggerType,
        aggregate: &mut AgentResponse,
    ) -> Vec<String> {
        if selected.is_empty() {
            return Vec::new();
        }

        // Every agent in the phase observes the same immutable snapshot.
        let mut phase_context = context.clone();
        phase_context.blackboard = context.blackboard.snapshot();
        phase_context.phase = phase;
        if phase > 1 {
            phase_context.trigger_type = TriggerType::Event;
        }
        phase_context.shared_state = phase_context.blackboard.variables.clone();

        let agent_names: Vec<String> = selected.iter().map(|r| r.config().name.clone()).collect();
        for cb in &self.callbacks {
            cb.on_phase_start(phase, &agent_names).await;
        }

        let outcomes = join_all(
            selected
                .iter()
                .map(|registered| self.run_agent(registered, &phase_context, turn_trigger, phase)),
        )
        .await;

        // Collect successes with their merge keys; surface failures as
        // system insights without merging anything of theirs.
        let mut successes: Vec<(i32, usize, String, AgentResponse)> = Vec::new();
        for (registered, outcome) in selected.iter().zip(outcomes) {
            let cfg = registered.config();
            match outcome {
                AgentOutcome::Responded(response) => {
                    successes.push((cfg.priority, registered.index, cfg.id.clone(), response));
                }
                AgentOutcome::Failed(error) => {
                    aggregate.insights.push(
                        Insight::new(
                            "system",
                            "System",
                            InsightType::Error,
                            format!("Agent '{}' error: {}", cfg.name, error),
                        )
                        .with_confidence(1.0),
                    );
                }
                AgentOutcome::Silent | AgentOutcome::Skipped => {}
            }
        }

        // Ascending priority, then registration order: the highest-priority
        // agent writes last and wins under last-write-wins.
        successes.sort_by_key(|(priority, index, _, _)| (*priority, *index));

        let mut emitted = Vec::new();
        for (_, _, agent_id, response) in successes {
            self.merge_response(&agent_id, response, &mut context.blackboard, aggregate, &mut emitted);
        }

        for cb in &self.callbacks {
            cb.on_phase_end(phase, &emitted).await;
        }

        emitted
    }

    /// The per-agent lifecycle around `evaluate`.
    ///
    /// Cooldown lives here rather than in selection so observers still see
    /// the skip of an agent that was otherwise eligible.
    async fn run_agent(
        &self,
        registered: &RegisteredAgent,
        context: &AgentContext,
        turn_trigger: TriggerType,
        phase: u32,
    ) -> AgentOutcome {
        let cfg = registered.config();

        // Selection already filtered phase-1 trigger types; this recheck only
        // guards direct callers. Event phases dispatch on subscription.
        if phase == 1
            && turn_trigger != TriggerType::Force
            && !cfg.trigger_types.contains(&turn_trigger)
        {
            return AgentOutcome::Skipped;
        }

        let now = now_seconds();
        if turn_trigger != TriggerType::Force {
            let effective = self.effective_cooldown(cfg, context);
            let last = *registered.last_run.lock().expect("cooldown clock poisoned");
            if now - last < effective {
                log::debug!(
                    "Agent '{}' in cooldown ({:.1}s of {:.1}s elapsed)",
                    cfg.name,
                    now - last,
                    effective
                );
                self.emit_skipped(&cfg.name, SkipReason::CooldownActive).await;
                return AgentOutcome::Skipped;
            }
        }

        for cb in &self.callbacks {
            cb.on_agent_start(&cfg.name, context).await;
        }

        let started = Instant::now();
        match registered.agent.evaluate(context).await {
            Ok(response) => {
                *registered.last_run.lock().expect("cooldown clock poisoned") = now;
                let duration = started.elapsed();
                for cb in &self.callbacks {
                    cb.on_agent_finish(&cfg.name, response.as_ref(), duration).await;
                }
                match response {
                    Some(response) => AgentOutcome::Responded(response),
                    None => AgentOutcome::Silent,
                }
            }
            Err(error) => {
                let error = error.to_string();
                log::error!("Agent {} failed: {}", cfg.name, error);
                for cb in &self.callbacks {
                    cb.on_agent_error(&cfg.name, &error).await;
                }
                AgentOutcome::Failed(error)
            }
        }
    }

    /// Effective cooldown in seconds, honoring a per-turn override.
    ///
    /// With an override present the result is floored at 5 seconds no matter
    /// how negative the modifier is; without one, the configured cooldown
    /// applies untouched.
    fn effective_cooldown(&self, cfg: &AgentConfig, context: &AgentContext) -> f64 {
        match context
            .agent_config_overrides
            .get(&cfg.id)
            .and_then(|o| o.cooldown_modifier)
        {
            Some(modifier) => (cfg.cooldown as i64 + modifier).max(MIN_EFFECTIVE_COOLDOWN) as f64,
            None => cfg.cooldown as f64,
        }
    }

    /// Apply one successful response to the live blackboard and the turn
    /// aggregate. Called in merge order; later calls overwrite earlier ones
    /// for conflicting variable keys and fact slots.
    fn merge_response(
        &self,
        agent_id: &str,
        response: AgentResponse,
        blackboard: &mut Blackboard,
        aggregate: &mut AgentResponse,
        emitted: &mut Vec<String>,
    ) {
        aggregate.insights.extend(response.insights);

        // v1 compatibility: a legacy response carries state_updates instead
        // of variable_updates. Entries become variable writes, except
        // memory_<agent_id> maps which route to that agent's namespace.
        if response.variable_updates.is_empty() && !response.state_updates.is_empty() {
            for (key, value) in response.state_updates {
                if let Some(owner) = key.strip_prefix("memory_") {
                    if let Value::Object(map) = &value {
                        let updates: HashMap<String, Value> =
                            map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                        blackboard.update_memory(owner, updates);
                        continue;
                    }
                }
                blackboard.set_var(key.clone(), value.clone());
                aggregate.variable_updates.insert(key, value);
            }
        }

        for (key, value) in response.variable_updates {
            blackboard.set_var(key.clone(), value.clone());
            aggregate.variable_updates.insert(key, value);
        }

        for (queue, items) in response.queue_pushes {
            blackboard.push_queue_items(queue.clone(), items.clone());
            aggregate.queue_pushes.entry(queue).or_default().extend(items);
        }

        for fact in response.facts {
            blackboard.add_fact(fact.clone());
            aggregate.facts.push(fact);
        }

        if !response.memory_updates.is_empty() {
            blackboard.update_memory(agent_id, response.memory_updates.clone());
            aggregate.memory_updates.extend(response.memory_updates);
        }

        for event in response.events {
            emitted.push(event.name.clone());
            blackboard.emit_event(event.clone());
            aggregate.events.push(event);
        }

        // Data sidecar: disjoint keys copy over, list-valued conflicts
        // concatenate, anything else is last-writer-wins.
        for (key, value) in response.data {
            match (aggregate.data.remove(&key), value) {
                (Some(Value::Array(mut existing)), Value::Array(new_items)) => {
                    existing.extend(new_items);
                    aggregate.data.insert(key, Value::Array(existing));
                }
                (_, value) => {
                    aggregate.data.insert(key, value);
                }
            }
        }
    }

    async fn emit_skipped(&self, agent_name: &str, reason: SkipReason) {
        log::debug!("Agent '{}' skipped: {}", agent_name, reason);
        for cb in &self.callbacks {
            cb.on_agent_skipped(agent_name, reason).await;
        }
    }
}

/// Wall-clock seconds, used for cooldown arithmetic.
fn now_seconds() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}
