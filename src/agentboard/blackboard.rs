//! Blackboard — structured shared state for a session.
//!
//! The blackboard provides typed containers for agent coordination:
//!
//! - **Events**: transient signals that trigger subscribed agents
//! - **Variables**: session-scoped key-value storage
//! - **Queues**: ordered FIFO lists of work items
//! - **Facts**: extracted knowledge with deduplication
//! - **Memory**: per-agent private state
//!
//! The blackboard is in-memory for the lifetime of a session; persistence is
//! the host's responsibility via [`Blackboard::to_json`] /
//! [`Blackboard::from_json`].
//!
//! # Snapshot discipline
//!
//! During a phase, every agent evaluates against the same immutable
//! [`snapshot`](Blackboard::snapshot). Updates are collected in each agent's
//! [`AgentResponse`](crate::agentboard::models::AgentResponse) and merged
//! into the live blackboard only after all agents in the phase complete, so
//! the live board has exactly one writer: the engine's merge step.
//!
//! # Example
//!
//! ```rust
//! use agentboard::Blackboard;
//! use agentboard::models::Fact;
//! use serde_json::json;
//!
//! let mut bb = Blackboard::default();
//! bb.set_var("phase", json!("discovery"));
//! bb.push_queue("pending_questions", json!({"text": "What is pricing?"}));
//! bb.add_fact(Fact::new("budget", json!(50_000), 0.8, "extractor", 1.0));
//!
//! // A later, more confident extraction replaces the earlier fact.
//! bb.add_fact(Fact::new("budget", json!(75_000), 0.9, "extractor", 2.0));
//! assert_eq!(bb.facts.len(), 1);
//! assert_eq!(bb.facts[0].value, json!(75_000));
//! ```

use crate::agentboard::models::{Event, Fact};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Structured shared state for the agent system.
///
/// In-memory only; the host may persist a session through
/// [`to_json`](Blackboard::to_json) / [`from_json`](Blackboard::from_json).
/// Variable keys starting with `sys.` are reserved for the engine, which
/// stamps `sys.turn_count`, `sys.session_id`, and `sys.trigger_type` before
/// any agent runs. The convention is advisory: merges do not reject `sys.*`
/// writes, but the engine re-stamps them every turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Blackboard {
    /// Transient signals, cleared at the end of every turn.
    #[serde(default)]
    pub events: Vec<Event>,
    /// Session-scoped key-value storage.
    #[serde(default)]
    pub variables: HashMap<String, Value>,
    /// Ordered FIFO lists keyed by queue name.
    #[serde(default)]
    pub queues: HashMap<String, Vec<Value>>,
    /// Extracted knowledge, subject to the deduplication rule.
    #[serde(default)]
    pub facts: Vec<Fact>,
    /// Per-agent private state, keyed by agent id.
    #[serde(default)]
    pub memory: HashMap<String, HashMap<String, Value>>,
}

impl Blackboard {
    // ---- Event operations ----

    /// Emit a structured event for later-phase subscribers.
    ///
    /// Events are NOT deduplicated: multiple events with the same name may
    /// coexist within a turn. Hosts that need dedup can use [`Event::id`].
    pub fn emit_event(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Clear all events. Called by the engine after `process_turn` completes.
    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    /// True if any event with this name is pending.
    pub fn has_event(&self, name: &str) -> bool {
        self.events.iter().any(|e| e.name == name)
    }

    /// All pending events with the given name (may be several).
    pub fn events_named(&self, name: &str) -> Vec<&Event> {
        self.events.iter().filter(|e| e.name == name).collect()
    }

    /// Count pending events with the given name.
    pub fn count_events(&self, name: &str) -> usize {
        self.events.iter().filter(|e| e.name == name).count()
    }

    // ---- Variable operations ----

    /// Set a session variable.
    pub fn set_var(&mut self, key: impl Into<String>, value: Value) {
        self.variables.insert(key.into(), value);
    }

    /// Get a session variable.
    pub fn get_var(&self, key: &str) -> Option<&Value> {
        self.variables.get(key)
    }

    /// Delete a session variable. No-op if absent.
    pub fn delete_var(&mut self, key: &str) {
        self.variables.remove(key);
    }

    /// True if the variable exists, regardless of value.
    pub fn has_var(&self, key: &str) -> bool {
        self.variables.contains_key(key)
    }

    // ---- Queue operations ----

    /// Append an item to a queue, creating the queue if needed.
    pub fn push_queue(&mut self, queue: impl Into<String>, item: Value) {
        self.queues.entry(queue.into()).or_default().push(item);
    }

    /// Append multiple items to a queue, preserving their order.
    pub fn push_queue_items(&mut self, queue: impl Into<String>, items: Vec<Value>) {
        self.queues.entry(queue.into()).or_default().extend(items);
    }

    /// Remove and return the first item of a queue (FIFO).
    pub fn pop_queue(&mut self, queue: &str) -> Option<Value> {
        let items = self.queues.get_mut(queue)?;
        if items.is_empty() {
            None
        } else {
            Some(items.remove(0))
        }
    }

    /// Look at the first item of a queue without removing it.
    pub fn peek_queue(&self, queue: &str) -> Option<&Value> {
        self.queues.get(queue).and_then(|items| items.first())
    }

    /// Number of items in a queue; zero for a missing queue.
    pub fn queue_len(&self, queue: &str) -> usize {
        self.queues.get(queue).map(Vec::len).unwrap_or(0)
    }

    /// Empty a queue. The queue itself remains registered.
    pub fn clear_queue(&mut self, queue: &str) {
        if let Some(items) = self.queues.get_mut(queue) {
            items.clear();
        }
    }

    /// True if the queue has ever been created.
    pub fn has_queue(&self, queue: &str) -> bool {
        self.queues.contains_key(queue)
    }

    // ---- Fact operations ----

    /// Add a fact with deduplication.
    ///
    /// - `key = None`: the candidate is any existing fact of the same type.
    /// - `key = Some(..)`: the candidate is the exact `(type, key)` match.
    ///
    /// When a candidate exists, the new fact replaces it iff its confidence
    /// is greater than or equal to the candidate's — later higher-confidence
    /// facts win, and equal-confidence ties go to the newer arrival.
    /// Otherwise the add is a no-op.
    pub fn add_fact(&mut self, fact: Fact) {
        let existing = self.facts.iter().position(|f| {
            f.fact_type == fact.fact_type
                && match &fact.key {
                    None => true,
                    Some(key) => f.key.as_deref() == Some(key.as_str()),
                }
        });

        match existing {
            Some(idx) => {
                if fact.confidence >= self.facts[idx].confidence {
                    self.facts.remove(idx);
                    self.facts.push(fact);
                }
            }
            None => self.facts.push(fact),
        }
    }

    /// Get a fact by type and optional key. With `key = None` the first fact
    /// of the type is returned regardless of its key.
    pub fn get_fact(&self, fact_type: &str, key: Option<&str>) -> Option<&Fact> {
        match key {
            Some(key) => self
                .facts
                .iter()
                .find(|f| f.fact_type == fact_type && f.key.as_deref() == Some(key)),
            None => self.facts.iter().find(|f| f.fact_type == fact_type),
        }
    }

    /// All facts of a type (they may carry different keys).
    pub fn facts_of_type(&self, fact_type: &str) -> Vec<&Fact> {
        self.facts.iter().filter(|f| f.fact_type == fact_type).collect()
    }

    /// True if a fact matching the type (and key, when given) exists.
    pub fn has_fact(&self, fact_type: &str, key: Option<&str>) -> bool {
        self.get_fact(fact_type, key).is_some()
    }

    // ---- Memory operations (agent-private state) ----

    /// An agent's private memory, if any has been stored.
    pub fn memory_of(&self, agent_id: &str) -> Option<&HashMap<String, Value>> {
        self.memory.get(agent_id)
    }

    /// Replace an agent's private memory wholesale.
    pub fn set_memory(&mut self, agent_id: impl Into<String>, data: HashMap<String, Value>) {
        self.memory.insert(agent_id.into(), data);
    }

    /// Merge updates into an agent's private memory, creating the namespace
    /// if needed.
    pub fn update_memory(&mut self, agent_id: impl Into<String>, updates: HashMap<String, Value>) {
        self.memory.entry(agent_id.into()).or_default().extend(updates);
    }

    /// True if the agent has any non-empty memory stored.
    pub fn has_memory(&self, agent_id: &str) -> bool {
        self.memory.get(agent_id).map(|m| !m.is_empty()).unwrap_or(false)
    }

    // ---- Snapshot ----

    /// Deep copy for phase isolation.
    ///
    /// The copy is fully independent: mutating the original does not affect
    /// the snapshot and vice versa. All containers own their data, so the
    /// derived `Clone` already is a deep copy; this method exists to name the
    /// intent at call sites.
    pub fn snapshot(&self) -> Blackboard {
        self.clone()
    }

    // ---- Serialization ----

    /// Lossless conversion to a plain JSON tree, for host-side persistence.
    pub fn to_json(&self) -> Value {
        // All fields are serde-representable; failure is unreachable.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Rebuild a blackboard from [`to_json`](Blackboard::to_json) output.
    pub fn from_json(value: Value) -> Result<Blackboard, serde_json::Error> {
        serde_json::from_value(value)
    }
}
