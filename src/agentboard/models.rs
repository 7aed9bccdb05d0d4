//! Core data model shared by the engine, the blackboard, and agents.
//!
//! Everything here is plain serde data: hosts ship [`TranscriptSegment`]s in,
//! agents hand [`AgentResponse`]s back, and the engine aggregates them into a
//! single response per turn. All payload values are [`serde_json::Value`] so
//! the model round-trips losslessly through JSON.

use crate::agentboard::blackboard::Blackboard;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// The kind of event that triggered an agent run.
///
/// `Force` is ceremonial: the host uses it to run an agent regardless of its
/// declared trigger types, cooldown, or trigger conditions. It does **not**
/// bypass the allow-list passed to
/// [`AgentEngine::process_turn`](crate::agentboard::engine::AgentEngine::process_turn).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    /// Normal: a conversation turn completed.
    TurnBased,
    /// Immediate: a configured keyword was detected by the host.
    Keyword,
    /// Dead air: the host detected a long silence.
    Silence,
    /// Time-based: periodic check driven by the host.
    Interval,
    /// A blackboard event matched a subscription (phase 2 dispatch).
    Event,
    /// Host override: run regardless of type, cooldown, and conditions.
    Force,
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TriggerType::TurnBased => "turn_based",
            TriggerType::Keyword => "keyword",
            TriggerType::Silence => "silence",
            TriggerType::Interval => "interval",
            TriggerType::Event => "event",
            TriggerType::Force => "force",
        };
        write!(f, "{}", s)
    }
}

/// Classification of an [`Insight`] for host-side rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightType {
    Suggestion,
    Warning,
    /// Urgent positive: something the user should act on right now.
    Opportunity,
    Fact,
    Praise,
    /// System alerts, including agent failures surfaced by the engine.
    Error,
}

impl fmt::Display for InsightType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InsightType::Suggestion => "suggestion",
            InsightType::Warning => "warning",
            InsightType::Opportunity => "opportunity",
            InsightType::Fact => "fact",
            InsightType::Praise => "praise",
            InsightType::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// A single piece of speech from the conversation. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Who spoke: `"USER"`, `"SPEAKER"`, etc.
    pub speaker: String,
    /// The text content.
    pub text: String,
    /// When it happened, in seconds.
    pub timestamp: f64,
    /// Whether the segment is final or a streaming partial.
    #[serde(default = "default_true")]
    pub is_final: bool,
}

impl TranscriptSegment {
    pub fn new(speaker: impl Into<String>, text: impl Into<String>, timestamp: f64) -> Self {
        Self {
            speaker: speaker.into(),
            text: text.into(),
            timestamp,
            is_final: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// A transient broadcast signal used for inter-agent coordination within a
/// turn.
///
/// Events are **not** deduplicated: several events with the same name may
/// coexist in one turn (e.g. multiple questions detected in a single
/// utterance). They are cleared before `process_turn` returns and never
/// survive across turns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event name; phase-2 dispatch matches subscriptions against this.
    pub name: String,
    /// Arbitrary payload for subscribers.
    #[serde(default)]
    pub payload: HashMap<String, Value>,
    /// Id of the agent that emitted the event.
    pub source_agent: String,
    /// Emission time, in seconds.
    pub timestamp: f64,
    /// Optional stable id, for hosts that want to correlate or dedupe
    /// themselves.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Event {
    pub fn new(name: impl Into<String>, source_agent: impl Into<String>, timestamp: f64) -> Self {
        Self {
            name: name.into(),
            payload: HashMap::new(),
            source_agent: source_agent.into(),
            timestamp,
            id: None,
        }
    }

    /// Attach a payload entry (builder pattern).
    pub fn with_payload(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }
}

/// An extracted datum with a confidence score.
///
/// Facts deduplicate inside the blackboard: a fact with `key = None` replaces
/// any existing fact of the same type, while a keyed fact replaces only the
/// exact `(type, key)` pair — and only when its confidence is greater than or
/// equal to the incumbent's. Equal confidence goes to the newer arrival.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    /// Category, e.g. `"budget"`, `"stakeholder"`.
    #[serde(rename = "type")]
    pub fact_type: String,
    /// Optional instance discriminator within the type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// The extracted value.
    pub value: Value,
    /// Extraction confidence in `[0, 1]`.
    pub confidence: f64,
    /// Id of the agent that produced the fact.
    pub source_agent: String,
    /// Extraction time, in seconds.
    pub timestamp: f64,
}

impl Fact {
    pub fn new(
        fact_type: impl Into<String>,
        value: impl Into<Value>,
        confidence: f64,
        source_agent: impl Into<String>,
        timestamp: f64,
    ) -> Self {
        Self {
            fact_type: fact_type.into(),
            key: None,
            value: value.into(),
            confidence,
            source_agent: source_agent.into(),
            timestamp,
        }
    }

    /// Set the instance discriminator (builder pattern).
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

/// A single piece of user-visible advice produced by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    /// Stable id of the producing agent (or `"system"` for engine alerts).
    pub agent_id: String,
    /// Display name of the producing agent.
    pub agent_name: String,
    /// Classification for rendering.
    #[serde(rename = "type")]
    pub insight_type: InsightType,
    /// The advice text. Non-empty.
    pub content: String,
    /// Confidence in `[0, 1]`.
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    /// Seconds the host should display the insight.
    #[serde(default = "default_expiry")]
    pub expiry: u64,
    /// Optional button label for an actionable insight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_label: Option<String>,
    /// Extension point for UI-specific rendering options (zone, color, voice
    /// style, …). The engine never interprets this.
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

fn default_confidence() -> f64 {
    1.0
}

fn default_expiry() -> u64 {
    15
}

impl Insight {
    pub fn new(
        agent_id: impl Into<String>,
        agent_name: impl Into<String>,
        insight_type: InsightType,
        content: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_name: agent_name.into(),
            insight_type,
            content: content.into(),
            confidence: 1.0,
            expiry: 15,
            action_label: None,
            metadata: HashMap::new(),
        }
    }

    /// Set the confidence score (builder pattern).
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }
}

/// What an agent returns from one evaluation, and what
/// [`AgentEngine::process_turn`](crate::agentboard::engine::AgentEngine::process_turn)
/// returns as the aggregate of a whole turn.
///
/// All containers default to empty; an agent only fills what it produced.
/// `state_updates` is the legacy v1 field — when a response carries
/// `state_updates` but no `variable_updates`, the engine treats the entries
/// as variable writes (with the `memory_<agent_id>` routing exception).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    /// User-visible insights, in production order.
    #[serde(default)]
    pub insights: Vec<Insight>,
    /// Writes into `blackboard.variables` (last merge-order writer wins).
    #[serde(default)]
    pub variable_updates: HashMap<String, Value>,
    /// Items to append to named queues, preserving intra-agent order.
    #[serde(default)]
    pub queue_pushes: HashMap<String, Vec<Value>>,
    /// Facts to add through the deduplication rule.
    #[serde(default)]
    pub facts: Vec<Fact>,
    /// Merged into the emitting agent's private memory namespace.
    #[serde(default)]
    pub memory_updates: HashMap<String, Value>,
    /// Events published for later-phase subscribers.
    #[serde(default)]
    pub events: Vec<Event>,
    /// Free-form sidecar for arbitrary payloads (e.g. `ui_actions`).
    #[serde(default)]
    pub data: HashMap<String, Value>,
    /// Legacy v1 variable writes, superseded by `variable_updates`.
    #[serde(default)]
    pub state_updates: HashMap<String, Value>,
}

impl AgentResponse {
    /// True when the response carries nothing at all.
    pub fn is_empty(&self) -> bool {
        self.insights.is_empty()
            && self.variable_updates.is_empty()
            && self.queue_pushes.is_empty()
            && self.facts.is_empty()
            && self.memory_updates.is_empty()
            && self.events.is_empty()
            && self.data.is_empty()
            && self.state_updates.is_empty()
    }
}

/// Per-turn configuration override for a single agent, keyed by agent id in
/// [`AgentContext::agent_config_overrides`].
///
/// When an override is present, the effective cooldown becomes
/// `max(5, cooldown + cooldown_modifier)` seconds — the floor holds no matter
/// how negative the modifier is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigOverride {
    /// Seconds added to (or subtracted from) the agent's configured cooldown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_modifier: Option<i64>,
    /// Model to use for this turn instead of the configured one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// The full context an agent needs to think.
///
/// The host owns one context per session and passes it mutably to
/// [`AgentEngine::process_turn`](crate::agentboard::engine::AgentEngine::process_turn);
/// the engine stamps trigger info and `sys.*` variables into it, and the
/// copies handed to agents carry an immutable snapshot of the blackboard in
/// place of the live one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentContext {
    /// Stable session identifier.
    pub session_id: String,
    /// The sliding window of recent conversation.
    #[serde(default)]
    pub recent_segments: Vec<TranscriptSegment>,
    /// Structured shared state. Live in the host's context, a snapshot in the
    /// copies agents receive.
    #[serde(default)]
    pub blackboard: Blackboard,
    /// Legacy flat view of `blackboard.variables`, synced at turn start for
    /// v1-era agents.
    #[serde(default)]
    pub shared_state: HashMap<String, Value>,
    /// Retrieved docs from RAG (text chunks).
    #[serde(default)]
    pub rag_docs: Vec<String>,
    /// What triggered this run. Stamped by the engine.
    #[serde(default = "default_trigger_type")]
    pub trigger_type: TriggerType,
    /// Trigger detail (matched keyword, silence duration, …). Stamped by the
    /// engine.
    #[serde(default)]
    pub trigger_metadata: HashMap<String, Value>,
    /// Optional language directive for translation/enforcement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_directive: Option<String>,
    /// Optional user profile / cognitive frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_context: Option<String>,
    /// Monotonic turn counter maintained by the host.
    #[serde(default)]
    pub turn_count: u64,
    /// Phase number within the current turn (1-based). Stamped by the engine.
    #[serde(default = "default_phase")]
    pub phase: u32,
    /// Per-turn config overrides keyed by agent id.
    #[serde(default)]
    pub agent_config_overrides: HashMap<String, ConfigOverride>,
}

fn default_trigger_type() -> TriggerType {
    TriggerType::TurnBased
}

fn default_phase() -> u32 {
    1
}

impl AgentContext {
    /// Create a context with an empty blackboard and defaults for everything
    /// but the session id.
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            recent_segments: Vec::new(),
            blackboard: Blackboard::default(),
            shared_state: HashMap::new(),
            rag_docs: Vec::new(),
            trigger_type: TriggerType::TurnBased,
            trigger_metadata: HashMap::new(),
            language_directive: None,
            user_context: None,
            turn_count: 0,
            phase: 1,
            agent_config_overrides: HashMap::new(),
        }
    }

    /// Append a transcript segment (builder pattern).
    pub fn with_segment(mut self, segment: TranscriptSegment) -> Self {
        self.recent_segments.push(segment);
        self
    }

    /// Replace the blackboard (builder pattern).
    pub fn with_blackboard(mut self, blackboard: Blackboard) -> Self {
        self.blackboard = blackboard;
        self
    }

    /// Set the host-maintained turn counter (builder pattern).
    pub fn with_turn_count(mut self, turn_count: u64) -> Self {
        self.turn_count = turn_count;
        self
    }
}
