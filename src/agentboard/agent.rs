//! The agent contract: configuration plus a single `evaluate` operation.
//!
//! An agent is anything that receives an [`AgentContext`] and returns an
//! [`AgentResponse`] (or nothing). Persona, prompt text, and output schema
//! are plain data the concrete implementation consumes — there is no
//! inheritance chain. The engine wraps `evaluate` in a lifecycle
//! (trigger-type check, cooldown with per-turn override, observer callbacks,
//! error capture); the agent itself only thinks.
//!
//! Responsibility split:
//! - **Engine**: trigger eligibility, condition evaluation, cooldown, merge.
//! - **Agent**: producing a response from the snapshot it was handed.

use crate::agentboard::conditions::ConditionSet;
use crate::agentboard::llm::LlmClient;
use crate::agentboard::models::{AgentContext, AgentResponse, Insight, InsightType, TriggerType};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::sync::Arc;

/// Error type agents may surface from [`Agent::evaluate`].
///
/// The engine never inspects it beyond formatting: a failing agent's entire
/// response is discarded and the error text is surfaced as a system insight.
pub type AgentError = Box<dyn Error + Send + Sync>;

/// Immutable per-registration configuration for an agent.
///
/// `model`, `output_format`, `trigger_keywords`, and `silence_threshold` are
/// transparent to the engine: keyword and silence detection happen host-side,
/// and the model string is consumed by the agent implementation itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Human-readable display name.
    pub name: String,
    /// Stable identifier used in allow-lists, memory namespaces, and logs.
    pub id: String,
    /// Minimum seconds between runs (see also
    /// [`ConfigOverride`](crate::agentboard::models::ConfigOverride)).
    #[serde(default = "default_cooldown")]
    pub cooldown: u64,
    /// Model identifier handed to the agent's LLM client.
    #[serde(default = "default_model")]
    pub model: String,
    /// Trigger types this agent responds to.
    #[serde(default = "default_trigger_types")]
    pub trigger_types: Vec<TriggerType>,
    /// Keywords the host matches to fire a `Keyword` trigger.
    #[serde(default)]
    pub trigger_keywords: Vec<String>,
    /// Seconds of dead air before the host fires a `Silence` trigger.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub silence_threshold: Option<f64>,
    /// Merge priority: larger writes later and therefore wins.
    #[serde(default)]
    pub priority: i32,
    /// Output-format hint consumed by the agent implementation.
    #[serde(default = "default_output_format")]
    pub output_format: String,
    /// Preconditions evaluated by the engine before running the agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_conditions: Option<ConditionSet>,
    /// Event names whose emission makes this agent a phase-2 candidate.
    #[serde(default)]
    pub subscribed_events: Vec<String>,
}

fn default_cooldown() -> u64 {
    10
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_trigger_types() -> Vec<TriggerType> {
    vec![TriggerType::TurnBased]
}

fn default_output_format() -> String {
    "default".to_string()
}

impl AgentConfig {
    /// Create a config with the given display name. The id defaults to the
    /// lowercased name with spaces replaced by underscores.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let id = name.to_lowercase().replace(' ', "_");
        Self {
            name,
            id,
            cooldown: default_cooldown(),
            model: default_model(),
            trigger_types: default_trigger_types(),
            trigger_keywords: Vec::new(),
            silence_threshold: None,
            priority: 0,
            output_format: default_output_format(),
            trigger_conditions: None,
            subscribed_events: Vec::new(),
        }
    }

    /// Override the stable id (builder pattern).
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the cooldown in seconds (builder pattern).
    pub fn with_cooldown(mut self, cooldown: u64) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Set the model identifier (builder pattern).
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Replace the trigger types (builder pattern).
    pub fn with_trigger_types(mut self, trigger_types: Vec<TriggerType>) -> Self {
        self.trigger_types = trigger_types;
        self
    }

    /// Replace the keyword list (builder pattern).
    pub fn with_trigger_keywords(mut self, keywords: Vec<String>) -> Self {
        self.trigger_keywords = keywords;
        self
    }

    /// Set the merge priority (builder pattern).
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Attach trigger conditions (builder pattern).
    pub fn with_trigger_conditions(mut self, conditions: ConditionSet) -> Self {
        self.trigger_conditions = Some(conditions);
        self
    }

    /// Replace the event subscriptions (builder pattern).
    pub fn with_subscribed_events(mut self, events: Vec<String>) -> Self {
        self.subscribed_events = events;
        self
    }
}

/// A unit of reasoning the engine can schedule.
///
/// Implementations must be `Send + Sync`: within a phase the engine runs all
/// selected agents concurrently against a shared snapshot context. Any
/// mutable scratch an agent keeps needs interior mutability.
#[async_trait]
pub trait Agent: Send + Sync {
    /// The agent's immutable configuration.
    fn config(&self) -> &AgentConfig;

    /// Produce a response from the context, or `Ok(None)` to stay silent.
    ///
    /// The context's blackboard is an immutable snapshot; writes go into the
    /// returned response and are merged by the engine after the phase
    /// barrier. An `Err` discards the whole response (atomic failure) and
    /// surfaces as a system error insight.
    async fn evaluate(&self, context: &AgentContext) -> Result<Option<AgentResponse>, AgentError>;

    /// Called by the engine at registration and on API-key rotation to inject
    /// the model client. Agents that do their own I/O can ignore it.
    fn bind_llm(&mut self, _client: Arc<dyn LlmClient>) {}

    /// Build an insight stamped with this agent's identity.
    fn insight(&self, content: impl Into<String> + Send, insight_type: InsightType) -> Insight
    where
        Self: Sized,
    {
        let cfg = self.config();
        Insight::new(cfg.id.clone(), cfg.name.clone(), insight_type, content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_derived_from_name() {
        let config = AgentConfig::new("Deal Coach");
        assert_eq!(config.id, "deal_coach");
        assert_eq!(config.cooldown, 10);
        assert_eq!(config.trigger_types, vec![TriggerType::TurnBased]);
    }

    #[test]
    fn builder_pattern() {
        let config = AgentConfig::new("Objection Handler")
            .with_id("objections")
            .with_cooldown(30)
            .with_priority(5)
            .with_trigger_types(vec![TriggerType::Keyword, TriggerType::Event])
            .with_subscribed_events(vec!["objection_raised".to_string()]);

        assert_eq!(config.id, "objections");
        assert_eq!(config.cooldown, 30);
        assert_eq!(config.priority, 5);
        assert_eq!(config.subscribed_events, vec!["objection_raised"]);
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: AgentConfig = serde_json::from_str(
            r#"{"name": "Minimal", "id": "minimal"}"#,
        )
        .unwrap();
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.priority, 0);
        assert!(config.trigger_conditions.is_none());
        assert!(config.subscribed_events.is_empty());
    }
}
