//! A fully config-driven agent.
//!
//! [`DynamicAgent`] loads its persona and trigger wiring from a
//! [`PersonaConfig`] (typically deserialized from a database row or JSON
//! file), assembles a prompt from the turn context, calls the injected
//! [`LlmClient`], and parses the structured reply into an
//! [`AgentResponse`].
//!
//! The reply shape is one of two closed variants ([`OutputFormat`]): the
//! conversational `Default` shape gates a single insight behind a
//! `has_insight` flag, while `Raw` hands back the response containers
//! directly. Both shapes may carry the structured fields (`events`,
//! `variable_updates`, `queue_pushes`, `facts`, `memory_updates`, `data`)
//! at the top level of the reply.
//!
//! # Example
//!
//! ```rust
//! use agentboard::agent::Agent;
//! use agentboard::library::{DynamicAgent, PersonaConfig};
//!
//! let persona: PersonaConfig = serde_json::from_str(r#"{
//!     "name": "Deal Coach",
//!     "id": "deal_coach",
//!     "text": "You coach the seller through live calls. Be terse.",
//!     "model": "gpt-4o-mini",
//!     "trigger_config": {
//!         "mode": ["turn_based", "keyword"],
//!         "cooldown": 20,
//!         "keywords": "price, cost, budget",
//!         "priority": 5
//!     }
//! }"#).unwrap();
//!
//! let agent = DynamicAgent::new(persona);
//! assert_eq!(agent.config().id, "deal_coach");
//! ```

use crate::agentboard::agent::{Agent, AgentConfig, AgentError};
use crate::agentboard::conditions::ConditionSet;
use crate::agentboard::llm::{ChatMessage, LlmClient};
use crate::agentboard::models::{
    AgentContext, AgentResponse, Event, Fact, Insight, InsightType, TriggerType,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

/// One or many — persona files write `"mode": "keyword"` or
/// `"mode": ["turn_based", "keyword"]` interchangeably.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

/// Keyword lists come either as a JSON array or as a comma-separated string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum KeywordList {
    Text(String),
    List(Vec<String>),
}

impl KeywordList {
    fn into_vec(self) -> Vec<String> {
        match self {
            KeywordList::Text(s) => s
                .split(',')
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect(),
            KeywordList::List(v) => v,
        }
    }
}

/// Trigger wiring section of a [`PersonaConfig`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TriggerConfig {
    /// Trigger mode name(s): `turn_based`, `keyword`, `silence`, `interval`,
    /// `event`. Unknown names are ignored; an empty result falls back to
    /// `turn_based`.
    #[serde(default)]
    pub mode: Option<OneOrMany>,
    #[serde(default)]
    pub cooldown: Option<u64>,
    #[serde(default)]
    pub keywords: Option<KeywordList>,
    #[serde(default)]
    pub silence_threshold: Option<f64>,
    #[serde(default)]
    pub subscribed_events: Vec<String>,
    #[serde(default)]
    pub priority: Option<i32>,
}

/// The persona and wiring for one [`DynamicAgent`], as plain data.
#[derive(Debug, Clone, Deserialize)]
pub struct PersonaConfig {
    /// Display name.
    pub name: String,
    /// Stable id; defaults to the lowercased/underscored name when absent.
    #[serde(default)]
    pub id: Option<String>,
    /// The persona's system prompt, used verbatim.
    #[serde(default)]
    pub text: String,
    /// Model identifier for the LLM call.
    #[serde(default)]
    pub model: Option<String>,
    /// Reply shape: `"default"` or `"raw"`.
    #[serde(default)]
    pub output_format: Option<String>,
    /// How many recent transcript segments to include. `0` means all.
    #[serde(default)]
    pub context_turns: Option<usize>,
    /// Whether RAG docs and user context are injected into the prompt.
    #[serde(default)]
    pub include_context: Option<bool>,
    /// Merge priority when not set inside `trigger_config`.
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub trigger_config: TriggerConfig,
    /// Preconditions evaluated by the engine.
    #[serde(default)]
    pub trigger_conditions: Option<ConditionSet>,
}

/// The closed set of reply shapes a [`DynamicAgent`] understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// `{"has_insight": bool, "message": "...", "type": "...", "confidence": ...}`
    /// plus optional structured fields.
    Default,
    /// Response containers spelled out directly:
    /// `{"insights": [...], "variable_updates": {...}, ...}`.
    Raw,
}

impl OutputFormat {
    fn from_name(name: &str) -> Self {
        match name {
            "raw" | "v2_raw" => OutputFormat::Raw,
            "default" => OutputFormat::Default,
            other => {
                log::warn!("Unknown output format '{}', falling back to default", other);
                OutputFormat::Default
            }
        }
    }

    fn instruction(&self) -> &'static str {
        match self {
            OutputFormat::Default => {
                "IMPORTANT: Respond with a single JSON object: \
                 {\"has_insight\": boolean, \"message\": \"the advice text\", \
                 \"type\": \"suggestion|warning|opportunity|fact|praise\", \
                 \"confidence\": 0.0-1.0}. \
                 Set has_insight to false when you have nothing worth saying. \
                 You may additionally include \"events\", \"variable_updates\", \
                 \"queue_pushes\", \"facts\", and \"memory_updates\" fields."
            }
            OutputFormat::Raw => {
                "IMPORTANT: Respond with a single JSON object containing any of: \
                 \"insights\" (list of {\"content\", \"type\", \"confidence\"}), \
                 \"events\" (list of {\"name\", \"payload\"}), \
                 \"variable_updates\" (object), \"queue_pushes\" (object of lists), \
                 \"facts\" (list of {\"type\", \"key\", \"value\", \"confidence\"}), \
                 \"memory_updates\" (object), \"data\" (object). \
                 Omit fields you have nothing for."
            }
        }
    }
}

/// An agent whose persona, triggers, and output parsing are all data-driven.
pub struct DynamicAgent {
    config: AgentConfig,
    system_prompt: String,
    context_turns: usize,
    include_context: bool,
    format: OutputFormat,
    llm: Option<Arc<dyn LlmClient>>,
}

impl DynamicAgent {
    /// Build an agent from its persona config.
    pub fn new(persona: PersonaConfig) -> Self {
        let trigger_types = parse_trigger_modes(persona.trigger_config.mode.clone());
        let priority = persona
            .trigger_config
            .priority
            .or(persona.priority)
            .unwrap_or(0);

        let mut config = AgentConfig::new(persona.name.clone())
            .with_cooldown(persona.trigger_config.cooldown.unwrap_or(15))
            .with_model(persona.model.unwrap_or_else(|| "gpt-4o-mini".to_string()))
            .with_trigger_types(trigger_types)
            .with_priority(priority)
            .with_subscribed_events(persona.trigger_config.subscribed_events.clone());
        if let Some(id) = persona.id {
            config = config.with_id(id);
        }
        if let Some(keywords) = persona.trigger_config.keywords.clone() {
            config = config.with_trigger_keywords(keywords.into_vec());
        }
        if let Some(conditions) = persona.trigger_conditions {
            config = config.with_trigger_conditions(conditions);
        }
        config.silence_threshold = persona.trigger_config.silence_threshold;
        let format_name = persona.output_format.unwrap_or_else(|| "default".to_string());
        config.output_format = format_name.clone();

        Self {
            config,
            system_prompt: persona.text,
            context_turns: persona.context_turns.unwrap_or(6),
            include_context: persona.include_context.unwrap_or(true),
            format: OutputFormat::from_name(&format_name),
            llm: None,
        }
    }

    /// Assemble the system prompt from the persona text and the turn context.
    fn build_system_prompt(&self, context: &AgentContext) -> String {
        let mut prompt = String::new();

        if self.include_context {
            if let Some(user_context) = &context.user_context {
                prompt.push_str(user_context);
                prompt.push_str("\n\n");
            }
        }

        // Language is not "context": the directive is always injected.
        if let Some(directive) = &context.language_directive {
            prompt.push_str(directive);
            prompt.push('\n');
        }

        prompt.push_str(&self.system_prompt);

        let memory = context
            .blackboard
            .memory_of(&self.config.id)
            .map(|m| serde_json::to_string_pretty(m).unwrap_or_else(|_| "{}".to_string()))
            .unwrap_or_else(|| "{}".to_string());
        prompt.push_str("\n\n[YOUR MEMORY / SCRATCHPAD]\n");
        prompt.push_str(&memory);

        if self.include_context && !context.rag_docs.is_empty() {
            prompt.push_str("\n\n[RELEVANT KNOWLEDGE/DOCS]\n");
            prompt.push_str(&context.rag_docs.join("\n---\n"));
        }

        match context.trigger_type {
            TriggerType::Keyword => {
                if let Some(keyword) =
                    context.trigger_metadata.get("keyword").and_then(Value::as_str)
                {
                    prompt.push_str(&format!(
                        "\n\n[TRIGGER] You were activated by keyword: '{}'",
                        keyword
                    ));
                }
            }
            TriggerType::Silence => {
                if let Some(duration) = context
                    .trigger_metadata
                    .get("silence_duration")
                    .and_then(Value::as_f64)
                {
                    prompt.push_str(&format!(
                        "\n\n[TRIGGER] You were activated after {:.1} seconds of silence.",
                        duration
                    ));
                }
            }
            _ => {}
        }

        prompt.push_str("\n\n");
        prompt.push_str(self.format.instruction());
        prompt
    }

    /// The transcript window the persona is configured to see.
    fn transcript_slice(&self, context: &AgentContext) -> String {
        let segments = &context.recent_segments;
        let window = if self.context_turns == 0 || segments.len() <= self.context_turns {
            &segments[..]
        } else {
            &segments[segments.len() - self.context_turns..]
        };
        window
            .iter()
            .map(|seg| format!("{}: {}", seg.speaker, seg.text))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Parse the model reply into a response, per the configured format.
    fn parse_reply(&self, reply: &Value, now: f64) -> AgentResponse {
        let mut response = AgentResponse::default();

        match self.format {
            OutputFormat::Default => {
                let has_insight = reply
                    .get("has_insight")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                if has_insight {
                    if let Some(content) = reply.get("message").and_then(Value::as_str) {
                        if !content.is_empty() {
                            let insight_type = reply
                                .get("type")
                                .and_then(Value::as_str)
                                .map(parse_insight_type)
                                .unwrap_or(InsightType::Suggestion);
                            let confidence = reply
                                .get("confidence")
                                .and_then(Value::as_f64)
                                .unwrap_or(1.0);
                            response.insights.push(
                                Insight::new(
                                    self.config.id.clone(),
                                    self.config.name.clone(),
                                    insight_type,
                                    content,
                                )
                                .with_confidence(confidence),
                            );
                        }
                    }
                }
            }
            OutputFormat::Raw => {
                if let Some(items) = reply.get("insights").and_then(Value::as_array) {
                    for item in items {
                        let content = item
                            .get("content")
                            .or_else(|| item.get("message"))
                            .and_then(Value::as_str)
                            .unwrap_or_default();
                        if content.is_empty() {
                            continue;
                        }
                        let insight_type = item
                            .get("type")
                            .and_then(Value::as_str)
                            .map(parse_insight_type)
                            .unwrap_or(InsightType::Suggestion);
                        let confidence =
                            item.get("confidence").and_then(Value::as_f64).unwrap_or(1.0);
                        response.insights.push(
                            Insight::new(
                                self.config.id.clone(),
                                self.config.name.clone(),
                                insight_type,
                                content,
                            )
                            .with_confidence(confidence),
                        );
                    }
                }
            }
        }

        // The structured fields live at the reply root in both formats.
        if let Some(items) = reply.get("events").and_then(Value::as_array) {
            for item in items {
                match item {
                    Value::Object(obj) => {
                        let name = obj.get("name").and_then(Value::as_str).unwrap_or_default();
                        if name.is_empty() {
                            continue;
                        }
                        let mut event = Event::new(name, self.config.id.clone(), now);
                        if let Some(Value::Object(payload)) = obj.get("payload") {
                            event.payload = payload
                                .iter()
                                .map(|(k, v)| (k.clone(), v.clone()))
                                .collect();
                        }
                        event.id = obj.get("id").and_then(Value::as_str).map(str::to_string);
                        response.events.push(event);
                    }
                    // Bare-string events are the shorthand form.
                    Value::String(name) if !name.is_empty() => {
                        response
                            .events
                            .push(Event::new(name.clone(), self.config.id.clone(), now));
                    }
                    _ => {}
                }
            }
        }

        if let Some(Value::Object(updates)) = reply.get("variable_updates") {
            for (k, v) in updates {
                response.variable_updates.insert(k.clone(), v.clone());
            }
        }

        if let Some(Value::Object(pushes)) = reply.get("queue_pushes") {
            for (queue, items) in pushes {
                if let Value::Array(items) = items {
                    response
                        .queue_pushes
                        .entry(queue.clone())
                        .or_default()
                        .extend(items.iter().cloned());
                }
            }
        }

        if let Some(items) = reply.get("facts").and_then(Value::as_array) {
            for item in items {
                let Some(obj) = item.as_object() else { continue };
                let fact_type = obj
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                let mut fact = Fact::new(
                    fact_type,
                    obj.get("value").cloned().unwrap_or(Value::Null),
                    obj.get("confidence").and_then(Value::as_f64).unwrap_or(1.0),
                    self.config.id.clone(),
                    now,
                );
                if let Some(key) = obj.get("key").and_then(Value::as_str) {
                    fact = fact.with_key(key);
                }
                response.facts.push(fact);
            }
        }

        if let Some(Value::Object(updates)) = reply.get("memory_updates") {
            for (k, v) in updates {
                response.memory_updates.insert(k.clone(), v.clone());
            }
        }

        if let Some(Value::Object(data)) = reply.get("data") {
            for (k, v) in data {
                response.data.insert(k.clone(), v.clone());
            }
        }

        response
    }
}

#[async_trait]
impl Agent for DynamicAgent {
    fn config(&self) -> &AgentConfig {
        &self.config
    }

    async fn evaluate(&self, context: &AgentContext) -> Result<Option<AgentResponse>, AgentError> {
        let Some(llm) = &self.llm else {
            log::warn!("{}: no LLM client bound, skipping", self.config.name);
            return Ok(None);
        };

        let model = context
            .agent_config_overrides
            .get(&self.config.id)
            .and_then(|o| o.model.as_deref())
            .unwrap_or(self.config.model.as_str());

        let messages = vec![
            ChatMessage::system(self.build_system_prompt(context)),
            ChatMessage::user(format!("### TRANSCRIPT:\n{}", self.transcript_slice(context))),
        ];

        let Some(reply) = llm.generate_json(model, &messages).await else {
            log::warn!("{}: model returned no usable JSON", self.config.name);
            return Ok(None);
        };

        let now = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
        Ok(Some(self.parse_reply(&reply, now)))
    }

    fn bind_llm(&mut self, client: Arc<dyn LlmClient>) {
        self.llm = Some(client);
    }
}

fn parse_trigger_modes(mode: Option<OneOrMany>) -> Vec<TriggerType> {
    let names = mode.map(OneOrMany::into_vec).unwrap_or_default();
    let mut types: Vec<TriggerType> = names
        .iter()
        .filter_map(|name| match name.as_str() {
            "turn_based" => Some(TriggerType::TurnBased),
            "keyword" => Some(TriggerType::Keyword),
            "silence" => Some(TriggerType::Silence),
            "interval" => Some(TriggerType::Interval),
            "event" => Some(TriggerType::Event),
            other => {
                log::warn!("Unknown trigger mode '{}', ignoring", other);
                None
            }
        })
        .collect();
    if types.is_empty() {
        types.push(TriggerType::TurnBased);
    }
    types
}

fn parse_insight_type(name: &str) -> InsightType {
    match name.to_lowercase().as_str() {
        "suggestion" => InsightType::Suggestion,
        "warning" => InsightType::Warning,
        "opportunity" => InsightType::Opportunity,
        "fact" => InsightType::Fact,
        "praise" => InsightType::Praise,
        "error" => InsightType::Error,
        _ => InsightType::Suggestion,
    }
}
