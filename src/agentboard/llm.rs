//! The model-client boundary.
//!
//! The engine never talks to a language model itself; agents do, through an
//! injected [`LlmClient`]. The contract is deliberately small and **total**:
//! `generate_json` returns `Some(object)` on success and `None` on any
//! failure (missing credentials, transport error, malformed reply), logging
//! the cause. Agents therefore never have to guard an LLM call with error
//! plumbing — a `None` simply means "nothing to say this turn".
//!
//! The client is injected at registration time by
//! [`AgentEngine::register_agent`](crate::agentboard::engine::AgentEngine::register_agent)
//! and replaced in every agent by
//! [`AgentEngine::update_api_key`](crate::agentboard::engine::AgentEngine::update_api_key).
//! There is no process-wide singleton.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Conversation role for a chat-completion message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message in a chat-completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// A client that can produce a structured JSON reply from a chat prompt.
///
/// Implementations must be total: log failures internally and return `None`
/// rather than panicking or surfacing transport errors to agents.
///
/// # Example
///
/// ```rust
/// use agentboard::llm::{ChatMessage, LlmClient};
/// use async_trait::async_trait;
/// use serde_json::{json, Value};
///
/// struct CannedClient;
///
/// #[async_trait]
/// impl LlmClient for CannedClient {
///     async fn generate_json(&self, _model: &str, _messages: &[ChatMessage]) -> Option<Value> {
///         Some(json!({"has_insight": true, "message": "Ask about budget.", "type": "suggestion"}))
///     }
/// }
/// ```
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate a structured JSON object from the given messages, or `None`
    /// when the model cannot be reached or did not return usable JSON.
    async fn generate_json(&self, model: &str, messages: &[ChatMessage]) -> Option<Value>;
}
