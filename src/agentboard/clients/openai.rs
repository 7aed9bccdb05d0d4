//! OpenAI-compatible JSON-mode client.
//!
//! Speaks the `/chat/completions` wire format with
//! `response_format: {"type": "json_object"}`, which many providers accept.
//! The base URL is overridable for compatible endpoints.
//!
//! The client degrades gracefully rather than erroring: a missing API key,
//! a transport failure, or a non-JSON reply all log the cause and yield
//! `None` from [`generate_json`](crate::agentboard::llm::LlmClient::generate_json),
//! which agents treat as "nothing to say".

use crate::agentboard::llm::{ChatMessage, LlmClient};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Client for OpenAI-compatible chat-completions endpoints.
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

impl OpenAiClient {
    /// Create a client. `api_key = None` falls back to the `OPENAI_API_KEY`
    /// environment variable; when neither is present the client stays usable
    /// but every generation returns `None`.
    pub fn new(api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(str::to_string)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        if api_key.is_none() {
            log::warn!("No OpenAI API key provided. LLM-backed agents will produce no output.");
        }
        Self {
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Point the client at a compatible endpoint (builder pattern).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn generate_json(&self, model: &str, messages: &[ChatMessage]) -> Option<Value> {
        let Some(api_key) = &self.api_key else {
            log::error!("LLM client not initialized (missing API key)");
            return None;
        };

        let body = json!({
            "model": model,
            "messages": messages,
            "response_format": {"type": "json_object"},
        });

        let response = match self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                log::error!("LLM request failed: {}", e);
                return None;
            }
        };

        if !response.status().is_success() {
            log::error!("LLM request returned status {}", response.status());
            return None;
        }

        let reply: Value = match response.json().await {
            Ok(reply) => reply,
            Err(e) => {
                log::error!("LLM reply was not valid JSON: {}", e);
                return None;
            }
        };

        let content = reply
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)?;

        match serde_json::from_str(content) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                log::error!("LLM content was not the requested JSON object: {}", e);
                None
            }
        }
    }
}
