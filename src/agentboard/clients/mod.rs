//! Bundled model clients.
//!
//! The engine only depends on the [`LlmClient`](crate::agentboard::llm::LlmClient)
//! trait; this module ships one concrete implementation for
//! OpenAI-compatible chat-completions endpoints. Hosts with other providers
//! implement the trait themselves and hand the engine an `Arc` of it via
//! [`AgentEngine::with_llm_client`](crate::agentboard::engine::AgentEngine::with_llm_client).

pub mod openai;
