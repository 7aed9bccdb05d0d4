// src/lib.rs

// Import the top-level `agentboard` module.
pub mod agentboard;

// Re-export the submodules at the crate root so hosts don't have to navigate
// the doubled `agentboard::agentboard::…` path.
pub use agentboard::{
    agent, blackboard, callbacks, clients, conditions, engine, library, llm, models, tracing,
};

// Re-exporting key items for easier external access.
pub use agentboard::agent::{Agent, AgentConfig, AgentError};
pub use agentboard::blackboard::Blackboard;
pub use agentboard::callbacks::{CallbackHandler, SkipReason};
pub use agentboard::engine::AgentEngine;
pub use agentboard::models::{AgentContext, AgentResponse, TriggerType};
