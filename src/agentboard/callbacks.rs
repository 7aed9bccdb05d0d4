//! Observer interface for engine and agent lifecycle events.
//!
//! Implement [`CallbackHandler`] to receive real-time notifications about
//! turn boundaries, phase boundaries, individual agent runs, skips, and
//! failures. Every method has a default no-op implementation — override only
//! what you care about. Handlers are shared as `Arc<dyn CallbackHandler>`
//! across the engine's async tasks, so any internal state needs its own
//! synchronization.
//!
//! The engine treats handlers as infallible: the methods return `()` and are
//! awaited inline, so a handler must not panic and should not block for long.
//!
//! # Example
//!
//! ```rust
//! use agentboard::callbacks::{CallbackHandler, SkipReason};
//! use async_trait::async_trait;
//!
//! struct SkipLogger;
//!
//! #[async_trait]
//! impl CallbackHandler for SkipLogger {
//!     async fn on_agent_skipped(&self, agent_name: &str, reason: SkipReason) {
//!         println!("{} skipped: {}", agent_name, reason);
//!     }
//! }
//! ```

use crate::agentboard::models::{AgentContext, AgentResponse};
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

/// Why an agent did not run this turn.
///
/// Skips are not errors; they are the normal outcome of selection and of the
/// cooldown check inside the agent lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The host's allow-list excluded the agent.
    NotInAllowList,
    /// The turn's trigger type is not among the agent's declared types.
    TriggerTypeMismatch,
    /// The agent's trigger conditions evaluated to false.
    ConditionsNotMet,
    /// The agent ran too recently.
    CooldownActive,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::NotInAllowList => "not_in_allow_list",
            SkipReason::TriggerTypeMismatch => "trigger_type_mismatch",
            SkipReason::ConditionsNotMet => "conditions_not_met",
            SkipReason::CooldownActive => "cooldown_active",
        };
        write!(f, "{}", s)
    }
}

/// Callback handler invoked by the engine across a turn's lifecycle.
///
/// All methods default to no-ops.
#[async_trait]
pub trait CallbackHandler: Send + Sync {
    /// A new turn is beginning. The context already carries the stamped
    /// trigger info and `sys.*` variables.
    async fn on_turn_start(&self, _context: &AgentContext) {}

    /// The turn finished; `response` is the aggregate the host receives.
    async fn on_turn_end(&self, _response: &AgentResponse, _duration: Duration) {}

    /// A phase is about to fan out to the named agents.
    async fn on_phase_start(&self, _phase: u32, _agent_names: &[String]) {}

    /// A phase merged; `event_names` are the events it emitted.
    async fn on_phase_end(&self, _phase: u32, _event_names: &[String]) {}

    /// An individual agent passed its checks and is about to evaluate.
    async fn on_agent_start(&self, _agent_name: &str, _context: &AgentContext) {}

    /// An individual agent finished evaluating. `response` is `None` when the
    /// agent declined to respond.
    async fn on_agent_finish(
        &self,
        _agent_name: &str,
        _response: Option<&AgentResponse>,
        _duration: Duration,
    ) {
    }

    /// An individual agent failed; its updates were discarded.
    async fn on_agent_error(&self, _agent_name: &str, _error: &str) {}

    /// An agent was skipped during selection or by its cooldown.
    async fn on_agent_skipped(&self, _agent_name: &str, _reason: SkipReason) {}

    /// The engine itself hit an unexpected fault while assembling the turn.
    async fn on_chain_error(&self, _error: &str) {}
}
