//! Structured per-turn execution traces.
//!
//! [`StructuredLogTracer`] is a [`CallbackHandler`] that collects everything
//! that happened in a turn — input preview, per-agent latency and output,
//! failures — into one JSON document, and emits it as a single
//! `TURN_TRACE: {json}` log line when the turn ends. Pipe the log stream into
//! any JSON-line tooling to debug agent behavior, latency, and outputs.
//!
//! # Example
//!
//! ```rust,no_run
//! use agentboard::engine::AgentEngine;
//! use agentboard::tracing::StructuredLogTracer;
//! use std::sync::Arc;
//!
//! let engine = AgentEngine::new(None)
//!     .with_callback(Arc::new(StructuredLogTracer::new()));
//! ```

use crate::agentboard::callbacks::{CallbackHandler, SkipReason};
use crate::agentboard::models::{AgentContext, AgentResponse};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::Mutex;

/// Accumulates one trace document per turn and logs it at turn end.
///
/// One tracer instance belongs to one engine; turns within a session are
/// serialized by the host, so the single accumulator never sees two turns
/// interleaved.
pub struct StructuredLogTracer {
    current: Mutex<Value>,
}

impl StructuredLogTracer {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(Value::Null),
        }
    }
}

impl Default for StructuredLogTracer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CallbackHandler for StructuredLogTracer {
    async fn on_turn_start(&self, context: &AgentContext) {
        let last = context.recent_segments.last();
        let trace = json!({
            "trace_id": uuid::Uuid::new_v4().to_string(),
            "session_id": context.session_id,
            "trigger": context.trigger_type.to_string(),
            "trigger_metadata": context.trigger_metadata,
            "input_preview": last.map(|s| s.text.clone()).unwrap_or_default(),
            "speaker": last.map(|s| s.speaker.clone()).unwrap_or_else(|| "UNKNOWN".to_string()),
            "turn_count": context.turn_count,
            "user_context": context.user_context,
            "language_directive": context.language_directive,
            "rag_docs": context.rag_docs,
            "initial_variables": context.blackboard.variables,
            "transcript_history": context.recent_segments,
            "steps": [],
        });
        *self.current.lock().await = trace;
    }

    async fn on_agent_finish(
        &self,
        agent_name: &str,
        response: Option<&AgentResponse>,
        duration: Duration,
    ) {
        let mut step = json!({
            "agent": agent_name,
            "latency_ms": (duration.as_secs_f64() * 1000.0 * 100.0).round() / 100.0,
            "status": if response.is_some() { "success" } else { "no_response" },
        });

        if let Some(response) = response {
            step["insights"] = json!(response
                .insights
                .iter()
                .map(|i| {
                    json!({
                        "type": i.insight_type.to_string(),
                        "content": i.content,
                        "confidence": i.confidence,
                        "metadata": i.metadata,
                    })
                })
                .collect::<Vec<_>>());
            if !response.variable_updates.is_empty() {
                step["variable_updates"] = json!(response.variable_updates);
            }
            if !response.events.is_empty() {
                step["events"] =
                    json!(response.events.iter().map(|e| e.name.clone()).collect::<Vec<_>>());
            }
            if !response.data.is_empty() {
                step["data"] = json!(response.data);
            }
        }

        let mut trace = self.current.lock().await;
        if let Some(steps) = trace.get_mut("steps").and_then(Value::as_array_mut) {
            steps.push(step);
        }
    }

    async fn on_agent_error(&self, agent_name: &str, error: &str) {
        let mut trace = self.current.lock().await;
        if let Some(steps) = trace.get_mut("steps").and_then(Value::as_array_mut) {
            steps.push(json!({
                "agent": agent_name,
                "status": "error",
                "error": error,
            }));
        }
    }

    async fn on_agent_skipped(&self, agent_name: &str, reason: SkipReason) {
        let mut trace = self.current.lock().await;
        if let Some(steps) = trace.get_mut("steps").and_then(Value::as_array_mut) {
            steps.push(json!({
                "agent": agent_name,
                "status": "skipped",
                "reason": reason.to_string(),
            }));
        }
    }

    async fn on_turn_end(&self, response: &AgentResponse, duration: Duration) {
        let mut trace = self.current.lock().await;
        trace["total_latency_ms"] =
            json!((duration.as_secs_f64() * 1000.0 * 100.0).round() / 100.0);
        trace["final_insight_count"] = json!(response.insights.len());
        trace["final_variable_updates"] = json!(response.variable_updates);
        trace["event_count"] = json!(response.events.len());

        // The golden log line: one JSON document per turn.
        log::info!("TURN_TRACE: {}", trace.to_string());
        *trace = Value::Null;
    }
}
