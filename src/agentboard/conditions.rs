//! Trigger-condition evaluation against blackboard state.
//!
//! Trigger conditions let agents declare preconditions that must hold before
//! they run, which prevents unnecessary LLM calls. A condition set is a small
//! JSON-representable expression:
//!
//! ```json
//! {
//!   "mode": "all",
//!   "rules": [
//!     { "var": "phase", "op": "eq", "value": "negotiation" },
//!     { "queue": "pending_questions", "op": "not_empty" }
//!   ]
//! }
//! ```
//!
//! Each rule names exactly one source (`var`, `fact` [+ `fact_key`], `queue`,
//! `memory`, `meta`) and one operator. Supported operators:
//!
//! - `eq`, `neq` — equality comparisons
//! - `gt`, `gte`, `lt`, `lte` — numeric comparisons
//! - `in`, `not_in` — membership against a list value
//! - `contains` — list membership / substring / map-key presence
//! - `exists` — value is truthy; `present` — key exists regardless of value;
//!   `not_exists` — value is falsy or missing
//! - `empty`, `not_empty` — collection size checks
//! - `mod` — `(actual % value) == result`
//!
//! Evaluation is **total**: it never panics and never returns an error. Type
//! mismatches and invalid operations yield `false`; an unknown operator
//! yields `true` (lenient) and is logged. The engine relies on this — a bad
//! condition must not be able to poison a turn.

use crate::agentboard::blackboard::Blackboard;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// How the rules of a [`ConditionSet`] combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionMode {
    /// Every rule must pass.
    #[default]
    All,
    /// At least one rule must pass.
    Any,
}

/// A set of rules gating an agent's execution.
///
/// An absent set, or a set with no rules, is vacuously true.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConditionSet {
    #[serde(default)]
    pub mode: ConditionMode,
    #[serde(default)]
    pub rules: Vec<ConditionRule>,
}

impl ConditionSet {
    /// A set requiring every rule to pass.
    pub fn all(rules: Vec<ConditionRule>) -> Self {
        Self { mode: ConditionMode::All, rules }
    }

    /// A set requiring at least one rule to pass.
    pub fn any(rules: Vec<ConditionRule>) -> Self {
        Self { mode: ConditionMode::Any, rules }
    }
}

/// A single condition rule: one source selector plus an operator.
///
/// Exactly one of `var` / `fact` / `queue` / `memory` / `meta` should be set;
/// when several are present the first in that order wins, and when none is
/// present the source resolves to nothing (most operators then fail).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConditionRule {
    /// Resolve against `blackboard.variables[..]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub var: Option<String>,
    /// Resolve against the deduped fact of this type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fact: Option<String>,
    /// Optional instance key for keyed facts; only meaningful with `fact`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fact_key: Option<String>,
    /// Resolve against the named queue (missing queue → empty list).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    /// Resolve against the evaluating agent's private memory. A dotted key
    /// (`"other_agent.counter"`) reads another agent's namespace instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    /// Resolve against engine-supplied metadata (`turn_count`, `phase`,
    /// `trigger_type`, `session_id`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<String>,
    /// Operator name. Defaults to `eq`.
    #[serde(default = "default_op")]
    pub op: String,
    /// Expected value, for operators that take one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Expected remainder for the `mod` operator. Defaults to 0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<i64>,
}

fn default_op() -> String {
    "eq".to_string()
}

impl ConditionRule {
    /// Rule over a session variable.
    pub fn var(key: impl Into<String>, op: impl Into<String>, value: Value) -> Self {
        Self {
            var: Some(key.into()),
            op: op.into(),
            value: Some(value),
            ..Self::default()
        }
    }

    /// Rule over a queue (typically `empty` / `not_empty`).
    pub fn queue(name: impl Into<String>, op: impl Into<String>) -> Self {
        Self {
            queue: Some(name.into()),
            op: op.into(),
            ..Self::default()
        }
    }

    /// Rule over engine metadata.
    pub fn meta(key: impl Into<String>, op: impl Into<String>, value: Value) -> Self {
        Self {
            meta: Some(key.into()),
            op: op.into(),
            value: Some(value),
            ..Self::default()
        }
    }
}

/// Evaluates trigger conditions against blackboard state.
///
/// Stateless; the engine holds one and reuses it for every selection pass.
#[derive(Debug, Default)]
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    /// Evaluate a condition set. Returns `true` when the agent should run.
    ///
    /// `meta` is the engine-supplied execution metadata and `agent_id`
    /// identifies the agent being evaluated (for `memory` rules).
    pub fn evaluate(
        &self,
        conditions: Option<&ConditionSet>,
        blackboard: &Blackboard,
        meta: &HashMap<String, Value>,
        agent_id: &str,
    ) -> bool {
        let Some(conditions) = conditions else {
            return true;
        };
        if conditions.rules.is_empty() {
            return true;
        }

        let mut results = conditions
            .rules
            .iter()
            .map(|rule| self.evaluate_rule(rule, blackboard, meta, agent_id));

        match conditions.mode {
            ConditionMode::All => results.all(|passed| passed),
            ConditionMode::Any => results.any(|passed| passed),
        }
    }

    fn evaluate_rule(
        &self,
        rule: &ConditionRule,
        blackboard: &Blackboard,
        meta: &HashMap<String, Value>,
        agent_id: &str,
    ) -> bool {
        let (actual, key_exists) = self.resolve(rule, blackboard, meta, agent_id);
        self.compare(actual.as_ref(), &rule.op, rule.value.as_ref(), rule, key_exists)
    }

    /// Extract the value and key existence from the rule's source.
    ///
    /// `key_exists` is true when the key is present in the source container
    /// regardless of its value — the `present` operator keys off it.
    fn resolve(
        &self,
        rule: &ConditionRule,
        blackboard: &Blackboard,
        meta: &HashMap<String, Value>,
        agent_id: &str,
    ) -> (Option<Value>, bool) {
        if let Some(key) = &rule.var {
            let exists = blackboard.has_var(key);
            return (blackboard.get_var(key).cloned(), exists);
        }

        if let Some(fact_type) = &rule.fact {
            let fact = blackboard.get_fact(fact_type, rule.fact_key.as_deref());
            let exists = fact.is_some();
            return (fact.map(|f| f.value.clone()), exists);
        }

        if let Some(queue) = &rule.queue {
            let exists = blackboard.has_queue(queue);
            let items = blackboard.queues.get(queue).cloned().unwrap_or_default();
            return (Some(Value::Array(items)), exists);
        }

        if let Some(key) = &rule.memory {
            // A dotted key reads another agent's namespace: "other.counter".
            let (owner, mem_key) = match key.split_once('.') {
                Some((owner, mem_key)) => (owner, mem_key),
                None => (agent_id, key.as_str()),
            };
            let namespace = blackboard.memory_of(owner);
            let exists = namespace.map(|m| m.contains_key(mem_key)).unwrap_or(false);
            return (
                namespace.and_then(|m| m.get(mem_key)).cloned(),
                exists,
            );
        }

        if let Some(key) = &rule.meta {
            let exists = meta.contains_key(key);
            return (meta.get(key).cloned(), exists);
        }

        (None, false)
    }

    /// Compare the actual value against the expected one.
    ///
    /// Never panics; type mismatches and invalid operations return `false`,
    /// unknown operators return `true`.
    fn compare(
        &self,
        actual: Option<&Value>,
        op: &str,
        expected: Option<&Value>,
        rule: &ConditionRule,
        key_exists: bool,
    ) -> bool {
        match op {
            "eq" => values_equal(actual.unwrap_or(&Value::Null), expected.unwrap_or(&Value::Null)),
            "neq" => !values_equal(actual.unwrap_or(&Value::Null), expected.unwrap_or(&Value::Null)),

            "gt" => numeric_cmp(actual, expected).map(|o| o == std::cmp::Ordering::Greater).unwrap_or(false),
            "gte" => numeric_cmp(actual, expected).map(|o| o != std::cmp::Ordering::Less).unwrap_or(false),
            "lt" => numeric_cmp(actual, expected).map(|o| o == std::cmp::Ordering::Less).unwrap_or(false),
            "lte" => numeric_cmp(actual, expected).map(|o| o != std::cmp::Ordering::Greater).unwrap_or(false),

            "in" => match expected {
                Some(Value::Array(list)) if !list.is_empty() => {
                    let actual = actual.unwrap_or(&Value::Null);
                    list.iter().any(|item| values_equal(actual, item))
                }
                _ => false,
            },
            "not_in" => match expected {
                Some(Value::Array(list)) if !list.is_empty() => {
                    let actual = actual.unwrap_or(&Value::Null);
                    !list.iter().any(|item| values_equal(actual, item))
                }
                _ => true,
            },

            "contains" => match (actual, expected) {
                (Some(Value::Array(list)), Some(needle)) => {
                    list.iter().any(|item| values_equal(item, needle))
                }
                (Some(Value::String(haystack)), Some(Value::String(needle))) => {
                    haystack.contains(needle.as_str())
                }
                (Some(Value::Object(map)), Some(Value::String(key))) => map.contains_key(key),
                _ => false,
            },

            "exists" => actual.map(truthy).unwrap_or(false),
            "present" => key_exists,
            "not_exists" => !actual.map(truthy).unwrap_or(false),

            "not_empty" => actual.map(truthy).unwrap_or(false),
            "empty" => !actual.map(truthy).unwrap_or(false),

            "mod" => {
                let remainder = rule.result.unwrap_or(0);
                match (actual.and_then(Value::as_i64), expected.and_then(Value::as_i64)) {
                    (Some(a), Some(e)) if e != 0 => a % e == remainder,
                    _ => false,
                }
            }

            other => {
                log::warn!("Unknown condition operator: {}", other);
                true
            }
        }
    }
}

/// Truthiness in the source system's sense: null, false, zero, empty string,
/// empty array, and empty object are all falsy.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Equality with numeric normalization, so `1` and `1.0` compare equal the
/// way they do in the JSON payloads agents emit.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

/// Promote both sides to f64 and compare. `None` (missing or null actual)
/// makes every ordering comparison fail.
fn numeric_cmp(actual: Option<&Value>, expected: Option<&Value>) -> Option<std::cmp::Ordering> {
    let a = actual?.as_f64()?;
    let e = expected?.as_f64()?;
    a.partial_cmp(&e)
}
