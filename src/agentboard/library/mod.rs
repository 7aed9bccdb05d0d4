//! Ready-made agent implementations.
//!
//! The engine schedules anything implementing
//! [`Agent`](crate::agentboard::agent::Agent); this module ships the
//! workhorse: a fully config-driven agent whose persona, triggers, and output
//! format all come from plain data.

pub mod dynamic;

pub use dynamic::{DynamicAgent, PersonaConfig};
