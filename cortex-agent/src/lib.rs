#![deny(missing_docs)]
//! The agent runtime.
//!
//! An [`Agent`] owns its tenant binding, capabilities, system prompt,
//! optional bounded memory, optional tools, and a model. It executes one
//! task at a time: assemble a prompt from system prompt + relevant
//! memories + session history under an approximate token budget, then run
//! the bounded tool loop against the injected gateway, then (optionally)
//! record an episodic memory of the outcome.
//!
//! Status is a small state machine — Idle, Running, Paused, Error — and
//! every exit path from `execute` restores Idle via an RAII guard, so an
//! agent can never be left stuck Running. Error is entered only on an
//! internal invariant breach and is terminal until an external
//! [`Agent::reset`].

pub mod agent;
pub mod embedder;
pub mod prompt;

pub use agent::{Agent, AgentConfig, AgentStatus, TaskOutcome};
pub use embedder::GatewayEmbedder;
