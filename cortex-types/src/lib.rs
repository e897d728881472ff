//! # cortex-types — data model and cross-cutting primitives
//!
//! The foundational crate of the cortex runtime. Every other crate in the
//! workspace depends on this one and nothing here depends on any of them.
//!
//! | Module | What it holds |
//! |--------|---------------|
//! | [`id`] | Typed id newtypes ([`TenantId`], [`AgentId`], [`TaskId`], ...) |
//! | [`task`] | [`Task`], [`TaskStatus`], [`Message`], [`Capability`] |
//! | [`error`] | The error envelope: [`Error`], [`ErrorKind`], [`ErrorClass`] |
//! | [`ctx`] | [`CallContext`] — cancellation token + deadline, threaded everywhere |
//! | [`clock`] | [`Clock`] — injectable monotonic time source |
//! | [`duration`] | [`DurationMs`] — wire-stable millisecond duration |
//! | [`fingerprint`] | SHA-256 [`Fingerprint`] over canonical JSON |
//! | [`estimate`] | Coarse token estimation shared by limiter and prompt budget |
//!
//! ## Design Principle
//!
//! Every externally-visible operation in the runtime carries a [`TenantId`]
//! and a [`CallContext`]. Absence of a tenant is a programmer error and is
//! refused with [`ErrorKind::InvalidRequest`]; absence of a context means
//! the operation cannot be cancelled, which no public entry point allows.
//!
//! Errors are values, not exceptions: a single envelope type carries
//! `{kind, component, message, tenant, task_id, retryable}` so that callers
//! at any layer can decide whether to retry without downcasting.

#![deny(missing_docs)]

pub mod clock;
pub mod ctx;
pub mod duration;
pub mod error;
pub mod estimate;
pub mod fingerprint;
pub mod id;
pub mod task;

#[cfg(feature = "test-utils")]
pub mod test_utils;

// Re-exports for convenience
pub use clock::{Clock, SystemClock};
pub use ctx::CallContext;
pub use duration::DurationMs;
pub use error::{Component, Error, ErrorClass, ErrorKind};
pub use estimate::{approx_tokens, approx_tokens_for_chars};
pub use fingerprint::Fingerprint;
pub use id::{AgentId, ProviderId, SessionId, StepId, TaskId, TenantId, WorkflowId};
pub use task::{Capability, Message, RetryPolicy, Task, TaskStatus};
