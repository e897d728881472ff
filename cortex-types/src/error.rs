//! The error envelope shared by every component.
//!
//! One struct, one taxonomy. Component crates may keep richer internal
//! error enums (the tool runner does), but everything that crosses a
//! public API boundary is an [`Error`] carrying
//! `{kind, component, message, tenant, task_id, retryable}` so callers can
//! decide on retry without downcasting.

use crate::id::{TaskId, TenantId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse grouping of [`ErrorKind`]s. Drives default retryability and the
/// documented HTTP mapping for wrapping shells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Local, surfaced to the caller, never retried.
    Validation,
    /// Load shedding; the caller may retry with backoff.
    Resource,
    /// A downstream dependency is unavailable or slow.
    Availability,
    /// Misconfiguration: a named thing does not exist.
    Logic,
    /// Invariant breach or cooperative cancellation.
    Internal,
}

/// Every failure the runtime can surface.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The request is malformed (missing tenant, empty model, ...).
    InvalidRequest,
    /// Tool arguments failed schema validation.
    ToolValidation,
    /// The workflow definition is invalid (cycle, duplicate or unknown step).
    WorkflowInvalid,
    /// A task was routed to an agent owned by a different tenant.
    TenantMismatch,
    /// The local rate limiter refused or timed out the acquisition.
    RateLimited,
    /// An agent inbox was full and shed load.
    InboxFull,
    /// Memory is above its pressure threshold and refused a store.
    MemoryPressure,
    /// The circuit breaker for the target provider is open.
    CircuitOpen,
    /// The provider failed in a way retries did not cure.
    ProviderUnavailable,
    /// A deadline elapsed (gateway call, tool call, or workflow step).
    Timeout,
    /// The tool itself failed while executing.
    ToolInvocation,
    /// No tool with the requested name exists in the registry.
    ToolNotFound,
    /// No agent with the requested id is registered.
    UnknownAgent,
    /// No workflow with the requested id exists.
    UnknownWorkflow,
    /// An internal invariant was broken; the component is now terminal.
    InvariantBroken,
    /// The operation was cancelled cooperatively. Not a failure in
    /// orchestrator accounting.
    Cancelled,
}

impl ErrorKind {
    /// The taxonomy group this kind belongs to.
    pub fn class(self) -> ErrorClass {
        match self {
            Self::InvalidRequest
            | Self::ToolValidation
            | Self::WorkflowInvalid
            | Self::TenantMismatch => ErrorClass::Validation,
            Self::RateLimited | Self::InboxFull | Self::MemoryPressure => ErrorClass::Resource,
            Self::CircuitOpen
            | Self::ProviderUnavailable
            | Self::Timeout
            | Self::ToolInvocation => ErrorClass::Availability,
            Self::ToolNotFound | Self::UnknownAgent | Self::UnknownWorkflow => ErrorClass::Logic,
            Self::InvariantBroken | Self::Cancelled => ErrorClass::Internal,
        }
    }

    /// Whether a caller should consider retrying by default. Individual
    /// errors can override this at construction.
    pub fn default_retryable(self) -> bool {
        matches!(
            self.class(),
            ErrorClass::Resource | ErrorClass::Availability
        ) && self != Self::CircuitOpen
            // The tool's own declaration decides; callers set it explicitly.
            && self != Self::ToolInvocation
    }

    /// The HTTP status a REST shell should map this kind to. The core has
    /// no HTTP dependency; this is documentation made executable.
    pub fn http_status(self) -> u16 {
        match self {
            Self::InvalidRequest | Self::TenantMismatch => 400,
            Self::ToolValidation | Self::WorkflowInvalid => 422,
            Self::RateLimited | Self::InboxFull | Self::MemoryPressure => 429,
            Self::CircuitOpen | Self::ProviderUnavailable => 503,
            Self::Timeout => 504,
            Self::ToolInvocation => 500,
            Self::ToolNotFound | Self::UnknownAgent | Self::UnknownWorkflow => 404,
            Self::InvariantBroken | Self::Cancelled => 500,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InvalidRequest => "invalid_request",
            Self::ToolValidation => "tool_validation",
            Self::WorkflowInvalid => "workflow_invalid",
            Self::TenantMismatch => "tenant_mismatch",
            Self::RateLimited => "rate_limited",
            Self::InboxFull => "inbox_full",
            Self::MemoryPressure => "memory_pressure",
            Self::CircuitOpen => "circuit_open",
            Self::ProviderUnavailable => "provider_unavailable",
            Self::Timeout => "timeout",
            Self::ToolInvocation => "tool_invocation",
            Self::ToolNotFound => "tool_not_found",
            Self::UnknownAgent => "unknown_agent",
            Self::UnknownWorkflow => "unknown_workflow",
            Self::InvariantBroken => "invariant_broken",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// The component that produced an error.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    /// Per-tenant token bucket.
    RateLimiter,
    /// Per-provider breaker.
    CircuitBreaker,
    /// Request coalescing.
    Deduper,
    /// Bounded memory store.
    Memory,
    /// Tool registry / runner.
    Tool,
    /// Model gateway.
    Gateway,
    /// Agent runtime.
    Agent,
    /// Agent registry and message routing.
    Manager,
    /// Workflow runner.
    Orchestrator,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RateLimiter => "rate_limiter",
            Self::CircuitBreaker => "circuit_breaker",
            Self::Deduper => "deduper",
            Self::Memory => "memory",
            Self::Tool => "tool",
            Self::Gateway => "gateway",
            Self::Agent => "agent",
            Self::Manager => "manager",
            Self::Orchestrator => "orchestrator",
        };
        f.write_str(s)
    }
}

/// The error envelope. Construct with [`Error::new`] and the builder-style
/// `with_*` methods; kind-specific shorthands cover the common cases.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[error("{component}: {kind}: {message}")]
pub struct Error {
    /// What went wrong.
    pub kind: ErrorKind,
    /// Which component it went wrong in.
    pub component: Component,
    /// Human-readable detail.
    pub message: String,
    /// The tenant on whose behalf the operation ran, when known.
    pub tenant: Option<TenantId>,
    /// The task being executed, when known.
    pub task_id: Option<TaskId>,
    /// Whether the caller may reasonably retry.
    pub retryable: bool,
}

impl Error {
    /// Create an error with the kind's default retryability.
    pub fn new(kind: ErrorKind, component: Component, message: impl Into<String>) -> Self {
        Self {
            kind,
            component,
            message: message.into(),
            tenant: None,
            task_id: None,
            retryable: kind.default_retryable(),
        }
    }

    /// Attach the tenant.
    pub fn with_tenant(mut self, tenant: TenantId) -> Self {
        self.tenant = Some(tenant);
        self
    }

    /// Attach the task id.
    pub fn with_task(mut self, task_id: TaskId) -> Self {
        self.task_id = Some(task_id);
        self
    }

    /// Override retryability.
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Shorthand for cooperative cancellation.
    pub fn cancelled(component: Component) -> Self {
        Self::new(ErrorKind::Cancelled, component, "operation cancelled")
    }

    /// Shorthand for an elapsed deadline.
    pub fn timeout(component: Component, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, component, message)
    }

    /// Shorthand for an invariant breach. Always non-retryable.
    pub fn invariant(component: Component, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvariantBroken, component, message)
    }

    /// Whether this error is a cooperative cancellation.
    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }
}
