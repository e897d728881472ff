//! Tasks, statuses, messages, and capabilities.

use crate::duration::DurationMs;
use crate::id::{AgentId, SessionId, TaskId, TenantId};
use serde::{Deserialize, Serialize};

/// Lifecycle of a submitted task. Monotone except `Pending → Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Accepted, not yet picked up.
    Pending,
    /// An agent is executing it.
    Running,
    /// Finished with a result.
    Completed,
    /// Finished with an error.
    Failed,
    /// Cancelled before or during execution.
    Cancelled,
}

impl TaskStatus {
    /// Whether the status is terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether a transition to `next` is legal. The lifecycle is monotone:
    /// Pending → Running → {Completed, Failed, Cancelled}, with the single
    /// shortcut Pending → Cancelled.
    pub fn can_transition(self, next: TaskStatus) -> bool {
        match (self, next) {
            (Self::Pending, Self::Running) | (Self::Pending, Self::Cancelled) => true,
            (Self::Running, Self::Completed)
            | (Self::Running, Self::Failed)
            | (Self::Running, Self::Cancelled) => true,
            _ => false,
        }
    }
}

/// A unit of work submitted to an agent. Immutable once submitted:
/// the runtime never mutates a task, it only reads it and reports status
/// through results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique id, assigned by the submitter.
    pub id: TaskId,
    /// Dispatch key: agents interpret the type (e.g. `"ask"`).
    #[serde(rename = "type")]
    pub task_type: String,
    /// Free-form parameters. By convention `params.prompt` carries the
    /// user-visible prompt for LLM-backed task types.
    pub params: serde_json::Value,
    /// Higher runs first; ties broken by `created_at` (older first).
    pub priority: i32,
    /// Monotonic milliseconds from the process clock at submission.
    pub created_at: u64,
    /// The tenant this task runs on behalf of.
    pub tenant: TenantId,
    /// Optional conversation session for history continuity.
    pub session: Option<SessionId>,
}

impl Task {
    /// Create a task with default priority and empty params.
    pub fn new(
        id: impl Into<TaskId>,
        task_type: impl Into<String>,
        tenant: impl Into<TenantId>,
        created_at: u64,
    ) -> Self {
        Self {
            id: id.into(),
            task_type: task_type.into(),
            params: serde_json::Value::Object(serde_json::Map::new()),
            priority: 0,
            created_at,
            tenant: tenant.into(),
            session: None,
        }
    }

    /// Set a parameter. Overwrites an existing key.
    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        if let serde_json::Value::Object(map) = &mut self.params {
            map.insert(key.into(), value);
        }
        self
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Attach a session.
    pub fn with_session(mut self, session: impl Into<SessionId>) -> Self {
        self.session = Some(session.into());
        self
    }

    /// Read a string parameter.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }

    /// The prompt parameter, when present.
    pub fn prompt(&self) -> Option<&str> {
        self.param_str("prompt")
    }
}

/// An agent-to-agent message, delivered at-most-once in-process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Sending agent.
    pub from: AgentId,
    /// Receiving agent.
    pub to: AgentId,
    /// Message kind, interpreted by the receiver.
    pub kind: String,
    /// Payload.
    pub body: serde_json::Value,
    /// Correlates a reply with its request, when the sender wants one.
    pub correlation_id: Option<String>,
}

impl Message {
    /// Create a message with no correlation id.
    pub fn new(
        from: impl Into<AgentId>,
        to: impl Into<AgentId>,
        kind: impl Into<String>,
        body: serde_json::Value,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            kind: kind.into(),
            body,
            correlation_id: None,
        }
    }

    /// Attach a correlation id.
    pub fn with_correlation(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }
}

/// A capability an agent advertises, used by the manager to find
/// candidates for a task type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    /// Capability name (e.g. `"summarize"`).
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON Schema of the parameters a task of this capability carries.
    pub params_schema: serde_json::Value,
}

impl Capability {
    /// Create a capability with an open schema.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params_schema: serde_json::json!({"type": "object"}),
        }
    }

    /// Replace the parameter schema.
    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.params_schema = schema;
        self
    }
}

/// Retry policy value passed explicitly where retries happen (gateway,
/// orchestrator steps). No wrapper/decorator control flow: the policy is
/// data, the loop that applies it is visible at the call site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Additional attempts after the first (0 = no retry).
    pub max_retries: u32,
    /// Base delay before the first retry.
    pub base: DurationMs,
    /// Upper bound on any single delay.
    pub cap: DurationMs,
    /// Whether to spread delays deterministically by attempt index.
    pub jitter: bool,
}

impl RetryPolicy {
    /// No retries at all.
    pub const NONE: Self = Self {
        max_retries: 0,
        base: DurationMs::ZERO,
        cap: DurationMs::ZERO,
        jitter: false,
    };

    /// The delay before retry attempt `attempt` (1-based). Exponential
    /// doubling from `base`, capped, with a deterministic stagger when
    /// jitter is on so concurrent retriers do not align.
    pub fn delay(&self, attempt: u32) -> std::time::Duration {
        if self.max_retries == 0 {
            return std::time::Duration::ZERO;
        }
        let exp = attempt.saturating_sub(1).min(16);
        let mut ms = self.base.as_millis().saturating_mul(1u64 << exp);
        ms = ms.min(self.cap.as_millis().max(self.base.as_millis()));
        if self.jitter {
            // Deterministic stagger in [0, ms/4): reproducible in tests,
            // still breaks alignment between attempt counters.
            let stagger = (attempt as u64).wrapping_mul(2654435761) % (ms / 4 + 1);
            ms += stagger;
        }
        std::time::Duration::from_millis(ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base: DurationMs::from_millis(200),
            cap: DurationMs::from_secs(5),
            jitter: true,
        }
    }
}
