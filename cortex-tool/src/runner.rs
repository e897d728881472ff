//! Validated, deadline-bounded tool invocation.

use crate::registry::ToolDyn;
use crate::validate::validate_args;
use crate::ToolError;
use cortex_types::{CallContext, TaskId, TenantId};
use std::sync::Arc;
use std::time::Duration;

/// Per-call context handed to every tool invocation.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// The tenant this call runs on behalf of.
    pub tenant: TenantId,
    /// The task that triggered the call, when there is one.
    pub task_id: Option<TaskId>,
    /// Cancellation and deadline for this call.
    pub call: CallContext,
}

impl ToolContext {
    /// Context with no task and a background call context.
    pub fn new(tenant: TenantId) -> Self {
        Self {
            tenant,
            task_id: None,
            call: CallContext::background(),
        }
    }

    /// Attach the triggering task.
    pub fn with_task(mut self, task_id: TaskId) -> Self {
        self.task_id = Some(task_id);
        self
    }

    /// Replace the call context.
    pub fn with_call(mut self, call: CallContext) -> Self {
        self.call = call;
        self
    }
}

/// Runs tools: validates arguments, enforces the per-call budget, honors
/// cancellation, and re-runs a retryable tool at most once.
#[derive(Debug, Clone)]
pub struct ToolRunner {
    /// Ceiling on a single tool call; the caller's deadline tightens it.
    pub call_timeout: Duration,
}

impl ToolRunner {
    /// Create a runner with the given per-call ceiling.
    pub fn new(call_timeout: Duration) -> Self {
        Self { call_timeout }
    }

    /// Validate `args` against the tool's schema and invoke it.
    ///
    /// On an invocation failure of a tool declared retryable, the call is
    /// re-run exactly once; validation failures, timeouts, and
    /// cancellations are never retried.
    pub async fn run(
        &self,
        tool: &Arc<dyn ToolDyn>,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<serde_json::Value, ToolError> {
        validate_args(&tool.params_schema(), &args)?;

        let first = self.attempt(tool, args.clone(), ctx).await;
        match first {
            Err(ToolError::Invocation { ref message, .. }) if tool.retryable() => {
                tracing::debug!(tool = tool.name(), error = %message, "retrying tool once");
                self.attempt(tool, args, ctx).await
            }
            other => other,
        }
    }

    async fn attempt(
        &self,
        tool: &Arc<dyn ToolDyn>,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<serde_json::Value, ToolError> {
        if ctx.call.is_cancelled() {
            return Err(ToolError::Cancelled);
        }
        let budget = ctx.call.budget(self.call_timeout);
        tokio::select! {
            biased;
            _ = ctx.call.cancelled() => Err(ToolError::Cancelled),
            result = tokio::time::timeout(budget, tool.invoke(args, ctx.clone())) => {
                match result {
                    Ok(inner) => inner,
                    Err(_) => Err(ToolError::Timeout),
                }
            }
        }
    }
}

impl Default for ToolRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}
