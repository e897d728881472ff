//! The agent: one task at a time through the tool loop.

use crate::prompt::{assemble, PromptParts};
use cortex_gateway::{
    ChatMessage, FunctionSpec, GenerateRequest, ModelGateway, TokenUsage,
};
use cortex_memory::{BoundedMemory, MemoryClass, MemoryItem};
use cortex_tool::{ToolContext, ToolError, ToolRegistry, ToolRunner};
use cortex_types::{
    CallContext, Capability, Component, Error, ErrorKind, Message, SessionId, Task, TaskId,
    TaskStatus, TenantId,
};
use rust_decimal::Decimal;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::Arc;

/// Agent status. Running is never observable after `execute` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    /// Ready for a task.
    Idle,
    /// Executing a task.
    Running,
    /// Administratively paused; tasks are refused.
    Paused,
    /// Internal invariant breach; terminal until [`Agent::reset`].
    Error,
}

/// Static agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// The agent's id.
    pub id: cortex_types::AgentId,
    /// The tenant this agent belongs to. Tasks from any other tenant are
    /// refused.
    pub tenant: TenantId,
    /// Advertised capabilities.
    pub capabilities: Vec<Capability>,
    /// Base system prompt.
    pub system_prompt: String,
    /// Model used for every turn.
    pub model: String,
    /// Maximum tool rounds per task.
    pub max_tool_iterations: u32,
    /// Approximate token budget for the assembled prompt context.
    pub system_prompt_max_tokens: u32,
    /// How many memories to retrieve into context.
    pub memory_context_items: usize,
    /// Inbox capacity; the oldest message is dropped beyond it.
    pub inbox_bound: usize,
    /// Whether to record an episodic memory after each completed task.
    pub write_episodic: bool,
}

impl AgentConfig {
    /// Config with the documented defaults.
    pub fn new(
        id: impl Into<cortex_types::AgentId>,
        tenant: impl Into<TenantId>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            tenant: tenant.into(),
            capabilities: vec![],
            system_prompt: String::new(),
            model: model.into(),
            max_tool_iterations: 10,
            system_prompt_max_tokens: 4096,
            memory_context_items: 5,
            inbox_bound: 64,
            write_episodic: true,
        }
    }

    /// Set the system prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Advertise a capability.
    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }

    /// Override the tool-iteration bound.
    pub fn with_max_tool_iterations(mut self, max: u32) -> Self {
        self.max_tool_iterations = max;
        self
    }
}

/// The result of a completed task.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    /// The task that ran.
    pub task_id: TaskId,
    /// Terminal status (always `Completed` on the `Ok` path).
    pub status: TaskStatus,
    /// Final model text.
    pub text: String,
    /// Aggregate token usage across all turns.
    pub tokens: TokenUsage,
    /// Aggregate cost across all turns.
    pub cost: Decimal,
    /// Model turns taken.
    pub turns: u32,
    /// Tool invocations made.
    pub tool_invocations: u32,
}

/// A queued task ordered by priority (desc), then age (asc), then
/// submission order.
struct QueuedTask {
    task: Task,
    seq: u64,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.task.priority == other.task.priority
            && self.task.created_at == other.task.created_at
            && self.seq == other.seq
    }
}
impl Eq for QueuedTask {}
impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.task
            .priority
            .cmp(&other.task.priority)
            .then_with(|| other.task.created_at.cmp(&self.task.created_at))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Restores Idle on every exit path that left the agent Running.
struct RunGuard<'a> {
    status: &'a Mutex<AgentStatus>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let mut status = self.status.lock().expect("agent status lock");
        if *status == AgentStatus::Running {
            *status = AgentStatus::Idle;
        }
    }
}

/// An agent. Shared as `Arc<Agent>`; the manager holds the owning
/// reference and everything else refers to it by id.
pub struct Agent {
    config: AgentConfig,
    gateway: Arc<dyn ModelGateway>,
    memory: Option<Arc<BoundedMemory>>,
    tools: Option<Arc<ToolRegistry>>,
    runner: ToolRunner,
    status: Mutex<AgentStatus>,
    queue: Mutex<BinaryHeap<QueuedTask>>,
    queue_seq: Mutex<u64>,
    inbox: Mutex<VecDeque<Message>>,
    sessions: Mutex<HashMap<SessionId, Vec<ChatMessage>>>,
    exec: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent").field("config", &self.config).finish()
    }
}

impl Agent {
    /// Create an agent with no memory and no tools.
    pub fn new(config: AgentConfig, gateway: Arc<dyn ModelGateway>) -> Self {
        Self {
            config,
            gateway,
            memory: None,
            tools: None,
            runner: ToolRunner::default(),
            status: Mutex::new(AgentStatus::Idle),
            queue: Mutex::new(BinaryHeap::new()),
            queue_seq: Mutex::new(0),
            inbox: Mutex::new(VecDeque::new()),
            sessions: Mutex::new(HashMap::new()),
            exec: tokio::sync::Mutex::new(()),
        }
    }

    /// Attach bounded memory.
    pub fn with_memory(mut self, memory: Arc<BoundedMemory>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Attach tools.
    pub fn with_tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Replace the tool runner (e.g. to change the per-call timeout).
    pub fn with_runner(mut self, runner: ToolRunner) -> Self {
        self.runner = runner;
        self
    }

    /// The agent's id.
    pub fn id(&self) -> &cortex_types::AgentId {
        &self.config.id
    }

    /// The agent's tenant.
    pub fn tenant(&self) -> &TenantId {
        &self.config.tenant
    }

    /// Advertised capabilities.
    pub fn capabilities(&self) -> &[Capability] {
        &self.config.capabilities
    }

    /// Whether the agent advertises `name`.
    pub fn has_capability(&self, name: &str) -> bool {
        self.config.capabilities.iter().any(|c| c.name == name)
    }

    /// Current status.
    pub fn status(&self) -> AgentStatus {
        *self.status.lock().expect("agent status lock")
    }

    /// Pause an idle agent. Running tasks are unaffected; new ones are
    /// refused until [`Agent::resume`].
    pub fn pause(&self) {
        let mut status = self.status.lock().expect("agent status lock");
        if *status == AgentStatus::Idle {
            *status = AgentStatus::Paused;
        }
    }

    /// Resume a paused agent.
    pub fn resume(&self) {
        let mut status = self.status.lock().expect("agent status lock");
        if *status == AgentStatus::Paused {
            *status = AgentStatus::Idle;
        }
    }

    /// Externally reset an agent out of the terminal Error state.
    pub fn reset(&self) {
        let mut status = self.status.lock().expect("agent status lock");
        if *status == AgentStatus::Error {
            *status = AgentStatus::Idle;
        }
    }

    // ── Task queue ───────────────────────────────────────────────

    /// Enqueue a task for later execution in priority order.
    pub fn submit(&self, task: Task) -> Result<(), Error> {
        if task.tenant != self.config.tenant {
            return Err(self.tenant_mismatch(&task));
        }
        let mut seq = self.queue_seq.lock().expect("agent seq lock");
        *seq += 1;
        self.queue
            .lock()
            .expect("agent queue lock")
            .push(QueuedTask { task, seq: *seq });
        Ok(())
    }

    /// Number of queued tasks.
    pub fn queued(&self) -> usize {
        self.queue.lock().expect("agent queue lock").len()
    }

    /// Execute the highest-priority queued task, if any.
    pub async fn run_next(&self, ctx: &CallContext) -> Option<Result<TaskOutcome, Error>> {
        let next = self.queue.lock().expect("agent queue lock").pop()?;
        Some(self.execute(next.task, ctx).await)
    }

    // ── Inbox ────────────────────────────────────────────────────

    /// Deliver a message. Returns the dropped message when the inbox was
    /// full (at-most-once, drop-oldest back-pressure).
    pub fn deliver(&self, message: Message) -> Option<Message> {
        let mut inbox = self.inbox.lock().expect("agent inbox lock");
        let dropped = if inbox.len() >= self.config.inbox_bound {
            inbox.pop_front()
        } else {
            None
        };
        inbox.push_back(message);
        if let Some(dropped) = &dropped {
            tracing::warn!(
                agent = %self.config.id,
                from = %dropped.from,
                kind = %dropped.kind,
                "inbox full, dropped oldest message"
            );
        }
        dropped
    }

    /// Drain all pending messages.
    pub fn take_messages(&self) -> Vec<Message> {
        self.inbox
            .lock()
            .expect("agent inbox lock")
            .drain(..)
            .collect()
    }

    // ── Execution ────────────────────────────────────────────────

    /// Execute one task to completion (the critical path).
    ///
    /// Tasks execute strictly one at a time; concurrent callers queue on
    /// an internal lock. Every exit path restores the agent to Idle —
    /// failures are reported in the returned error, with the failing
    /// stage in the message.
    pub async fn execute(&self, task: Task, ctx: &CallContext) -> Result<TaskOutcome, Error> {
        if task.tenant != self.config.tenant {
            return Err(self.tenant_mismatch(&task));
        }

        let _exec = self.exec.lock().await;

        {
            let mut status = self.status.lock().expect("agent status lock");
            match *status {
                AgentStatus::Idle => *status = AgentStatus::Running,
                AgentStatus::Paused => {
                    return Err(self.stage_err(
                        "admission",
                        &task,
                        Error::new(ErrorKind::InvalidRequest, Component::Agent, "agent is paused"),
                    ));
                }
                AgentStatus::Error => {
                    return Err(self.stage_err(
                        "admission",
                        &task,
                        Error::new(
                            ErrorKind::InvariantBroken,
                            Component::Agent,
                            "agent is in a terminal error state",
                        ),
                    ));
                }
                AgentStatus::Running => {
                    // The exec lock makes this unreachable; seeing it means
                    // the state machine itself is broken.
                    *status = AgentStatus::Error;
                    return Err(Error::invariant(Component::Agent, "status Running without lock"));
                }
            }
        }
        let _guard = RunGuard { status: &self.status };

        // Fail fast before assembling anything.
        if self.gateway.circuit_open(&self.config.model) {
            return Err(self.stage_err(
                "admission",
                &task,
                Error::new(
                    ErrorKind::CircuitOpen,
                    Component::Agent,
                    format!("circuit open for model {}", self.config.model),
                ),
            ));
        }

        let prompt = task.prompt().ok_or_else(|| {
            self.stage_err(
                "prompt",
                &task,
                Error::new(
                    ErrorKind::InvalidRequest,
                    Component::Agent,
                    "task has no `prompt` parameter",
                ),
            )
        })?;

        // Memory retrieval failures degrade to an empty context.
        let memories = match &self.memory {
            Some(memory) => memory
                .retrieve(prompt, None, self.config.memory_context_items)
                .await
                .unwrap_or_else(|e| {
                    tracing::debug!(agent = %self.config.id, error = %e, "memory retrieval failed");
                    vec![]
                }),
            None => vec![],
        };

        let history = match &task.session {
            Some(session) => self
                .sessions
                .lock()
                .expect("agent sessions lock")
                .get(session)
                .cloned()
                .unwrap_or_default(),
            None => vec![],
        };

        let mut messages = assemble(PromptParts {
            system_prompt: &self.config.system_prompt,
            memories,
            history,
            user_prompt: prompt,
            budget_tokens: self.config.system_prompt_max_tokens,
        });

        let functions: Vec<FunctionSpec> = match &self.tools {
            Some(tools) => tools
                .iter()
                .map(|t| FunctionSpec {
                    name: t.name().to_string(),
                    description: t.description().to_string(),
                    parameters: t.params_schema(),
                })
                .collect(),
            None => vec![],
        };

        let mut tokens = TokenUsage::default();
        let mut cost = Decimal::ZERO;
        let mut turns: u32 = 0;
        let mut tool_invocations: u32 = 0;

        let final_text = loop {
            if ctx.is_cancelled() {
                return Err(self.stage_err("loop", &task, Error::cancelled(Component::Agent)));
            }
            turns += 1;

            let request = GenerateRequest::new(
                self.config.tenant.clone(),
                self.config.model.clone(),
                messages.clone(),
            )
            .with_functions(functions.clone());

            let response = self
                .gateway
                .generate(request, ctx)
                .await
                .map_err(|e| self.stage_err("generate", &task, e))?;

            tokens = TokenUsage::new(
                tokens.prompt + response.tokens.prompt,
                tokens.completion + response.tokens.completion,
            );
            cost += response.cost_estimate;

            if response.tool_calls.is_empty() || turns > self.config.max_tool_iterations {
                break response.text;
            }

            messages.push(ChatMessage::assistant_with_calls(
                response.text.clone(),
                response.tool_calls.clone(),
            ));

            let tool_ctx = ToolContext::new(self.config.tenant.clone())
                .with_task(task.id.clone())
                .with_call(ctx.clone());

            for call in response.tool_calls {
                let content = self.run_tool(&call.name, call.arguments, &tool_ctx).await;
                let content = match content {
                    Ok(value) => value,
                    Err(e) if matches!(e, ToolError::Cancelled) => {
                        return Err(self.stage_err(
                            "tool",
                            &task,
                            Error::cancelled(Component::Agent),
                        ));
                    }
                    // Every other tool failure goes back to the model as a
                    // tool-role message; it may recover.
                    Err(e) => format!("error: {e}"),
                };
                tool_invocations += 1;
                messages.push(ChatMessage::tool(call.id, content));
            }
        };

        if self.config.write_episodic {
            if let Some(memory) = &self.memory {
                let item = MemoryItem::new(
                    format!("episode:{}", task.id),
                    MemoryClass::Episodic,
                    final_text.clone(),
                )
                .with_importance(0.7)
                .with_tag(task.task_type.clone())
                .with_tag(format!("task:{}", task.id));
                if let Err(e) = memory.store(item).await {
                    tracing::debug!(agent = %self.config.id, error = %e, "episodic write failed");
                }
            }
        }

        if let Some(session) = &task.session {
            let mut sessions = self.sessions.lock().expect("agent sessions lock");
            let history = sessions.entry(session.clone()).or_default();
            history.push(ChatMessage::user(prompt));
            history.push(ChatMessage::assistant(final_text.clone()));
            // Bound per-session history; context assembly trims further.
            while history.len() > 100 {
                history.remove(0);
            }
        }

        Ok(TaskOutcome {
            task_id: task.id,
            status: TaskStatus::Completed,
            text: final_text,
            tokens,
            cost,
            turns,
            tool_invocations,
        })
    }

    async fn run_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<String, ToolError> {
        let tools = match &self.tools {
            Some(tools) => tools,
            None => return Err(ToolError::NotFound(name.to_string())),
        };
        let tool = tools.resolve(name)?;
        let value = self.runner.run(tool, arguments, ctx).await?;
        Ok(value.to_string())
    }

    fn tenant_mismatch(&self, task: &Task) -> Error {
        Error::new(
            ErrorKind::TenantMismatch,
            Component::Agent,
            format!(
                "task tenant `{}` does not match agent tenant `{}`",
                task.tenant, self.config.tenant
            ),
        )
        .with_tenant(task.tenant.clone())
        .with_task(task.id.clone())
    }

    /// Re-envelope a failure with the execution stage it happened in.
    fn stage_err(&self, stage: &str, task: &Task, e: Error) -> Error {
        Error {
            component: Component::Agent,
            message: format!("execute[{stage}]: {}", e.message),
            tenant: Some(self.config.tenant.clone()),
            task_id: Some(task.id.clone()),
            ..e
        }
    }
}
