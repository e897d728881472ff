#![deny(missing_docs)]
//! # cortex — umbrella crate
//!
//! A single import surface for the cortex runtime. Re-exports the member
//! crates behind feature flags, plus a `prelude` for the happy path:
//! build a [`cortex_gateway::Gateway`] around your provider, construct
//! agents, register them with a [`cortex_manager::Manager`], and run
//! tasks directly or through the [`cortex_orch::Orchestrator`].

#[cfg(feature = "core")]
pub use cortex_agent;
#[cfg(feature = "core")]
pub use cortex_gateway;
#[cfg(feature = "core")]
pub use cortex_guard;
#[cfg(feature = "orchestration")]
pub use cortex_manager;
#[cfg(feature = "core")]
pub use cortex_memory;
#[cfg(feature = "orchestration")]
pub use cortex_orch;
#[cfg(feature = "core")]
pub use cortex_tool;
#[cfg(feature = "core")]
pub use cortex_types;

/// Happy-path imports for composing a runtime.
pub mod prelude {
    #[cfg(feature = "core")]
    pub use cortex_types::{
        AgentId, CallContext, Capability, Error, ErrorKind, Message, RetryPolicy, SessionId,
        StepId, Task, TaskId, TaskStatus, TenantId, WorkflowId,
    };

    #[cfg(feature = "core")]
    pub use cortex_gateway::{
        ChatMessage, EmbedRequest, Gateway, GatewayConfig, GenerateRequest, GenerateResponse,
        ModelGateway, ModelProvider, ProviderError, ValidationLevel,
    };

    #[cfg(feature = "core")]
    pub use cortex_guard::{CircuitBreakerConfig, DeduperConfig, RateLimiterConfig};

    #[cfg(feature = "core")]
    pub use cortex_memory::{BoundedMemory, Embedder, MemoryClass, MemoryConfig, MemoryItem};

    #[cfg(feature = "core")]
    pub use cortex_tool::{FnTool, ToolContext, ToolDyn, ToolError, ToolRegistry, ToolRunner};

    #[cfg(feature = "core")]
    pub use cortex_agent::{Agent, AgentConfig, AgentStatus, TaskOutcome};

    #[cfg(feature = "orchestration")]
    pub use cortex_manager::{Delivery, Manager};

    #[cfg(feature = "orchestration")]
    pub use cortex_orch::{
        FailurePolicy, Orchestrator, StepCondition, Workflow, WorkflowConfig, WorkflowResult,
        WorkflowStatus, WorkflowStep,
    };
}
