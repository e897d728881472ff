#![deny(missing_docs)]
//! The model gateway — every model call in the runtime goes through here.
//!
//! The pipeline for [`Gateway::generate`], in order:
//!
//! 1. Request validation (tenant is mandatory).
//! 2. Fingerprint + dedupe: identical concurrent requests share one
//!    underlying call; recent results are served from cache.
//! 3. Circuit breaker for the model's provider.
//! 4. Per-tenant rate-limit acquisition.
//! 5. Provider invocation with classified-error retry under an explicit
//!    [`cortex_types::RetryPolicy`] and a total deadline.
//! 6. Output validation per configured [`ValidationLevel`].
//! 7. Usage accounting.
//!
//! Rate-limit acquisition strictly precedes provider invocation, and the
//! breaker serializes its own transitions, so a half-open provider sees at
//! most one probe.
//!
//! The external model service is out of scope: it appears only as the
//! object-safe [`ModelProvider`] trait. Agents and the orchestrator
//! receive the gateway as `Arc<dyn ModelGateway>` — constructed once and
//! injected, never global.

pub mod gateway;
pub mod provider;
pub mod types;
pub mod usage;

pub use gateway::{Gateway, GatewayConfig, ModelGateway, ValidationLevel};
pub use provider::{ModelProvider, ProviderError};
pub use types::{
    ChatMessage, ChatRole, EmbedRequest, FinishReason, FunctionSpec, GenerateRequest,
    GenerateResponse, TokenUsage, ToolCallRequest,
};
pub use usage::{CallOutcome, UsageLog, UsageRecord};
