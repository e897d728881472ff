//! Gateway wire types — the internal lingua franca between agents, the
//! gateway, and providers. Provider adapters convert to and from their
//! native formats at the boundary.

use cortex_types::{approx_tokens_for_chars, TenantId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// Instructions from the runtime.
    System,
    /// End-user (or upstream agent) content.
    User,
    /// Model output.
    Assistant,
    /// A tool result fed back to the model.
    Tool,
}

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author role.
    pub role: ChatRole,
    /// Text content.
    pub content: String,
    /// For `Tool` messages, the id of the tool call this answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// For `Assistant` messages, the tool calls the model made in this
    /// turn. Providers adapt this to their native format.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
}

impl ChatMessage {
    /// A system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
            tool_call_id: None,
            tool_calls: vec![],
        }
    }

    /// A user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            tool_call_id: None,
            tool_calls: vec![],
        }
    }

    /// An assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            tool_call_id: None,
            tool_calls: vec![],
        }
    }

    /// An assistant message that carries tool calls.
    pub fn assistant_with_calls(
        content: impl Into<String>,
        tool_calls: Vec<ToolCallRequest>,
    ) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            tool_call_id: None,
            tool_calls,
        }
    }

    /// A tool-result message answering `tool_call_id`.
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
            tool_calls: vec![],
        }
    }
}

/// A callable function advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    /// Function name.
    pub name: String,
    /// What it does, for the model.
    pub description: String,
    /// JSON Schema of the argument object.
    pub parameters: serde_json::Value,
}

/// A tool call the model asked for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Provider-assigned call id, echoed back in the tool message.
    pub id: String,
    /// Function name to invoke.
    pub name: String,
    /// Argument object.
    pub arguments: serde_json::Value,
}

/// Request for one model completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// Mandatory tenant; requests without one are refused.
    pub tenant: TenantId,
    /// Model identifier.
    pub model: String,
    /// Conversation so far.
    pub messages: Vec<ChatMessage>,
    /// Functions the model may call.
    #[serde(default)]
    pub functions: Vec<FunctionSpec>,
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Output token cap.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Streaming flag, passed through to the provider.
    #[serde(default)]
    pub stream: bool,
}

impl GenerateRequest {
    /// Build a request with just a tenant, model, and messages.
    pub fn new(
        tenant: impl Into<TenantId>,
        model: impl Into<String>,
        messages: Vec<ChatMessage>,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            model: model.into(),
            messages,
            functions: vec![],
            temperature: None,
            max_tokens: None,
            stream: false,
        }
    }

    /// Advertise functions.
    pub fn with_functions(mut self, functions: Vec<FunctionSpec>) -> Self {
        self.functions = functions;
        self
    }

    /// Set the temperature.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the output token cap.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Estimated prompt tokens (`max(1, chars/4)` over all messages),
    /// used for rate-limit accounting.
    pub fn estimated_tokens(&self) -> u32 {
        let chars: usize = self.messages.iter().map(|m| m.content.chars().count()).sum();
        approx_tokens_for_chars(chars)
    }
}

/// Why generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural completion.
    Stop,
    /// Output token cap reached.
    Length,
    /// The model wants tool results.
    Tool,
    /// Content safety filtering intervened.
    Filter,
    /// The provider reported an error inside an otherwise-shaped response.
    Error,
}

/// Token usage for one completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt-side tokens.
    pub prompt: u64,
    /// Completion-side tokens.
    pub completion: u64,
    /// Prompt + completion.
    pub total: u64,
}

impl TokenUsage {
    /// Build a usage record; `total` is derived.
    pub fn new(prompt: u64, completion: u64) -> Self {
        Self {
            prompt,
            completion,
            total: prompt + completion,
        }
    }
}

/// One model completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateResponse {
    /// Text output (may be empty when the model only called tools).
    pub text: String,
    /// Tool calls the model requested.
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRequest>,
    /// Token accounting.
    pub tokens: TokenUsage,
    /// Why generation stopped.
    pub finish_reason: FinishReason,
    /// The model that actually served the request.
    pub model: String,
    /// Provider-reported cost in USD.
    pub cost_estimate: Decimal,
}

/// Request for embeddings. Follows the same admission pipeline as
/// generation, with no tool-loop semantics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedRequest {
    /// Mandatory tenant.
    pub tenant: TenantId,
    /// Embedding model identifier.
    pub model: String,
    /// Texts to embed, one vector per text.
    pub texts: Vec<String>,
}
