//! The model provider boundary.
//!
//! Everything behind this trait — HTTP clients, retry-free SDK calls,
//! provider switching, tokenization — belongs to the external service.
//! The gateway sees typed results or a typed, classified error and makes
//! its retry and circuit-breaking decisions from the classification alone.

use crate::types::{GenerateRequest, GenerateResponse};
use async_trait::async_trait;
use cortex_types::{Component, Error, ErrorKind};
use thiserror::Error as ThisError;

/// Classified provider failure.
#[non_exhaustive]
#[derive(Debug, Clone, ThisError)]
pub enum ProviderError {
    /// Transient fault (connection reset, 5xx, overload). Retryable.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// The provider is broken for this request (bad model, auth).
    /// Retrying will not help.
    #[error("permanent provider error: {0}")]
    Permanent(String),

    /// The *remote* service rate-limited us. Distinct from the local
    /// limiter; does not count toward the circuit breaker.
    #[error("rate limited by provider")]
    RateLimitedRemote,

    /// The provider's safety layer rejected the request outright.
    #[error("content filtered by provider: {0}")]
    ContentFilter(String),

    /// The call exceeded its deadline.
    #[error("provider call timed out: {0}")]
    Timeout(String),
}

impl ProviderError {
    /// Whether the gateway's backoff loop should retry this.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout(_))
    }

    /// Whether this failure counts toward opening the circuit. Remote
    /// rate limits and content filtering say nothing about provider
    /// health.
    pub fn counts_for_breaker(&self) -> bool {
        matches!(
            self,
            Self::Transient(_) | Self::Permanent(_) | Self::Timeout(_)
        )
    }

    /// Convert to the runtime error envelope.
    pub fn into_error(self) -> Error {
        match &self {
            Self::Transient(_) | Self::Permanent(_) => Error::new(
                ErrorKind::ProviderUnavailable,
                Component::Gateway,
                self.to_string(),
            )
            .with_retryable(self.is_retryable()),
            Self::RateLimitedRemote => {
                Error::new(ErrorKind::RateLimited, Component::Gateway, self.to_string())
            }
            Self::ContentFilter(_) => Error::new(
                ErrorKind::InvalidRequest,
                Component::Gateway,
                self.to_string(),
            ),
            Self::Timeout(_) => Error::timeout(Component::Gateway, self.to_string()),
        }
    }
}

/// The opaque external model service.
///
/// Object-safe so the gateway can hold `Arc<dyn ModelProvider>`; tests
/// substitute canned-response mocks.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// One completion call. The gateway owns retries; implementations
    /// should make exactly one attempt.
    async fn complete(&self, request: &GenerateRequest) -> Result<GenerateResponse, ProviderError>;

    /// Embed a batch of texts, one vector per text.
    async fn embed(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;
}
