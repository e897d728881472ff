//! The gateway pipeline.

use crate::provider::{ModelProvider, ProviderError};
use crate::types::{EmbedRequest, FinishReason, GenerateRequest, GenerateResponse, TokenUsage};
use crate::usage::{CallOutcome, UsageLog, UsageRecord};
use async_trait::async_trait;
use cortex_guard::breaker::Admission;
use cortex_guard::{
    BreakerMap, CircuitBreaker, CircuitBreakerConfig, DedupeOutcome, Deduper, DeduperConfig,
    RateLimiter, RateLimiterConfig,
};
use cortex_types::{
    approx_tokens, CallContext, Component, Error, ErrorKind, Fingerprint, ProviderId, RetryPolicy,
    TenantId,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How strictly model output is validated before being returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationLevel {
    /// Reject malformed tool calls, error finishes, and empty completions.
    Strict,
    /// Reject malformed tool calls only.
    #[default]
    Moderate,
    /// Pass everything through.
    Lenient,
}

/// Gateway configuration. Sub-configs carry the documented defaults of
/// their components.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Output validation level.
    pub validation: ValidationLevel,
    /// Retry policy for transient provider failures.
    pub retry: RetryPolicy,
    /// Total wall-clock budget for one generate/embed call, retries
    /// included.
    pub total_deadline: Duration,
    /// Provider every unmapped model resolves to.
    pub default_provider: ProviderId,
    /// Exact model → provider overrides (circuit-breaker scope).
    pub model_providers: HashMap<String, ProviderId>,
    /// Rate limiter settings.
    pub rate_limiter: RateLimiterConfig,
    /// Circuit breaker settings.
    pub breaker: CircuitBreakerConfig,
    /// Deduper settings.
    pub deduper: DeduperConfig,
    /// Usage ring-buffer capacity.
    pub usage_capacity: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            validation: ValidationLevel::Moderate,
            retry: RetryPolicy::default(),
            total_deadline: Duration::from_secs(60),
            default_provider: ProviderId::new("default"),
            model_providers: HashMap::new(),
            rate_limiter: RateLimiterConfig::default(),
            breaker: CircuitBreakerConfig::default(),
            deduper: DeduperConfig::default(),
            usage_capacity: 1024,
        }
    }
}

/// Object-safe gateway boundary. Agents and the orchestrator depend on
/// this trait, not on [`Gateway`], so tests can substitute a stub and
/// nothing in the runtime reaches for a global.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// One completion through the full admission pipeline.
    async fn generate(
        &self,
        request: GenerateRequest,
        ctx: &CallContext,
    ) -> Result<GenerateResponse, Error>;

    /// Embeddings through the same pipeline (no tool-loop semantics).
    async fn embed(&self, request: EmbedRequest, ctx: &CallContext)
        -> Result<Vec<Vec<f32>>, Error>;

    /// Whether the circuit for `model`'s provider is currently open.
    /// Lets agents fail fast before assembling a prompt. Stubs that have
    /// no breaker keep the default.
    fn circuit_open(&self, model: &str) -> bool {
        let _ = model;
        false
    }
}

/// The concrete gateway.
pub struct Gateway {
    provider: Arc<dyn ModelProvider>,
    limiter: Arc<RateLimiter>,
    breakers: BreakerMap,
    generate_dedupe: Deduper<GenerateResponse>,
    embed_dedupe: Deduper<Vec<Vec<f32>>>,
    usage: Arc<UsageLog>,
    validation: ValidationLevel,
    retry: RetryPolicy,
    total_deadline: Duration,
    default_provider: ProviderId,
    model_providers: HashMap<String, ProviderId>,
}

/// The request-identifying fields that make up a fingerprint. Function
/// *schemas* participate (a schema change is a different request); the
/// tag keeps generate and embed fingerprints from ever colliding.
#[derive(Serialize)]
struct FingerprintInput<'a> {
    op: &'static str,
    tenant: &'a str,
    model: &'a str,
    payload: serde_json::Value,
    temperature: Option<f64>,
    max_tokens: Option<u32>,
}

impl Gateway {
    /// Build a gateway around a provider.
    pub fn new(provider: Arc<dyn ModelProvider>, config: GatewayConfig) -> Self {
        Self {
            provider,
            limiter: Arc::new(RateLimiter::new(config.rate_limiter)),
            breakers: BreakerMap::new(config.breaker),
            generate_dedupe: Deduper::new(config.deduper.clone()),
            embed_dedupe: Deduper::new(config.deduper),
            usage: Arc::new(UsageLog::new(config.usage_capacity)),
            validation: config.validation,
            retry: config.retry,
            total_deadline: config.total_deadline,
            default_provider: config.default_provider,
            model_providers: config.model_providers,
        }
    }

    /// The usage log.
    pub fn usage(&self) -> &Arc<UsageLog> {
        &self.usage
    }

    /// Observable breaker state for one model's provider.
    pub fn breaker_for_model(&self, model: &str) -> Arc<CircuitBreaker> {
        self.breakers.breaker_for(&self.provider_of(model))
    }

    fn provider_of(&self, model: &str) -> ProviderId {
        self.model_providers
            .get(model)
            .cloned()
            .unwrap_or_else(|| self.default_provider.clone())
    }

    fn invalid(message: impl Into<String>) -> Error {
        Error::new(ErrorKind::InvalidRequest, Component::Gateway, message)
    }

    fn fingerprint_generate(request: &GenerateRequest) -> Result<Fingerprint, Error> {
        let payload = serde_json::json!({
            "messages": request.messages,
            "functions": request.functions,
        });
        Fingerprint::of(&FingerprintInput {
            op: "generate",
            tenant: request.tenant.as_str(),
            model: &request.model,
            payload,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        })
        .map_err(|e| Self::invalid(format!("unfingerprintable request: {e}")))
    }

    fn fingerprint_embed(request: &EmbedRequest) -> Result<Fingerprint, Error> {
        Fingerprint::of(&FingerprintInput {
            op: "embed",
            tenant: request.tenant.as_str(),
            model: &request.model,
            payload: serde_json::json!({ "texts": request.texts }),
            temperature: None,
            max_tokens: None,
        })
        .map_err(|e| Self::invalid(format!("unfingerprintable request: {e}")))
    }
}

#[async_trait]
impl ModelGateway for Gateway {
    async fn generate(
        &self,
        request: GenerateRequest,
        ctx: &CallContext,
    ) -> Result<GenerateResponse, Error> {
        if request.tenant.is_empty() {
            return Err(Self::invalid("request is missing a tenant"));
        }
        if request.model.is_empty() {
            return Err(Self::invalid("request is missing a model").with_tenant(request.tenant));
        }
        if request.messages.is_empty() {
            return Err(Self::invalid("request has no messages").with_tenant(request.tenant));
        }

        let tenant = request.tenant.clone();
        let fingerprint = Self::fingerprint_generate(&request)?;
        let provider_id = self.provider_of(&request.model);
        let breaker = self.breakers.breaker_for(&provider_id);

        let provider = Arc::clone(&self.provider);
        let limiter = Arc::clone(&self.limiter);
        let usage = Arc::clone(&self.usage);
        let retry = self.retry.clone();
        let validation = self.validation;
        let total_deadline = self.total_deadline;

        let (result, outcome) = self
            .generate_dedupe
            .execute(fingerprint, ctx, move |cancel| {
                generate_pipeline(
                    provider,
                    limiter,
                    breaker,
                    usage,
                    retry,
                    validation,
                    total_deadline,
                    provider_id,
                    request,
                    cancel,
                )
            })
            .await;
        if outcome != DedupeOutcome::Led {
            tracing::debug!(tenant = %tenant, ?outcome, "generate request deduplicated");
        }
        result
    }

    async fn embed(
        &self,
        request: EmbedRequest,
        ctx: &CallContext,
    ) -> Result<Vec<Vec<f32>>, Error> {
        if request.tenant.is_empty() {
            return Err(Self::invalid("request is missing a tenant"));
        }
        if request.model.is_empty() {
            return Err(Self::invalid("request is missing a model").with_tenant(request.tenant));
        }
        if request.texts.is_empty() {
            return Ok(vec![]);
        }

        let fingerprint = Self::fingerprint_embed(&request)?;
        let provider_id = self.provider_of(&request.model);
        let breaker = self.breakers.breaker_for(&provider_id);

        let provider = Arc::clone(&self.provider);
        let limiter = Arc::clone(&self.limiter);
        let usage = Arc::clone(&self.usage);
        let retry = self.retry.clone();
        let total_deadline = self.total_deadline;

        let (result, _outcome) = self
            .embed_dedupe
            .execute(fingerprint, ctx, move |cancel| {
                embed_pipeline(
                    provider,
                    limiter,
                    breaker,
                    usage,
                    retry,
                    total_deadline,
                    provider_id,
                    request,
                    cancel,
                )
            })
            .await;
        result
    }

    fn circuit_open(&self, model: &str) -> bool {
        self.breaker_for_model(model).state() == cortex_guard::CircuitState::Open
    }
}

/// One admission attempt shared by both pipelines: breaker check, then
/// rate-limit acquisition (strictly before the provider call). Returns
/// the admission so the caller can settle a probe slot.
async fn admit(
    breaker: &CircuitBreaker,
    limiter: &RateLimiter,
    tenant: &TenantId,
    estimated_tokens: u32,
    ctx: &CallContext,
) -> Result<Admission, Error> {
    let admission = breaker.check().map_err(|e| e.with_tenant(tenant.clone()))?;
    if let Err(e) = limiter.acquire(tenant, estimated_tokens, ctx).await {
        if admission == Admission::Probe {
            breaker.release_probe();
        }
        return Err(e);
    }
    Ok(admission)
}

#[allow(clippy::too_many_arguments)]
async fn generate_pipeline(
    provider: Arc<dyn ModelProvider>,
    limiter: Arc<RateLimiter>,
    breaker: Arc<CircuitBreaker>,
    usage: Arc<UsageLog>,
    retry: RetryPolicy,
    validation: ValidationLevel,
    total_deadline: Duration,
    provider_id: ProviderId,
    request: GenerateRequest,
    cancel: CancellationToken,
) -> Result<GenerateResponse, Error> {
    let ctx = CallContext::with_cancel(cancel).with_timeout(total_deadline);
    let estimated = request.estimated_tokens();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        if ctx.is_cancelled() {
            return Err(Error::cancelled(Component::Gateway));
        }
        if ctx.is_expired() {
            return Err(Error::timeout(Component::Gateway, "total deadline elapsed")
                .with_tenant(request.tenant.clone()));
        }

        let admission = admit(&breaker, &limiter, &request.tenant, estimated, &ctx).await?;

        let start = tokio::time::Instant::now();
        let call = tokio::select! {
            biased;
            _ = ctx.cancelled() => {
                if admission == Admission::Probe {
                    breaker.release_probe();
                }
                return Err(Error::cancelled(Component::Gateway));
            }
            outcome = tokio::time::timeout(
                ctx.budget(total_deadline),
                provider.complete(&request),
            ) => outcome.unwrap_or_else(|_| Err(ProviderError::Timeout("gateway deadline".into()))),
        };
        let latency = start.elapsed();

        match call {
            Ok(response) => {
                breaker.record_success();
                usage.record(UsageRecord {
                    tenant: request.tenant.clone(),
                    model: request.model.clone(),
                    provider: provider_id.clone(),
                    tokens: response.tokens,
                    cost: response.cost_estimate,
                    latency,
                    outcome: CallOutcome::Success,
                });
                validate_output(validation, &response)
                    .map_err(|e| e.with_tenant(request.tenant.clone()))?;
                return Ok(response);
            }
            Err(e) => {
                usage.record(UsageRecord {
                    tenant: request.tenant.clone(),
                    model: request.model.clone(),
                    provider: provider_id.clone(),
                    tokens: TokenUsage::default(),
                    cost: rust_decimal::Decimal::ZERO,
                    latency,
                    outcome: CallOutcome::Failure(e.to_string()),
                });
                if e.counts_for_breaker() {
                    breaker.record_failure();
                } else if admission == Admission::Probe {
                    breaker.release_probe();
                }

                if e.is_retryable() && attempt <= retry.max_retries {
                    let delay = retry.delay(attempt);
                    let within_deadline = ctx.remaining().is_none_or(|rem| rem > delay);
                    if within_deadline {
                        tracing::debug!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "retrying provider call"
                        );
                        tokio::select! {
                            biased;
                            _ = ctx.cancelled() => {
                                return Err(Error::cancelled(Component::Gateway));
                            }
                            _ = tokio::time::sleep(delay) => {}
                        }
                        continue;
                    }
                }
                return Err(e.into_error().with_tenant(request.tenant.clone()));
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn embed_pipeline(
    provider: Arc<dyn ModelProvider>,
    limiter: Arc<RateLimiter>,
    breaker: Arc<CircuitBreaker>,
    usage: Arc<UsageLog>,
    retry: RetryPolicy,
    total_deadline: Duration,
    provider_id: ProviderId,
    request: EmbedRequest,
    cancel: CancellationToken,
) -> Result<Vec<Vec<f32>>, Error> {
    let ctx = CallContext::with_cancel(cancel).with_timeout(total_deadline);
    let estimated: u32 = request
        .texts
        .iter()
        .map(|t| approx_tokens(t))
        .sum::<u32>()
        .max(1);
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        if ctx.is_cancelled() {
            return Err(Error::cancelled(Component::Gateway));
        }
        if ctx.is_expired() {
            return Err(Error::timeout(Component::Gateway, "total deadline elapsed")
                .with_tenant(request.tenant.clone()));
        }

        let admission = admit(&breaker, &limiter, &request.tenant, estimated, &ctx).await?;

        let start = tokio::time::Instant::now();
        let call = tokio::select! {
            biased;
            _ = ctx.cancelled() => {
                if admission == Admission::Probe {
                    breaker.release_probe();
                }
                return Err(Error::cancelled(Component::Gateway));
            }
            outcome = tokio::time::timeout(
                ctx.budget(total_deadline),
                provider.embed(&request.model, &request.texts),
            ) => outcome.unwrap_or_else(|_| Err(ProviderError::Timeout("gateway deadline".into()))),
        };
        let latency = start.elapsed();

        match call {
            Ok(vectors) => {
                breaker.record_success();
                usage.record(UsageRecord {
                    tenant: request.tenant.clone(),
                    model: request.model.clone(),
                    provider: provider_id.clone(),
                    tokens: TokenUsage::new(u64::from(estimated), 0),
                    cost: rust_decimal::Decimal::ZERO,
                    latency,
                    outcome: CallOutcome::Success,
                });
                if vectors.len() != request.texts.len() {
                    return Err(Error::new(
                        ErrorKind::ProviderUnavailable,
                        Component::Gateway,
                        format!(
                            "provider returned {} vectors for {} texts",
                            vectors.len(),
                            request.texts.len()
                        ),
                    )
                    .with_tenant(request.tenant.clone()));
                }
                return Ok(vectors);
            }
            Err(e) => {
                usage.record(UsageRecord {
                    tenant: request.tenant.clone(),
                    model: request.model.clone(),
                    provider: provider_id.clone(),
                    tokens: TokenUsage::default(),
                    cost: rust_decimal::Decimal::ZERO,
                    latency,
                    outcome: CallOutcome::Failure(e.to_string()),
                });
                if e.counts_for_breaker() {
                    breaker.record_failure();
                } else if admission == Admission::Probe {
                    breaker.release_probe();
                }

                if e.is_retryable() && attempt <= retry.max_retries {
                    let delay = retry.delay(attempt);
                    if ctx.remaining().is_none_or(|rem| rem > delay) {
                        tokio::select! {
                            biased;
                            _ = ctx.cancelled() => {
                                return Err(Error::cancelled(Component::Gateway));
                            }
                            _ = tokio::time::sleep(delay) => {}
                        }
                        continue;
                    }
                }
                return Err(e.into_error().with_tenant(request.tenant.clone()));
            }
        }
    }
}

/// Validate a provider response per the configured level.
fn validate_output(level: ValidationLevel, response: &GenerateResponse) -> Result<(), Error> {
    let malformed_tool_calls = || {
        response
            .tool_calls
            .iter()
            .find(|c| !c.arguments.is_object())
            .map(|c| {
                Error::new(
                    ErrorKind::InvalidRequest,
                    Component::Gateway,
                    format!("tool call `{}` arguments are not an object", c.name),
                )
            })
    };
    match level {
        ValidationLevel::Lenient => Ok(()),
        ValidationLevel::Moderate => match malformed_tool_calls() {
            Some(e) => Err(e),
            None => Ok(()),
        },
        ValidationLevel::Strict => {
            if let Some(e) = malformed_tool_calls() {
                return Err(e);
            }
            if response.finish_reason == FinishReason::Error {
                return Err(Error::new(
                    ErrorKind::InvalidRequest,
                    Component::Gateway,
                    "provider reported an error finish",
                ));
            }
            if response.finish_reason == FinishReason::Stop
                && response.text.trim().is_empty()
                && response.tool_calls.is_empty()
            {
                return Err(Error::new(
                    ErrorKind::InvalidRequest,
                    Component::Gateway,
                    "empty completion",
                ));
            }
            Ok(())
        }
    }
}
