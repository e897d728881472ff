//! Adapter: the gateway's embedding pipeline as a memory `Embedder`.

use async_trait::async_trait;
use cortex_gateway::{EmbedRequest, ModelGateway};
use cortex_memory::Embedder;
use cortex_types::{CallContext, Error, TenantId};
use std::sync::Arc;

/// Embeds memory content through the gateway, so memory retrieval enjoys
/// the same dedupe/breaker/rate-limit protections as everything else.
pub struct GatewayEmbedder {
    gateway: Arc<dyn ModelGateway>,
    tenant: TenantId,
    model: String,
}

impl GatewayEmbedder {
    /// Create an embedder bound to a tenant and embedding model.
    pub fn new(gateway: Arc<dyn ModelGateway>, tenant: TenantId, model: impl Into<String>) -> Self {
        Self {
            gateway,
            tenant,
            model: model.into(),
        }
    }
}

#[async_trait]
impl Embedder for GatewayEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, Error> {
        self.gateway
            .embed(
                EmbedRequest {
                    tenant: self.tenant.clone(),
                    model: self.model.clone(),
                    texts: texts.to_vec(),
                },
                &CallContext::background(),
            )
            .await
    }
}
