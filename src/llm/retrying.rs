use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::retry::RetryPolicy;

use super::traits::{ChatMessage, LlmGateway, LlmResponse, ModelTier, ToolSpec};

/// Gateway decorator that runs every completion under a `RetryPolicy`
pub struct RetryingLlm {
    inner: Arc<dyn LlmGateway>,
    policy: RetryPolicy,
}

impl RetryingLlm {
    pub fn new(inner: Arc<dyn LlmGateway>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl LlmGateway for RetryingLlm {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(
        &self,
        tier: ModelTier,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<LlmResponse> {
        self.policy
            .run("llm_complete", || self.inner.complete(tier, messages, tools))
            .await
    }
}
