use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::llm::{ChatMessage, LlmGateway, ModelTier};

use super::prompts;
use super::stage::{Stage, StageKind};
use super::state::{RunState, StateDelta};

pub struct TraderStage {
    llm: Arc<dyn LlmGateway>,
}

impl TraderStage {
    pub fn new(llm: Arc<dyn LlmGateway>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Stage for TraderStage {
    fn id(&self) -> &str {
        "trader"
    }

    fn kind(&self) -> StageKind {
        StageKind::Trader
    }

    async fn run(&self, state: &RunState) -> Result<StateDelta> {
        let reply = self
            .llm
            .complete(ModelTier::Quick, &[ChatMessage::user(prompts::trader(state))], &[])
            .await?;
        Ok(StateDelta::TraderPlan(reply.content))
    }
}
