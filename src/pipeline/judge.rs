use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::llm::{ChatMessage, LlmGateway, ModelTier};

use super::prompts;
use super::stage::{Stage, StageKind};
use super::state::{RunState, StateDelta};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JudgeRole {
    /// Rules on the bull/bear debate
    Research,
    /// Rules on the risk discussion; its text is the final decision
    Risk,
}

pub struct JudgeStage {
    role: JudgeRole,
    llm: Arc<dyn LlmGateway>,
}

impl JudgeStage {
    pub fn new(role: JudgeRole, llm: Arc<dyn LlmGateway>) -> Self {
        Self { role, llm }
    }
}

#[async_trait]
impl Stage for JudgeStage {
    fn id(&self) -> &str {
        match self.role {
            JudgeRole::Research => "research_manager",
            JudgeRole::Risk => "risk_judge",
        }
    }

    fn kind(&self) -> StageKind {
        match self.role {
            JudgeRole::Research => StageKind::ResearchJudge,
            JudgeRole::Risk => StageKind::RiskJudge,
        }
    }

    async fn run(&self, state: &RunState) -> Result<StateDelta> {
        let prompt = match self.role {
            JudgeRole::Research => prompts::research_judge(state),
            JudgeRole::Risk => prompts::risk_judge(state),
        };
        let reply = self
            .llm
            .complete(ModelTier::Deep, &[ChatMessage::user(prompt)], &[])
            .await?;
        Ok(match self.role {
            JudgeRole::Research => StateDelta::ResearchDecision(reply.content),
            JudgeRole::Risk => StateDelta::FinalDecision(reply.content),
        })
    }
}
