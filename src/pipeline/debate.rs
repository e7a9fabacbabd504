use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::llm::{ChatMessage, LlmGateway, ModelTier};

use super::prompts;
use super::stage::{Stage, StageKind};
use super::state::{DebateSide, RunState, StateDelta};

/// One Bull or Bear turn
pub struct DebateStage {
    side: DebateSide,
    llm: Arc<dyn LlmGateway>,
}

impl DebateStage {
    pub fn new(side: DebateSide, llm: Arc<dyn LlmGateway>) -> Self {
        Self { side, llm }
    }

    pub fn side(&self) -> DebateSide {
        self.side
    }
}

#[async_trait]
impl Stage for DebateStage {
    fn id(&self) -> &str {
        match self.side {
            DebateSide::Bull => "bull",
            DebateSide::Bear => "bear",
        }
    }

    fn kind(&self) -> StageKind {
        StageKind::Debater
    }

    async fn run(&self, state: &RunState) -> Result<StateDelta> {
        let prompt = prompts::debater(self.side == DebateSide::Bull, state);
        let reply = self
            .llm
            .complete(ModelTier::Quick, &[ChatMessage::user(prompt)], &[])
            .await?;
        Ok(StateDelta::Debate {
            side: self.side,
            text: reply.content,
        })
    }
}

/// Next debate step: whose turn, or `None` once the judge must rule
pub fn next_debate_turn(state: &RunState, max_rounds: u32) -> Option<DebateSide> {
    if state.debate.round_count >= 2 * max_rounds {
        return None;
    }
    Some(match state.debate.latest_speaker {
        Some(DebateSide::Bull) => DebateSide::Bear,
        _ => DebateSide::Bull,
    })
}
