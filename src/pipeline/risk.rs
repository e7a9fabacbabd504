use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::llm::{ChatMessage, LlmGateway, ModelTier};

use super::prompts;
use super::stage::{Stage, StageKind};
use super::state::{RiskSpeaker, RunState, StateDelta};

/// One Risky, Safe or Neutral turn
pub struct RiskReviewStage {
    speaker: RiskSpeaker,
    llm: Arc<dyn LlmGateway>,
}

impl RiskReviewStage {
    pub fn new(speaker: RiskSpeaker, llm: Arc<dyn LlmGateway>) -> Self {
        Self { speaker, llm }
    }
}

#[async_trait]
impl Stage for RiskReviewStage {
    fn id(&self) -> &str {
        match self.speaker {
            RiskSpeaker::Risky => "risky",
            RiskSpeaker::Safe => "safe",
            RiskSpeaker::Neutral => "neutral",
        }
    }

    fn kind(&self) -> StageKind {
        StageKind::RiskReviewer
    }

    async fn run(&self, state: &RunState) -> Result<StateDelta> {
        let prompt = prompts::risk_reviewer(self.speaker.as_str(), state);
        let reply = self
            .llm
            .complete(ModelTier::Quick, &[ChatMessage::user(prompt)], &[])
            .await?;
        Ok(StateDelta::Risk {
            speaker: self.speaker,
            text: reply.content,
        })
    }
}

/// Next risk reviewer, or `None` once the risk judge must rule
pub fn next_risk_turn(state: &RunState, max_rounds: u32) -> Option<RiskSpeaker> {
    if state.risk_debate.round_count >= 3 * max_rounds {
        return None;
    }
    Some(match state.risk_debate.latest_speaker {
        Some(speaker) => speaker.next(),
        None => RiskSpeaker::Risky,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn cycles_in_fixed_order() {
        let mut state = RunState::new("ETH/USDT", NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        let mut turns = Vec::new();
        while let Some(speaker) = next_risk_turn(&state, 2) {
            turns.push(speaker);
            state.apply(StateDelta::Risk { speaker, text: String::new() }).unwrap();
        }
        use RiskSpeaker::*;
        assert_eq!(turns, vec![Risky, Safe, Neutral, Risky, Safe, Neutral]);
    }
}
