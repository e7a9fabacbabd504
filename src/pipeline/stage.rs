use async_trait::async_trait;

use crate::error::Result;
use crate::llm::ToolSpec;

use super::state::{RunState, StateDelta};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Analyst,
    Debater,
    ResearchJudge,
    Trader,
    RiskReviewer,
    RiskJudge,
}

/// One pipeline step.
///
/// `run` reads the state and returns a delta; the orchestrator applies it.
/// Stages with a tool sub-loop report pending calls through
/// `has_pending_tool_calls` and are re-run after the calls resolve.
#[async_trait]
pub trait Stage: Send + Sync {
    fn id(&self) -> &str;

    fn kind(&self) -> StageKind;

    async fn run(&self, state: &RunState) -> Result<StateDelta>;

    /// Tools this stage may call
    fn tools(&self) -> &[ToolSpec] {
        &[]
    }

    fn has_pending_tool_calls(&self, _state: &RunState) -> bool {
        false
    }

    /// Delta to apply when the tool-iteration ceiling is hit
    fn ceiling_fallback(&self, _state: &RunState) -> Option<StateDelta> {
        None
    }
}
