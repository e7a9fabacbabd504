//! Role id -> stage table, resolved once when the orchestrator is built.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::{DeskError, Result};
use crate::llm::{LlmGateway, ToolSpec};

use super::analyst::AnalystStage;
use super::debate::DebateStage;
use super::judge::{JudgeRole, JudgeStage};
use super::risk::RiskReviewStage;
use super::stage::{Stage, StageKind};
use super::state::{DebateSide, RiskSpeaker};
use super::trader::TraderStage;

pub const ANALYST_ROLES: &[&str] = &["market", "crypto", "sentiment", "news"];
pub const BULL: &str = "bull";
pub const BEAR: &str = "bear";
pub const RESEARCH_MANAGER: &str = "research_manager";
pub const TRADER: &str = "trader";
pub const RISKY: &str = "risky";
pub const SAFE: &str = "safe";
pub const NEUTRAL: &str = "neutral";
pub const RISK_JUDGE: &str = "risk_judge";

#[derive(Default, Clone)]
pub struct StageRegistry {
    stages: HashMap<String, Arc<dyn Stage>>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in role over one gateway
    pub fn standard(llm: Arc<dyn LlmGateway>, tools: &[ToolSpec]) -> Self {
        let mut registry = Self::new();
        for role in ANALYST_ROLES {
            registry.register(Arc::new(AnalystStage::new(role, llm.clone(), tools)));
        }
        registry.register(Arc::new(DebateStage::new(DebateSide::Bull, llm.clone())));
        registry.register(Arc::new(DebateStage::new(DebateSide::Bear, llm.clone())));
        registry.register(Arc::new(JudgeStage::new(JudgeRole::Research, llm.clone())));
        registry.register(Arc::new(TraderStage::new(llm.clone())));
        registry.register(Arc::new(RiskReviewStage::new(RiskSpeaker::Risky, llm.clone())));
        registry.register(Arc::new(RiskReviewStage::new(RiskSpeaker::Safe, llm.clone())));
        registry.register(Arc::new(RiskReviewStage::new(RiskSpeaker::Neutral, llm.clone())));
        registry.register(Arc::new(JudgeStage::new(JudgeRole::Risk, llm)));
        registry
    }

    /// Add or replace the stage under its own id
    pub fn register(&mut self, stage: Arc<dyn Stage>) {
        self.stages.insert(stage.id().to_string(), stage);
    }

    pub fn resolve(&self, id: &str) -> Result<Arc<dyn Stage>> {
        self.stages
            .get(id)
            .cloned()
            .ok_or_else(|| DeskError::Validation(format!("no stage registered for role '{}'", id)))
    }
}

/// Stages of one pipeline, in the order they run
pub struct ResolvedStages {
    pub analysts: Vec<Arc<dyn Stage>>,
    pub bull: Arc<dyn Stage>,
    pub bear: Arc<dyn Stage>,
    pub research_manager: Arc<dyn Stage>,
    pub trader: Arc<dyn Stage>,
    pub risky: Arc<dyn Stage>,
    pub safe: Arc<dyn Stage>,
    pub neutral: Arc<dyn Stage>,
    pub risk_judge: Arc<dyn Stage>,
}

impl ResolvedStages {
    /// Analyst ids must name distinct analyst stages
    pub fn resolve(registry: &StageRegistry, analysts: &[String]) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut resolved = Vec::with_capacity(analysts.len());
        for id in analysts {
            if !seen.insert(id.as_str()) {
                return Err(DeskError::Validation(format!("analyst '{}' selected twice", id)));
            }
            let stage = registry.resolve(id)?;
            if stage.kind() != StageKind::Analyst {
                return Err(DeskError::Validation(format!(
                    "role '{}' is a {:?} stage, not an analyst",
                    id,
                    stage.kind()
                )));
            }
            resolved.push(stage);
        }
        Ok(Self {
            analysts: resolved,
            bull: registry.resolve(BULL)?,
            bear: registry.resolve(BEAR)?,
            research_manager: registry.resolve(RESEARCH_MANAGER)?,
            trader: registry.resolve(TRADER)?,
            risky: registry.resolve(RISKY)?,
            safe: registry.resolve(SAFE)?,
            neutral: registry.resolve(NEUTRAL)?,
            risk_judge: registry.resolve(RISK_JUDGE)?,
        })
    }

    pub fn debater(&self, side: DebateSide) -> &Arc<dyn Stage> {
        match side {
            DebateSide::Bull => &self.bull,
            DebateSide::Bear => &self.bear,
        }
    }

    pub fn risk_reviewer(&self, speaker: RiskSpeaker) -> &Arc<dyn Stage> {
        match speaker {
            RiskSpeaker::Risky => &self.risky,
            RiskSpeaker::Safe => &self.safe,
            RiskSpeaker::Neutral => &self.neutral,
        }
    }
}
