use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::Result;
use crate::llm::{tools_for_role, ChatMessage, LlmGateway, ModelTier, Role, ToolSpec};

use super::prompts;
use super::stage::{Stage, StageKind};
use super::state::{RunState, StateDelta};

/// Analyst with a tool-call sub-loop.
///
/// Each `run` is one model turn over the stage's accumulated messages. A turn
/// with tool calls is appended to the history; a turn without becomes the
/// report.
pub struct AnalystStage {
    role: String,
    llm: Arc<dyn LlmGateway>,
    tools: Vec<ToolSpec>,
}

impl AnalystStage {
    /// `available` is the full tool set; only the role's tools are offered
    pub fn new(role: &str, llm: Arc<dyn LlmGateway>, available: &[ToolSpec]) -> Self {
        let wanted = tools_for_role(role);
        let tools = available
            .iter()
            .filter(|t| wanted.contains(&t.name.as_str()))
            .cloned()
            .collect();
        Self {
            role: role.to_string(),
            llm,
            tools,
        }
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    fn conversation(&self, state: &RunState) -> Vec<ChatMessage> {
        let date = state.trade_date.to_string();
        let mut messages = Vec::with_capacity(state.messages.len() + 2);
        messages.push(ChatMessage::system(prompts::analyst_system(
            &self.role,
            &state.symbol,
            &date,
            &self.tool_names(),
        )));
        messages.push(ChatMessage::user(prompts::analyst_task(state)));
        messages.extend(state.messages.iter().cloned());
        messages
    }
}

#[async_trait]
impl Stage for AnalystStage {
    fn id(&self) -> &str {
        &self.role
    }

    fn kind(&self) -> StageKind {
        StageKind::Analyst
    }

    async fn run(&self, state: &RunState) -> Result<StateDelta> {
        let reply = self
            .llm
            .complete(ModelTier::Quick, &self.conversation(state), &self.tools)
            .await?;

        if reply.has_tool_calls() {
            debug!(role = %self.role, calls = reply.tool_calls.len(), "Analyst requested tools");
            return Ok(StateDelta::Messages(vec![ChatMessage::assistant(
                reply.content,
                reply.tool_calls,
            )]));
        }

        Ok(StateDelta::Report {
            role: self.role.clone(),
            text: reply.content,
        })
    }

    fn tools(&self) -> &[ToolSpec] {
        &self.tools
    }

    fn has_pending_tool_calls(&self, state: &RunState) -> bool {
        state
            .messages
            .last()
            .map(|m| m.role == Role::Assistant && !m.tool_calls.is_empty())
            .unwrap_or(false)
    }

    fn ceiling_fallback(&self, state: &RunState) -> Option<StateDelta> {
        let text = match state.latest_content() {
            Some(content) => content.to_string(),
            None => {
                warn!(role = %self.role, "No content before tool ceiling, report left empty");
                String::new()
            }
        };
        Some(StateDelta::Report {
            role: self.role.clone(),
            text,
        })
    }
}
