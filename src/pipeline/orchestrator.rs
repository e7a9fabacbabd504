//! Drives one decision run end to end.
//!
//! analysts (tool sub-loops) -> bull/bear debate -> research manager ->
//! trader -> risky/safe/neutral review -> risk judge -> signal -> execution.
//!
//! Runs are strictly sequential. A non-retryable stage error aborts the run
//! and nothing is executed or audited.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{NaiveDate, Utc};
use tokio::sync::Mutex;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::audit::AuditLog;
use crate::config::{AppConfig, PipelineConfig, TradingConfig};
use crate::decision::{RecordSource, Signal, SignalExtractor, StructuredDecision, Verdict};
use crate::error::{DeskError, Result};
use crate::exchange::ExchangeGateway;
use crate::execution::{ExecutionRequest, ExecutionResult, ExecutionStateMachine};
use crate::llm::{ChatMessage, LlmGateway, RetryingLlm, ToolRegistry};
use crate::observer::{ExecutionBrief, RunEvent, RunObserver, RunSummary};
use crate::retry::RetryPolicy;

use super::debate::next_debate_turn;
use super::registry::{ResolvedStages, StageRegistry};
use super::risk::next_risk_turn;
use super::stage::Stage;
use super::state::{RunState, StateDelta};

/// Everything one run produced
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: String,
    pub state: RunState,
    pub signal: Signal,
    pub structured: StructuredDecision,
    /// Verdict actually acted on
    pub verdict: Verdict,
    pub execution: Vec<ExecutionResult>,
    pub audit_path: Option<PathBuf>,
    /// Stage steps executed, tool rounds included
    pub steps: u32,
}

impl RunOutcome {
    pub fn decision_text(&self) -> &str {
        &self.signal.text
    }
}

pub struct PipelineOrchestrator {
    stages: ResolvedStages,
    tools: ToolRegistry,
    pipeline: PipelineConfig,
    trading: TradingConfig,
    executor: Option<Arc<ExecutionStateMachine>>,
    auto_execute: bool,
    audit: Option<AuditLog>,
    observers: Vec<Arc<dyn RunObserver>>,
    run_lock: Mutex<()>,
}

impl PipelineOrchestrator {
    /// Resolve the configured roles against `registry`
    pub fn new(
        registry: &StageRegistry,
        tools: ToolRegistry,
        pipeline: PipelineConfig,
        trading: TradingConfig,
    ) -> Result<Self> {
        let stages = ResolvedStages::resolve(registry, &pipeline.selected_analysts)?;
        Ok(Self {
            stages,
            tools,
            pipeline,
            trading,
            executor: None,
            auto_execute: false,
            audit: None,
            observers: Vec::new(),
            run_lock: Mutex::new(()),
        })
    }

    /// Standard wiring: retrying LLM, built-in stages and market tools
    pub fn from_config(
        config: &AppConfig,
        llm: Arc<dyn LlmGateway>,
        gateway: Arc<dyn ExchangeGateway>,
    ) -> Result<Self> {
        let retry = RetryPolicy::from(&config.retry);
        let llm: Arc<dyn LlmGateway> = Arc::new(RetryingLlm::new(llm, retry.clone()));

        let executor = Arc::new(ExecutionStateMachine::new(
            gateway,
            (&config.execution).into(),
            retry,
        ));

        let tools = ToolRegistry::with_market_tools(
            executor.clone(),
            &config.trading.symbol,
            &config.trading.timeframe,
        );
        let registry = StageRegistry::standard(llm, &tools.specs_for(&all_tool_names()));

        Ok(Self::new(&registry, tools, config.pipeline.clone(), config.trading.clone())?
            .with_executor(executor, config.execution.auto_execute)
            .with_audit(AuditLog::new(&config.audit.results_dir)))
    }

    pub fn with_executor(mut self, executor: Arc<ExecutionStateMachine>, auto_execute: bool) -> Self {
        self.executor = Some(executor);
        self.auto_execute = auto_execute;
        self
    }

    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn set_auto_execute(&mut self, enabled: bool) {
        self.auto_execute = enabled;
    }

    pub fn executor(&self) -> Option<&Arc<ExecutionStateMachine>> {
        self.executor.as_ref()
    }

    /// One full run for the configured symbol on `trade_date`
    pub async fn run(&self, trade_date: NaiveDate) -> Result<RunOutcome> {
        let _serialized = self.run_lock.lock().await;
        let run_id = Uuid::new_v4().to_string();
        let symbol = self.trading.symbol.clone();
        let started = Instant::now();

        let span = info_span!("run", run_id = %run_id, symbol = %symbol, date = %trade_date);
        let result = self.run_inner(&run_id, trade_date).instrument(span).await;

        match result {
            Ok(outcome) => {
                self.notify(&RunEvent::Completed(RunSummary {
                    run_id: run_id.clone(),
                    symbol,
                    trade_date,
                    finished_at: Utc::now(),
                    elapsed: started.elapsed(),
                    steps: outcome.steps,
                    verdict: outcome.verdict,
                    confidence: Some(outcome.structured.confidence),
                    executions: outcome
                        .execution
                        .iter()
                        .map(|r| ExecutionBrief {
                            action: r.action.clone(),
                            success: r.success,
                            message: r.message.clone(),
                            test_mode: r.test_mode,
                        })
                        .collect(),
                }));
                Ok(outcome)
            }
            Err(e) => {
                error!(run_id = %run_id, symbol = %symbol, "Run aborted: {}", e);
                self.notify(&RunEvent::Failed {
                    run_id,
                    symbol,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn run_inner(&self, run_id: &str, trade_date: NaiveDate) -> Result<RunOutcome> {
        let mut state = RunState::new(&self.trading.symbol, trade_date);
        let mut steps = 0;

        info!(analysts = ?self.pipeline.selected_analysts, "Starting analysis");
        for analyst in &self.stages.analysts {
            steps += self.drive(analyst, &mut state).await?;
        }

        while let Some(side) = next_debate_turn(&state, self.pipeline.max_debate_rounds) {
            steps += self.drive(self.stages.debater(side), &mut state).await?;
        }
        steps += self.drive(&self.stages.research_manager, &mut state).await?;

        if let Some(executor) = &self.executor {
            state.position_summary = Some(executor.position_summary(&state.symbol).await);
        }
        steps += self.drive(&self.stages.trader, &mut state).await?;

        while let Some(speaker) = next_risk_turn(&state, self.pipeline.max_risk_rounds) {
            steps += self.drive(self.stages.risk_reviewer(speaker), &mut state).await?;
        }
        steps += self.drive(&self.stages.risk_judge, &mut state).await?;

        let final_text = state
            .final_decision
            .clone()
            .ok_or_else(|| DeskError::stage("risk_judge", "no final decision produced"))?;

        let signal = SignalExtractor::extract(&final_text);
        let structured = StructuredDecision::extract(&final_text, signal.verdict);
        let verdict = choose_verdict(&signal, &structured);
        info!(
            verdict = %verdict,
            marker = ?signal.source,
            confidence = structured.confidence,
            "Decision extracted"
        );

        let execution = self.execute(&state.symbol, verdict, &structured).await;

        let audit_path = match &self.audit {
            Some(audit) => match audit.write(&state, &signal, Some(&structured), &execution).await {
                Ok(path) => Some(path),
                Err(e) => {
                    error!("Failed to write audit record: {}", e);
                    None
                }
            },
            None => None,
        };

        Ok(RunOutcome {
            run_id: run_id.to_string(),
            state,
            signal,
            structured,
            verdict,
            execution,
            audit_path,
            steps,
        })
    }

    /// Run `stage` until it has no pending tool calls, bounded by the
    /// iteration ceiling. Returns the number of model turns taken.
    async fn drive(&self, stage: &Arc<dyn Stage>, state: &mut RunState) -> Result<u32> {
        let span = info_span!("stage", role = stage.id());
        async move {
            let ceiling = self.pipeline.max_tool_iterations.max(1);
            let mut turns = 0;
            loop {
                let delta = stage.run(state).await.map_err(|e| {
                    error!(role = stage.id(), "Stage failed: {}", e);
                    e
                })?;
                turns += 1;
                state.apply(delta)?;

                if !stage.has_pending_tool_calls(state) {
                    break;
                }
                if turns >= ceiling {
                    warn!(
                        role = stage.id(),
                        ceiling, "Tool-call ceiling reached, using latest content as final"
                    );
                    if let Some(fallback) = stage.ceiling_fallback(state) {
                        state.apply(fallback)?;
                    }
                    break;
                }
                self.resolve_tool_calls(stage, state).await?;
            }
            state.clear_messages();
            Ok(turns)
        }
        .instrument(span)
        .await
    }

    /// Answer every tool call in the last assistant turn. Tool failures,
    /// including calls to tools the stage was not offered, are reported back
    /// to the model as text.
    async fn resolve_tool_calls(&self, stage: &Arc<dyn Stage>, state: &mut RunState) -> Result<()> {
        let calls = state
            .messages
            .last()
            .map(|m| m.tool_calls.clone())
            .unwrap_or_default();

        let mut results = Vec::with_capacity(calls.len());
        for call in &calls {
            let text = match self.tools.invoke_offered(call, stage.tools()).await {
                Ok(text) => text,
                Err(e) => {
                    warn!(tool = %call.name, "Tool call failed: {}", e);
                    format!("Error: {}", e)
                }
            };
            results.push(ChatMessage::tool_result(&call.id, text));
        }
        state.apply(StateDelta::Messages(results))
    }

    async fn execute(
        &self,
        symbol: &str,
        verdict: Verdict,
        structured: &StructuredDecision,
    ) -> Vec<ExecutionResult> {
        let Some(executor) = self.executor.as_ref().filter(|_| self.auto_execute) else {
            info!(verdict = %verdict, "Auto-execution disabled, decision not executed");
            return Vec::new();
        };

        let reason = if structured.reason.is_empty() {
            format!("pipeline decision {}", verdict)
        } else {
            structured.reason.clone()
        };

        // prose-scanned levels are not trusted as order prices
        let (stop_loss, take_profit) = match structured.source {
            RecordSource::Json => (structured.stop_loss, structured.take_profit),
            RecordSource::Prose => {
                if structured.stop_loss.is_some() || structured.take_profit.is_some() {
                    warn!(
                        stop_loss = ?structured.stop_loss,
                        take_profit = ?structured.take_profit,
                        "Ignoring protective levels scanned from prose, no decision record"
                    );
                }
                (None, None)
            }
        };

        let mut results = Vec::new();
        for action in verdict.actions() {
            let request = ExecutionRequest::new(symbol, action, self.trading.position_size)
                .with_protection(stop_loss, take_profit)
                .with_reason(reason.clone());
            let result = executor.execute(&request).await;
            if result.success {
                info!("{}", result);
            } else {
                error!("{}", result);
            }
            results.push(result);
        }
        results
    }

    fn notify(&self, event: &RunEvent) {
        for observer in &self.observers {
            observer.on_event(event);
        }
    }
}

/// A parsed JSON record wins over the marker; disagreement is logged
pub fn choose_verdict(signal: &Signal, structured: &StructuredDecision) -> Verdict {
    if structured.source != RecordSource::Json {
        return signal.verdict;
    }
    if structured.action != signal.verdict {
        warn!(
            marker = %signal.verdict,
            record = %structured.action,
            "Decision record disagrees with marker, following the record"
        );
    }
    structured.action
}

fn all_tool_names() -> Vec<&'static str> {
    use crate::llm::tools::*;
    vec![
        GET_CRYPTO_DATA,
        GET_CRYPTO_INDICATORS,
        GET_FUNDING_RATE,
        GET_ORDER_BOOK,
        GET_MARKET_INFO,
        GET_POSITION_SUMMARY,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_overrides_marker() {
        let text = "```json\n{\"action\": \"CLOSE_LONG\"}\n```\n**FINAL DECISION: SELL**";
        let signal = SignalExtractor::extract(text);
        let structured = StructuredDecision::extract(text, signal.verdict);
        assert_eq!(signal.verdict, Verdict::Sell);
        assert_eq!(choose_verdict(&signal, &structured), Verdict::CloseLong);
    }

    #[test]
    fn prose_record_follows_marker() {
        let text = "confidence 0.9 **FINAL DECISION: BUY**";
        let signal = SignalExtractor::extract(text);
        let structured = StructuredDecision::extract(text, signal.verdict);
        assert_eq!(choose_verdict(&signal, &structured), Verdict::Buy);
    }
}
