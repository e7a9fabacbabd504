//! Write-only audit record, one JSON document per symbol and trade date.
//!
//! Layout: `<results_dir>/<SYMBOL>/logs/full_states_log_<date>.json`, holding
//! an object keyed by the trade date. Never read back during a run.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use crate::decision::{Signal, StructuredDecision};
use crate::error::Result;
use crate::execution::ExecutionResult;
use crate::pipeline::RunState;

#[derive(Debug, Serialize)]
struct DebateRecord<'a> {
    bull_history: String,
    bear_history: String,
    history: String,
    judge_decision: &'a str,
}

#[derive(Debug, Serialize)]
struct RiskRecord<'a> {
    risky_history: String,
    safe_history: String,
    neutral_history: String,
    history: String,
    judge_decision: &'a str,
}

#[derive(Debug, Serialize)]
struct AuditRecord<'a> {
    crypto_symbol: &'a str,
    trade_date: String,
    market_report: &'a str,
    crypto_analysis_report: &'a str,
    sentiment_report: &'a str,
    news_report: &'a str,
    investment_debate_state: DebateRecord<'a>,
    trader_investment_decision: &'a str,
    risk_debate_state: RiskRecord<'a>,
    final_trade_decision: &'a str,
    signal: &'a str,
    structured_decision: Option<&'a StructuredDecision>,
    execution: &'a [ExecutionResult],
}

pub struct AuditLog {
    results_dir: PathBuf,
}

impl AuditLog {
    pub fn new(results_dir: impl Into<PathBuf>) -> Self {
        Self {
            results_dir: results_dir.into(),
        }
    }

    /// File the record for `symbol` on `date` goes to
    pub fn path_for(&self, symbol: &str, date: &str) -> PathBuf {
        let dir_name: String = symbol
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        self.results_dir
            .join(dir_name)
            .join("logs")
            .join(format!("full_states_log_{}.json", date))
    }

    /// Write the run's record, replacing any earlier record for the same date
    pub async fn write(
        &self,
        state: &RunState,
        signal: &Signal,
        structured: Option<&StructuredDecision>,
        execution: &[ExecutionResult],
    ) -> Result<PathBuf> {
        let date = state.trade_date.to_string();
        let report = |role: &str| state.report(role).unwrap_or("");

        let record = AuditRecord {
            crypto_symbol: &state.symbol,
            trade_date: date.clone(),
            market_report: report("market"),
            crypto_analysis_report: report("crypto"),
            sentiment_report: report("sentiment"),
            news_report: report("news"),
            investment_debate_state: DebateRecord {
                bull_history: state.debate.bull_history.join("\n"),
                bear_history: state.debate.bear_history.join("\n"),
                history: state.debate.transcript(),
                judge_decision: state.debate.judge_decision.as_deref().unwrap_or(""),
            },
            trader_investment_decision: state.trader_plan.as_deref().unwrap_or(""),
            risk_debate_state: RiskRecord {
                risky_history: state.risk_debate.risky_history.join("\n"),
                safe_history: state.risk_debate.safe_history.join("\n"),
                neutral_history: state.risk_debate.neutral_history.join("\n"),
                history: state.risk_debate.transcript(),
                judge_decision: state.risk_debate.judge_decision.as_deref().unwrap_or(""),
            },
            final_trade_decision: state.final_decision.as_deref().unwrap_or(""),
            signal: signal.verdict.as_str(),
            structured_decision: structured,
            execution,
        };

        let path = self.path_for(&state.symbol, &date);
        let mut doc = serde_json::Map::new();
        doc.insert(date.clone(), serde_json::to_value(&record)?);
        write_json(&path, &serde_json::Value::Object(doc)).await?;
        info!(path = %path.display(), "Audit record written");
        Ok(path)
    }
}

async fn write_json(path: &Path, value: &serde_json::Value) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let content = serde_json::to_string_pretty(value)?;
    let bytes = content.len();
    tokio::fs::write(path, content).await?;
    debug!(bytes, "Audit JSON flushed");
    Ok(())
}
