//! Record threaded through one pipeline run.
//!
//! Report fields are write-once: the owning stage sets them and any second
//! write is rejected with `ReportAlreadyWritten`.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{DeskError, Result};
use crate::llm::ChatMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebateSide {
    Bull,
    Bear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskSpeaker {
    Risky,
    Safe,
    Neutral,
}

impl RiskSpeaker {
    /// Fixed rotation Risky -> Safe -> Neutral -> Risky
    pub fn next(self) -> Self {
        match self {
            RiskSpeaker::Risky => RiskSpeaker::Safe,
            RiskSpeaker::Safe => RiskSpeaker::Neutral,
            RiskSpeaker::Neutral => RiskSpeaker::Risky,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskSpeaker::Risky => "Risky",
            RiskSpeaker::Safe => "Safe",
            RiskSpeaker::Neutral => "Neutral",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DebateState {
    pub bull_history: Vec<String>,
    pub bear_history: Vec<String>,
    /// Interleaved transcript, each turn prefixed with its speaker
    pub history: Vec<String>,
    pub round_count: u32,
    pub latest_speaker: Option<DebateSide>,
    pub judge_decision: Option<String>,
}

impl DebateState {
    pub fn transcript(&self) -> String {
        self.history.join("\n\n")
    }

    pub fn last_argument(&self) -> Option<&str> {
        self.history.last().map(String::as_str)
    }

    fn record(&mut self, side: DebateSide, text: String) {
        let line = match side {
            DebateSide::Bull => format!("Bull Analyst: {}", text),
            DebateSide::Bear => format!("Bear Analyst: {}", text),
        };
        match side {
            DebateSide::Bull => self.bull_history.push(text),
            DebateSide::Bear => self.bear_history.push(text),
        }
        self.history.push(line);
        self.round_count += 1;
        self.latest_speaker = Some(side);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskDebateState {
    pub risky_history: Vec<String>,
    pub safe_history: Vec<String>,
    pub neutral_history: Vec<String>,
    pub history: Vec<String>,
    pub round_count: u32,
    pub latest_speaker: Option<RiskSpeaker>,
    pub judge_decision: Option<String>,
}

impl RiskDebateState {
    pub fn transcript(&self) -> String {
        self.history.join("\n\n")
    }

    pub fn turns_of(&self, speaker: RiskSpeaker) -> &[String] {
        match speaker {
            RiskSpeaker::Risky => &self.risky_history,
            RiskSpeaker::Safe => &self.safe_history,
            RiskSpeaker::Neutral => &self.neutral_history,
        }
    }

    fn record(&mut self, speaker: RiskSpeaker, text: String) {
        self.history.push(format!("{} Analyst: {}", speaker.as_str(), text));
        match speaker {
            RiskSpeaker::Risky => self.risky_history.push(text),
            RiskSpeaker::Safe => self.safe_history.push(text),
            RiskSpeaker::Neutral => self.neutral_history.push(text),
        }
        self.round_count += 1;
        self.latest_speaker = Some(speaker);
    }
}

/// Change produced by one stage step
#[derive(Debug, Clone, PartialEq)]
pub enum StateDelta {
    /// Append to the stage's ephemeral message history
    Messages(Vec<ChatMessage>),
    Report { role: String, text: String },
    Debate { side: DebateSide, text: String },
    ResearchDecision(String),
    TraderPlan(String),
    Risk { speaker: RiskSpeaker, text: String },
    FinalDecision(String),
}

/// One analyst's finished report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalystReport {
    pub role: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub symbol: String,
    pub trade_date: NaiveDate,
    /// Ephemeral sub-loop history, cleared at every stage boundary
    #[serde(skip)]
    pub messages: Vec<ChatMessage>,
    /// Analyst reports in the order the analysts ran
    pub reports: Vec<AnalystReport>,
    pub debate: DebateState,
    pub risk_debate: RiskDebateState,
    pub trader_plan: Option<String>,
    pub final_decision: Option<String>,
    /// Position context for the trader, when an exchange is attached
    pub position_summary: Option<String>,
}

impl RunState {
    pub fn new(symbol: impl Into<String>, trade_date: NaiveDate) -> Self {
        Self {
            symbol: symbol.into(),
            trade_date,
            messages: Vec::new(),
            reports: Vec::new(),
            debate: DebateState::default(),
            risk_debate: RiskDebateState::default(),
            trader_plan: None,
            final_decision: None,
            position_summary: None,
        }
    }

    pub fn report(&self, role: &str) -> Option<&str> {
        self.reports
            .iter()
            .find(|r| r.role == role)
            .map(|r| r.text.as_str())
    }

    /// All analyst reports, in run order, as one block
    pub fn reports_digest(&self) -> String {
        self.reports
            .iter()
            .map(|r| format!("## {} report\n{}", r.role, r.text))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// The last assistant content in the ephemeral history
    pub fn latest_content(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == crate::llm::Role::Assistant && !m.content.trim().is_empty())
            .map(|m| m.content.as_str())
    }

    pub fn clear_messages(&mut self) {
        self.messages.clear();
    }

    pub fn apply(&mut self, delta: StateDelta) -> Result<()> {
        match delta {
            StateDelta::Messages(mut msgs) => self.messages.append(&mut msgs),
            StateDelta::Report { role, text } => {
                if self.report(&role).is_some() {
                    return Err(DeskError::ReportAlreadyWritten(format!("{}_report", role)));
                }
                self.reports.push(AnalystReport { role, text });
            }
            StateDelta::Debate { side, text } => self.debate.record(side, text),
            StateDelta::ResearchDecision(text) => {
                set_once(&mut self.debate.judge_decision, text, "investment_plan")?
            }
            StateDelta::TraderPlan(text) => set_once(&mut self.trader_plan, text, "trader_plan")?,
            StateDelta::Risk { speaker, text } => self.risk_debate.record(speaker, text),
            StateDelta::FinalDecision(text) => {
                set_once(&mut self.risk_debate.judge_decision, text.clone(), "risk_judge_decision")?;
                set_once(&mut self.final_decision, text, "final_trade_decision")?;
            }
        }
        Ok(())
    }
}

fn set_once(slot: &mut Option<String>, text: String, field: &str) -> Result<()> {
    if slot.is_some() {
        return Err(DeskError::ReportAlreadyWritten(field.to_string()));
    }
    *slot = Some(text);
    Ok(())
}
