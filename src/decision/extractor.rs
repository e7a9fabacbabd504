//! Free-text decision to canonical action.
//!
//! Producing stages end their text with `**FINAL DECISION: <VERDICT>**`.
//! Text without the marker falls back to an uppercase keyword scan, bullish
//! words checked first. Nothing found means HOLD.

use serde::{Deserialize, Serialize};

use crate::domain::CanonicalAction;

/// Marker prefixes, English first
const MARKER_PREFIXES: &[&str] = &["**FINAL DECISION:", "**最终决策:", "**最终决策："];

/// Keywords checked in order when no marker is present
const BULLISH_KEYWORDS: &[&str] = &["BUY", "LONG", "做多"];
const BEARISH_KEYWORDS: &[&str] = &["SELL", "SHORT", "做空"];

/// What the decision text asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Buy,
    Sell,
    Hold,
    /// Flatten both sides
    Close,
    CloseLong,
    CloseShort,
}

impl Verdict {
    pub fn parse(token: &str) -> Option<Self> {
        let normalized = token.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "BUY" | "LONG" => Some(Verdict::Buy),
            "SELL" | "SHORT" => Some(Verdict::Sell),
            "HOLD" | "WAIT" => Some(Verdict::Hold),
            "CLOSE" | "CLOSE_ALL" => Some(Verdict::Close),
            "CLOSE_LONG" => Some(Verdict::CloseLong),
            "CLOSE_SHORT" => Some(Verdict::CloseShort),
            _ => None,
        }
    }

    /// Canonical actions to execute, in order
    pub fn actions(self) -> Vec<CanonicalAction> {
        match self {
            Verdict::Buy => vec![CanonicalAction::Buy],
            Verdict::Sell => vec![CanonicalAction::Sell],
            Verdict::Hold => vec![CanonicalAction::Hold],
            Verdict::Close => vec![CanonicalAction::CloseLong, CanonicalAction::CloseShort],
            Verdict::CloseLong => vec![CanonicalAction::CloseLong],
            Verdict::CloseShort => vec![CanonicalAction::CloseShort],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Buy => "BUY",
            Verdict::Sell => "SELL",
            Verdict::Hold => "HOLD",
            Verdict::Close => "CLOSE",
            Verdict::CloseLong => "CLOSE_LONG",
            Verdict::CloseShort => "CLOSE_SHORT",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<CanonicalAction> for Verdict {
    fn from(action: CanonicalAction) -> Self {
        match action {
            CanonicalAction::Buy => Verdict::Buy,
            CanonicalAction::Sell => Verdict::Sell,
            CanonicalAction::Hold => Verdict::Hold,
            CanonicalAction::CloseLong => Verdict::CloseLong,
            CanonicalAction::CloseShort => Verdict::CloseShort,
        }
    }
}

/// How the verdict was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    Marker,
    Keyword,
    Default,
}

/// Extracted decision. `text` is the input, unmodified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub verdict: Verdict,
    pub source: SignalSource,
    pub text: String,
}

impl Signal {
    pub fn actions(&self) -> Vec<CanonicalAction> {
        self.verdict.actions()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SignalExtractor;

impl SignalExtractor {
    pub fn extract(text: &str) -> Signal {
        let (verdict, source) = match Self::find_marker(text) {
            Some(v) => (v, SignalSource::Marker),
            None => match Self::scan_keywords(text) {
                Some(v) => (v, SignalSource::Keyword),
                None => (Verdict::Hold, SignalSource::Default),
            },
        };
        Signal {
            verdict,
            source,
            text: text.to_string(),
        }
    }

    /// Last well-formed marker in `text`
    pub fn find_marker(text: &str) -> Option<Verdict> {
        let mut found: Option<(usize, Verdict)> = None;
        for prefix in MARKER_PREFIXES {
            let mut from = 0;
            while let Some(offset) = text[from..].find(prefix) {
                let start = from + offset;
                let body_start = start + prefix.len();
                from = body_start;
                let Some(end) = text[body_start..].find("**") else {
                    break;
                };
                let token = &text[body_start..body_start + end];
                if let Some(verdict) = Verdict::parse(token) {
                    if found.map_or(true, |(pos, _)| start > pos) {
                        found = Some((start, verdict));
                    }
                }
            }
        }
        found.map(|(_, v)| v)
    }

    /// Bullish keywords win when both sides appear
    pub fn scan_keywords(text: &str) -> Option<Verdict> {
        if BULLISH_KEYWORDS.iter().any(|k| text.contains(k)) {
            return Some(Verdict::Buy);
        }
        if BEARISH_KEYWORDS.iter().any(|k| text.contains(k)) {
            return Some(Verdict::Sell);
        }
        None
    }
}
