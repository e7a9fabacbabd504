//! Machine-readable decision record appended by judge and trader stages.
//!
//! Preferred form is a fenced JSON block:
//!
//! ```text
//! {"action":"BUY","confidence":0.8,"stop_loss":61000,"take_profit":68000,
//!  "leverage":5,"position_size_pct":30,"reason":"..."}
//! ```
//!
//! When no block parses, levels are scanned from the prose.

use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::Verdict;

pub const DEFAULT_CONFIDENCE: f64 = 0.7;
pub const MIN_LEVERAGE: u32 = 1;
pub const MAX_LEVERAGE: u32 = 125;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordSource {
    Json,
    Prose,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredDecision {
    pub action: Verdict,
    /// 0.0 ..= 1.0
    pub confidence: f64,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    /// Already clamped to 1..=125
    pub leverage: Option<u32>,
    /// 0 ..= 100
    pub position_size_pct: Option<Decimal>,
    pub reason: String,
    pub source: RecordSource,
}

impl StructuredDecision {
    /// JSON record if present, otherwise prose scan with `fallback` as action
    pub fn extract(text: &str, fallback: Verdict) -> Self {
        Self::parse(text).unwrap_or_else(|| Self::from_prose(text, fallback))
    }

    /// Parse the JSON record. `None` when absent or without a valid action.
    pub fn parse(text: &str) -> Option<Self> {
        let candidate = extract_json(text)?;
        let value: Value = match serde_json::from_str(candidate) {
            Ok(v) => v,
            Err(e) => {
                debug!("Decision block is not valid JSON: {}", e);
                return None;
            }
        };
        let obj = value.as_object()?;
        let action = obj.get("action").and_then(Value::as_str).and_then(Verdict::parse)?;

        let confidence = obj
            .get("confidence")
            .and_then(number)
            .and_then(|d| d.to_f64())
            .map(normalize_confidence)
            .unwrap_or(DEFAULT_CONFIDENCE);

        let leverage = obj
            .get("leverage")
            .and_then(number)
            .and_then(|d| d.trunc().to_u32())
            .map(|l| clamp_leverage(l, MIN_LEVERAGE, MAX_LEVERAGE));

        Some(Self {
            action,
            confidence,
            stop_loss: obj.get("stop_loss").and_then(number).filter(|d| *d > Decimal::ZERO),
            take_profit: obj.get("take_profit").and_then(number).filter(|d| *d > Decimal::ZERO),
            leverage,
            position_size_pct: obj.get("position_size_pct").and_then(number).map(clamp_pct),
            reason: obj
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            source: RecordSource::Json,
        })
    }

    /// Scan `label: number` pairs out of free text
    pub fn from_prose(text: &str, action: Verdict) -> Self {
        let lower = text.to_ascii_lowercase();

        let confidence = scan_number(&lower, &["confidence", "置信度", "信心"])
            .and_then(|d| d.to_f64())
            .map(normalize_confidence)
            .unwrap_or(DEFAULT_CONFIDENCE);

        let leverage = scan_number(&lower, &["leverage", "杠杆"])
            .and_then(|d| d.trunc().to_u32())
            .map(|l| clamp_leverage(l, MIN_LEVERAGE, MAX_LEVERAGE));

        Self {
            action,
            confidence,
            stop_loss: scan_number(&lower, &["stop-loss", "stop loss", "stop_loss", "止损"])
                .filter(|d| *d > Decimal::ZERO),
            take_profit: scan_number(&lower, &["take-profit", "take profit", "take_profit", "止盈"])
                .filter(|d| *d > Decimal::ZERO),
            leverage,
            position_size_pct: scan_number(&lower, &["position size", "position_size", "仓位"]).map(clamp_pct),
            reason: String::new(),
            source: RecordSource::Prose,
        }
    }
}

/// Clamp an LLM-suggested leverage into `min..=max`; zero means `min`
pub fn clamp_leverage(suggested: u32, min: u32, max: u32) -> u32 {
    if suggested == 0 {
        return min;
    }
    suggested.clamp(min, max.max(min))
}

fn clamp_pct(pct: Decimal) -> Decimal {
    pct.max(Decimal::ZERO).min(Decimal::ONE_HUNDRED)
}

/// Values above 1 are read as percentages
fn normalize_confidence(raw: f64) -> f64 {
    let c = if raw > 1.0 { raw / 100.0 } else { raw };
    c.clamp(0.0, 1.0)
}

fn number(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .ok()
            .or_else(|| n.as_f64().and_then(Decimal::from_f64_retain)),
        Value::String(s) => parse_leading_number(s.trim_start_matches('$')),
        _ => None,
    }
}

/// JSON object inside a ```json fence, a bare fence, or the outermost braces
fn extract_json(text: &str) -> Option<&str> {
    if let Some(start) = text.rfind("```json") {
        if let Some(end) = text[start + 7..].find("```") {
            return Some(text[start + 7..start + 7 + end].trim());
        }
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// First number within a short distance after any of `labels`
fn scan_number(lower: &str, labels: &[&str]) -> Option<Decimal> {
    for label in labels {
        let mut from = 0;
        while let Some(offset) = lower[from..].find(label) {
            let after = from + offset + label.len();
            from = after;
            let rest = &lower[after..];
            let skipped = rest
                .char_indices()
                .take_while(|(_, c)| matches!(c, ' ' | ':' | '：' | '*' | '=' | '$' | '\t' | '"'))
                .last()
                .map(|(i, c)| i + c.len_utf8())
                .unwrap_or(0);
            if let Some(n) = parse_leading_number(&rest[skipped..]) {
                return Some(n);
            }
        }
    }
    None
}

/// Digits at the start of `s`, allowing thousands separators
fn parse_leading_number(s: &str) -> Option<Decimal> {
    let digits: String = s
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .filter(|c| *c != ',')
        .collect();
    let digits = digits.trim_end_matches('.');
    if digits.is_empty() {
        return None;
    }
    Decimal::from_str(digits).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn parses_fenced_record() {
        let text = r#"Analysis...
```json
{"action": "SELL", "confidence": 0.82, "stop_loss": 68500, "take_profit": "61,000",
 "leverage": 200, "position_size_pct": 30, "reason": "breakdown"}
```
**FINAL DECISION: SELL**"#;
        let d = StructuredDecision::parse(text).unwrap();
        assert_eq!(d.action, Verdict::Sell);
        assert!((d.confidence - 0.82).abs() < 1e-9);
        assert_eq!(d.stop_loss, Some(dec!(68500)));
        assert_eq!(d.take_profit, Some(dec!(61000)));
        assert_eq!(d.leverage, Some(125));
        assert_eq!(d.position_size_pct, Some(dec!(30)));
        assert_eq!(d.reason, "breakdown");
        assert_eq!(d.source, RecordSource::Json);
    }

    #[test]
    fn record_without_action_is_ignored() {
        assert!(StructuredDecision::parse(r#"{"confidence": 0.9}"#).is_none());
        assert!(StructuredDecision::parse("no json here").is_none());
    }

    #[test]
    fn prose_fallback_scans_levels() {
        let text = "**Confidence**: 78%\nStop loss: $61,250.5\nTake profit at 66000\nLeverage: 8x\nPosition size: 150%";
        let d = StructuredDecision::extract(text, Verdict::Buy);
        assert_eq!(d.source, RecordSource::Prose);
        assert_eq!(d.action, Verdict::Buy);
        assert!((d.confidence - 0.78).abs() < 1e-9);
        assert_eq!(d.stop_loss, Some(dec!(61250.5)));
        assert_eq!(d.take_profit, None);
        assert_eq!(d.leverage, Some(8));
        assert_eq!(d.position_size_pct, Some(dec!(100)));
    }

    #[test]
    fn prose_defaults() {
        let d = StructuredDecision::from_prose("nothing useful", Verdict::Hold);
        assert_eq!(d.confidence, DEFAULT_CONFIDENCE);
        assert_eq!(d.leverage, None);
        assert_eq!(d.stop_loss, None);
    }

    #[test]
    fn leverage_clamping() {
        assert_eq!(clamp_leverage(0, 1, 125), 1);
        assert_eq!(clamp_leverage(300, 1, 125), 125);
        assert_eq!(clamp_leverage(20, 5, 10), 10);
        assert_eq!(clamp_leverage(7, 5, 10), 7);
    }
}
