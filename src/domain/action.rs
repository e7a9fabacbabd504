use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::PositionSide;

/// Canonical trading action derived from decision text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CanonicalAction {
    /// Go (or stay) long
    Buy,
    /// Go (or stay) short
    Sell,
    /// Do nothing
    Hold,
    CloseLong,
    CloseShort,
}

impl CanonicalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalAction::Buy => "BUY",
            CanonicalAction::Sell => "SELL",
            CanonicalAction::Hold => "HOLD",
            CanonicalAction::CloseLong => "CLOSE_LONG",
            CanonicalAction::CloseShort => "CLOSE_SHORT",
        }
    }

    /// Side this action opens, if any
    pub fn opens(&self) -> Option<PositionSide> {
        match self {
            CanonicalAction::Buy => Some(PositionSide::Long),
            CanonicalAction::Sell => Some(PositionSide::Short),
            _ => None,
        }
    }

    /// Side this action closes outright, if any
    pub fn closes(&self) -> Option<PositionSide> {
        match self {
            CanonicalAction::CloseLong => Some(PositionSide::Long),
            CanonicalAction::CloseShort => Some(PositionSide::Short),
            _ => None,
        }
    }

    pub fn is_mutating(&self) -> bool {
        !matches!(self, CanonicalAction::Hold)
    }
}

impl std::fmt::Display for CanonicalAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CanonicalAction {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().replace(['-', ' '], "_").as_str() {
            "BUY" | "LONG" => Ok(CanonicalAction::Buy),
            "SELL" | "SHORT" => Ok(CanonicalAction::Sell),
            "HOLD" | "WAIT" => Ok(CanonicalAction::Hold),
            "CLOSE_LONG" => Ok(CanonicalAction::CloseLong),
            "CLOSE_SHORT" => Ok(CanonicalAction::CloseShort),
            other => Err(format!("unknown trading action: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_aliases_and_case() {
        assert_eq!("buy".parse::<CanonicalAction>(), Ok(CanonicalAction::Buy));
        assert_eq!("close-long".parse::<CanonicalAction>(), Ok(CanonicalAction::CloseLong));
        assert_eq!(" Short ".parse::<CanonicalAction>(), Ok(CanonicalAction::Sell));
        assert!("pyramid".parse::<CanonicalAction>().is_err());
    }

    #[test]
    fn serializes_screaming_snake() {
        let json = serde_json::to_string(&CanonicalAction::CloseShort).unwrap();
        assert_eq!(json, "\"CLOSE_SHORT\"");
    }
}
