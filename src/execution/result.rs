use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{CanonicalAction, Position};

/// What the engine should do for one decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub symbol: String,
    pub action: CanonicalAction,
    /// Base-asset amount for a newly opened position
    pub amount: Decimal,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub reason: String,
}

impl ExecutionRequest {
    pub fn new(symbol: impl Into<String>, action: CanonicalAction, amount: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            action,
            amount,
            stop_loss: None,
            take_profit: None,
            reason: String::new(),
        }
    }

    pub fn with_protection(mut self, stop_loss: Option<Decimal>, take_profit: Option<Decimal>) -> Self {
        self.stop_loss = stop_loss.filter(|p| *p > Decimal::ZERO);
        self.take_profit = take_profit.filter(|p| *p > Decimal::ZERO);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }
}

/// Outcome of one `execute` call. Failures are reported here, never raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    /// Action as requested (raw text when it did not parse)
    pub action: String,
    pub symbol: String,
    pub amount: Decimal,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub reason: String,
    pub test_mode: bool,
    /// Id of the last order placed, if any
    pub order_id: Option<String>,
    pub fill_price: Option<Decimal>,
    /// Number of position-changing orders placed
    pub orders_placed: u32,
    /// Snapshot of the targeted side after the action
    pub new_position: Option<Position>,
    /// Degraded-success notes (e.g. protective order failures)
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl ExecutionResult {
    pub(crate) fn start(action: &str, symbol: &str, amount: Decimal, reason: &str, test_mode: bool) -> Self {
        Self {
            success: false,
            action: action.to_string(),
            symbol: symbol.to_string(),
            amount,
            timestamp: Utc::now(),
            message: String::new(),
            reason: reason.to_string(),
            test_mode,
            order_id: None,
            fill_price: None,
            orders_placed: 0,
            new_position: None,
            warnings: Vec::new(),
        }
    }

    pub(crate) fn succeed(mut self, message: impl Into<String>) -> Self {
        self.success = true;
        self.message = message.into();
        self
    }

    pub(crate) fn fail(mut self, message: impl Into<String>) -> Self {
        self.success = false;
        self.message = message.into();
        self
    }

    /// True when the call succeeded without touching the exchange
    pub fn is_noop(&self) -> bool {
        self.success && self.orders_placed == 0
    }
}

impl std::fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {} {} {}: {}",
            if self.success { "OK" } else { "FAIL" },
            self.action,
            self.amount,
            self.symbol,
            self.message
        )?;
        if let Some(id) = &self.order_id {
            write!(f, " (order {})", id)?;
        }
        for w in &self.warnings {
            write!(f, " [warn: {}]", w)?;
        }
        Ok(())
    }
}
