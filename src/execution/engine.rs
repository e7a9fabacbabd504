//! Position-aware execution under hedge mode.
//!
//! Long and short legs are independent. A directional action first flattens
//! the opposite leg, waits for the fill to settle, then opens the requested
//! leg unless it is already open. No pyramiding, no duplicate closes.
//!
//! The engine holds no lock across an `execute` call. Callers must serialize
//! runs per symbol.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::config::ExecutionConfig;
use crate::domain::{
    adjust_quantity, AccountBalance, CanonicalAction, OrderAck, OrderRequest, PositionBook,
    PositionSide,
};
use crate::error::Result;
use crate::exchange::ExchangeGateway;
use crate::retry::RetryPolicy;

use super::{ExecutionRequest, ExecutionResult};

/// Engine settings. `Default` is test mode.
#[derive(Debug, Clone)]
pub struct ExecutionSettings {
    pub test_mode: bool,
    pub settle_delay: Duration,
    pub post_trade_refresh: Duration,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            test_mode: true,
            settle_delay: Duration::from_secs(1),
            post_trade_refresh: Duration::from_secs(2),
        }
    }
}

impl From<&ExecutionConfig> for ExecutionSettings {
    fn from(cfg: &ExecutionConfig) -> Self {
        Self {
            test_mode: cfg.test_mode,
            settle_delay: Duration::from_millis(cfg.settle_delay_ms),
            post_trade_refresh: Duration::from_millis(cfg.post_trade_refresh_ms),
        }
    }
}

/// Result of one-time account preparation
#[derive(Debug, Clone, Default)]
pub struct SetupReport {
    pub hedge_mode: bool,
    pub leverage: bool,
    pub balance: Option<AccountBalance>,
    pub skipped: bool,
}

impl SetupReport {
    pub fn is_degraded(&self) -> bool {
        !self.skipped && !(self.hedge_mode && self.leverage)
    }
}

/// Orders placed so far within one `execute` call
#[derive(Default)]
struct Fills {
    count: u32,
    last: Option<OrderAck>,
}

impl Fills {
    fn record(&mut self, ack: OrderAck) {
        self.count += 1;
        self.last = Some(ack);
    }

    fn apply(&self, result: &mut ExecutionResult) {
        result.orders_placed = self.count;
        if let Some(ack) = &self.last {
            result.order_id = Some(ack.order_id.clone());
            result.fill_price = ack.avg_price;
        }
    }
}

pub struct ExecutionStateMachine {
    gateway: Arc<dyn ExchangeGateway>,
    retry: RetryPolicy,
    settings: ExecutionSettings,
    history: RwLock<Vec<ExecutionResult>>,
}

impl ExecutionStateMachine {
    pub fn new(gateway: Arc<dyn ExchangeGateway>, settings: ExecutionSettings, retry: RetryPolicy) -> Self {
        if settings.test_mode {
            info!("Execution engine in TEST mode: orders are simulated");
        } else {
            warn!("Execution engine in LIVE mode: orders reach the exchange");
        }
        Self {
            gateway,
            retry,
            settings,
            history: RwLock::new(Vec::new()),
        }
    }

    pub fn is_test_mode(&self) -> bool {
        self.settings.test_mode
    }

    pub fn gateway(&self) -> &Arc<dyn ExchangeGateway> {
        &self.gateway
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Successful results recorded so far
    pub async fn history(&self) -> Vec<ExecutionResult> {
        self.history.read().await.clone()
    }

    /// Enable hedge mode, set leverage and read the balance.
    ///
    /// Each step is attempted independently; failures are logged and leave
    /// the engine usable in degraded mode.
    pub async fn setup_account(&self, symbol: &str, leverage: u32) -> SetupReport {
        if self.settings.test_mode {
            info!(symbol, "Test mode: skipping account setup");
            return SetupReport {
                skipped: true,
                ..SetupReport::default()
            };
        }

        let mut report = SetupReport::default();

        match self
            .retry
            .run("set_hedge_mode", || self.gateway.set_hedge_mode(true))
            .await
        {
            Ok(()) => {
                info!("Hedge (dual-side) position mode enabled");
                report.hedge_mode = true;
            }
            Err(e) => warn!("Failed to enable hedge mode, continuing: {}", e),
        }

        match self
            .retry
            .run("set_leverage", || self.gateway.set_leverage(symbol, leverage))
            .await
        {
            Ok(()) => {
                info!(symbol, leverage, "Leverage set");
                report.leverage = true;
            }
            Err(e) => warn!(symbol, leverage, "Failed to set leverage, continuing: {}", e),
        }

        match self.retry.run("get_balance", || self.gateway.get_balance()).await {
            Ok(balance) => {
                info!(
                    available = %balance.available,
                    total = %balance.total,
                    "Account balance"
                );
                report.balance = Some(balance);
            }
            Err(e) => warn!("Failed to read balance, continuing: {}", e),
        }

        report
    }

    /// Execute an action given as text. Unknown actions yield a failed result.
    pub async fn execute_raw(
        &self,
        symbol: &str,
        action: &str,
        amount: Decimal,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
        reason: &str,
    ) -> ExecutionResult {
        match action.parse::<CanonicalAction>() {
            Ok(parsed) => {
                let request = ExecutionRequest::new(symbol, parsed, amount)
                    .with_protection(stop_loss, take_profit)
                    .with_reason(reason);
                self.execute(&request).await
            }
            Err(e) => {
                error!(symbol, action, "Unknown trading action");
                ExecutionResult::start(action, symbol, amount, reason, self.settings.test_mode)
                    .fail(e)
            }
        }
    }

    /// Drive the account toward the requested exposure
    pub async fn execute(&self, request: &ExecutionRequest) -> ExecutionResult {
        let result = ExecutionResult::start(
            request.action.as_str(),
            &request.symbol,
            request.amount,
            &request.reason,
            self.settings.test_mode,
        );

        info!(
            symbol = %request.symbol,
            action = %request.action,
            amount = %request.amount,
            reason = %request.reason,
            "Executing decision"
        );

        if request.action == CanonicalAction::Hold {
            info!("HOLD: no trade");
            return result.succeed("hold, no trade executed");
        }

        if self.settings.test_mode {
            info!(action = %request.action, "Test mode: simulated execution");
            return result.succeed(format!("test mode: simulated {}", request.action));
        }

        let book = match self.read_positions(&request.symbol).await {
            Ok(book) => book,
            Err(e) => {
                error!(symbol = %request.symbol, "Cannot read position, aborting execution: {}", e);
                return result.fail(format!("failed to read position: {}", e));
            }
        };
        debug!(?book, "Current position");

        let result = match request.action {
            CanonicalAction::Buy => self.enter(request, PositionSide::Long, &book, result).await,
            CanonicalAction::Sell => self.enter(request, PositionSide::Short, &book, result).await,
            CanonicalAction::CloseLong => self.exit(request, PositionSide::Long, &book, result).await,
            CanonicalAction::CloseShort => self.exit(request, PositionSide::Short, &book, result).await,
            CanonicalAction::Hold => result.succeed("hold, no trade executed"),
        };

        if result.success && result.orders_placed > 0 {
            self.history.write().await.push(result.clone());
        }
        result
    }

    /// Close every open leg of `symbol`
    pub async fn close_all(&self, symbol: &str, reason: &str) -> Vec<ExecutionResult> {
        let mut results = Vec::with_capacity(2);
        for action in [CanonicalAction::CloseLong, CanonicalAction::CloseShort] {
            let request = ExecutionRequest::new(symbol, action, Decimal::ZERO).with_reason(reason);
            results.push(self.execute(&request).await);
        }
        results
    }

    pub async fn read_positions(&self, symbol: &str) -> Result<PositionBook> {
        let positions = self
            .retry
            .run("get_positions", || self.gateway.get_positions(symbol))
            .await?;
        Ok(PositionBook::from_positions(positions))
    }

    /// BUY / SELL: flatten the opposite leg, then open `side` unless already open
    async fn enter(
        &self,
        request: &ExecutionRequest,
        side: PositionSide,
        book: &PositionBook,
        mut result: ExecutionResult,
    ) -> ExecutionResult {
        let symbol = request.symbol.as_str();
        let mut fills = Fills::default();
        let mut steps: Vec<String> = Vec::new();

        if let Some(opposite) = book.side(side.opposite()) {
            let size = opposite.size;
            info!(symbol, side = %side.opposite(), %size, "Closing opposite leg");
            match self.submit(OrderRequest::close(symbol, side.opposite(), size)).await {
                Ok(ack) => {
                    fills.record(ack);
                    steps.push(format!("closed {} {}", side.opposite(), size));
                    tokio::time::sleep(self.settings.settle_delay).await;
                }
                Err(e) => {
                    error!(symbol, "Failed to close {} leg: {}", side.opposite(), e);
                    fills.apply(&mut result);
                    return result.fail(format!("failed to close {}: {}", side.opposite(), e));
                }
            }
        }

        if book.side(side).is_some() {
            info!(symbol, %side, "Already {}, not pyramiding", side);
            steps.push(format!("already {}, not pyramiding", side));
            fills.apply(&mut result);
            if fills.count > 0 {
                self.refresh(symbol, side, &mut result).await;
            }
            return result.succeed(steps.join("; "));
        }

        let quantity = adjust_quantity(symbol, request.amount);
        if quantity <= Decimal::ZERO {
            warn!(symbol, amount = %request.amount, "Order amount rounds to zero");
            fills.apply(&mut result);
            steps.push(format!("amount {} below minimum step", request.amount));
            return result.fail(steps.join("; "));
        }

        info!(symbol, %side, %quantity, "Opening leg");
        match self.submit(OrderRequest::open(symbol, side, quantity)).await {
            Ok(ack) => {
                fills.record(ack);
                steps.push(format!("opened {} {}", side, quantity));
            }
            Err(e) => {
                error!(symbol, "Failed to open {} leg: {}", side, e);
                fills.apply(&mut result);
                steps.push(format!("failed to open {}: {}", side, e));
                return result.fail(steps.join("; "));
            }
        }

        fills.apply(&mut result);
        self.protect(request, side, quantity, &mut result).await;
        self.refresh(symbol, side, &mut result).await;
        info!(symbol, orders = result.orders_placed, "Execution complete");
        result.succeed(steps.join("; "))
    }

    /// CLOSE_LONG / CLOSE_SHORT: flatten `side` if it is open
    async fn exit(
        &self,
        request: &ExecutionRequest,
        side: PositionSide,
        book: &PositionBook,
        mut result: ExecutionResult,
    ) -> ExecutionResult {
        let symbol = request.symbol.as_str();
        let Some(open) = book.side(side) else {
            info!(symbol, %side, "No {} position to close", side);
            return result.succeed(format!("no {} position to close", side));
        };

        let size = open.size;
        result.amount = size;
        match self.submit(OrderRequest::close(symbol, side, size)).await {
            Ok(ack) => {
                let mut fills = Fills::default();
                fills.record(ack);
                fills.apply(&mut result);
                self.refresh(symbol, side, &mut result).await;
                info!(symbol, %side, %size, "Leg closed");
                result.succeed(format!("closed {} {}", side, size))
            }
            Err(e) => {
                error!(symbol, "Failed to close {} leg: {}", side, e);
                result.fail(format!("failed to close {}: {}", side, e))
            }
        }
    }

    async fn submit(&self, order: OrderRequest) -> Result<OrderAck> {
        let ack = self
            .retry
            .run("place_order", || self.gateway.place_order(&order))
            .await?;
        debug!(
            order_id = %ack.order_id,
            status = %ack.status,
            kind = order.kind.as_str(),
            side = %order.side,
            position_side = %order.position_side,
            quantity = %order.quantity,
            "Order accepted"
        );
        Ok(ack)
    }

    /// Attach stop-loss / take-profit to the freshly opened leg.
    ///
    /// Failures downgrade to warnings on `result`; the opening order stands.
    async fn protect(
        &self,
        request: &ExecutionRequest,
        side: PositionSide,
        opened: Decimal,
        result: &mut ExecutionResult,
    ) {
        if request.stop_loss.is_none() && request.take_profit.is_none() {
            return;
        }
        let symbol = request.symbol.as_str();

        tokio::time::sleep(self.settings.settle_delay).await;
        let size = match self.read_positions(symbol).await {
            Ok(book) => book.side(side).map(|p| p.size).unwrap_or(opened),
            Err(e) => {
                warn!(symbol, "Position refresh before protection failed, sizing to order: {}", e);
                opened
            }
        };

        if let Some(stop) = request.stop_loss {
            match self.submit(OrderRequest::stop_loss(symbol, side, size, stop)).await {
                Ok(_) => info!(symbol, %side, %stop, "Stop-loss attached"),
                Err(e) => {
                    warn!(symbol, %side, %stop, "Failed to attach stop-loss: {}", e);
                    result.warnings.push(format!("stop-loss at {} not placed: {}", stop, e));
                }
            }
        }

        if let Some(target) = request.take_profit {
            match self.submit(OrderRequest::take_profit(symbol, side, size, target)).await {
                Ok(_) => info!(symbol, %side, %target, "Take-profit attached"),
                Err(e) => {
                    warn!(symbol, %side, %target, "Failed to attach take-profit: {}", e);
                    result.warnings.push(format!("take-profit at {} not placed: {}", target, e));
                }
            }
        }
    }

    async fn refresh(&self, symbol: &str, side: PositionSide, result: &mut ExecutionResult) {
        tokio::time::sleep(self.settings.post_trade_refresh).await;
        match self.read_positions(symbol).await {
            Ok(book) => result.new_position = book.side(side).cloned(),
            Err(e) => warn!(symbol, "Post-trade position refresh failed: {}", e),
        }
    }
}
