//! In-memory gateways shared by the integration tests.
#![allow(dead_code)]

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use deskagents::domain::{
    AccountBalance, FundingRate, Kline, OrderAck, OrderBook, OrderKind, OrderRequest, Position,
    PositionSide, Ticker,
};
use deskagents::error::{DeskError, Result};
use deskagents::exchange::ExchangeGateway;
use deskagents::llm::{ChatMessage, LlmGateway, LlmResponse, ModelTier, ToolSpec};

pub fn position(side: PositionSide, size: Decimal) -> Position {
    Position {
        symbol: "BTC/USDT".to_string(),
        side,
        size,
        entry_price: dec!(60000),
        unrealized_pnl: Decimal::ZERO,
        leverage: 10,
        liquidation_price: Decimal::ZERO,
    }
}

/// Exchange double that fills market orders instantly and logs every call
#[derive(Default)]
pub struct FakeExchange {
    positions: Mutex<Vec<Position>>,
    calls: Mutex<Vec<String>>,
    orders: Mutex<Vec<OrderRequest>>,
    failing_kinds: Mutex<Vec<OrderKind>>,
    fail_position_reads: Mutex<bool>,
    kline_outages: Mutex<u32>,
}

impl FakeExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_position(self, side: PositionSide, size: Decimal) -> Self {
        self.positions.lock().unwrap().push(position(side, size));
        self
    }

    pub fn failing(self, kind: OrderKind) -> Self {
        self.failing_kinds.lock().unwrap().push(kind);
        self
    }

    pub fn failing_position_reads(self) -> Self {
        *self.fail_position_reads.lock().unwrap() = true;
        self
    }

    /// The next `n` kline reads fail with a 503
    pub fn kline_outages(self, n: u32) -> Self {
        *self.kline_outages.lock().unwrap() = n;
        self
    }

    pub fn orders(&self) -> Vec<OrderRequest> {
        self.orders.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls that change account state
    pub fn mutating_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| {
                c.starts_with("place_order") || c.starts_with("set_leverage") || c.starts_with("set_hedge_mode")
            })
            .collect()
    }

    pub fn size(&self, side: PositionSide) -> Decimal {
        self.positions
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.side == side)
            .map(|p| p.size)
            .sum()
    }

    fn log(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn fill(&self, order: &OrderRequest) {
        if order.kind != OrderKind::Market {
            return;
        }
        let mut positions = self.positions.lock().unwrap();
        let closing = order.is_closing();
        match positions.iter_mut().find(|p| p.side == order.position_side) {
            Some(p) if closing => p.size = (p.size - order.quantity).max(Decimal::ZERO),
            Some(p) => p.size += order.quantity,
            None if !closing => positions.push(position(order.position_side, order.quantity)),
            None => {}
        }
        positions.retain(|p| p.size > Decimal::ZERO);
    }
}

#[async_trait]
impl ExchangeGateway for FakeExchange {
    fn name(&self) -> &str {
        "fake"
    }

    async fn get_positions(&self, symbol: &str) -> Result<Vec<Position>> {
        self.log(format!("get_positions {}", symbol));
        if *self.fail_position_reads.lock().unwrap() {
            return Err(DeskError::Auth("invalid api key".into()));
        }
        Ok(self.positions.lock().unwrap().clone())
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()> {
        self.log(format!("set_leverage {} {}", symbol, leverage));
        Ok(())
    }

    async fn set_hedge_mode(&self, enabled: bool) -> Result<()> {
        self.log(format!("set_hedge_mode {}", enabled));
        Ok(())
    }

    async fn get_balance(&self) -> Result<AccountBalance> {
        self.log("get_balance".into());
        Ok(AccountBalance {
            asset: "USDT".into(),
            total: dec!(1000),
            available: dec!(800),
            unrealized_pnl: Decimal::ZERO,
        })
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck> {
        self.log(format!(
            "place_order {} {} {} {}",
            order.kind.as_str(),
            order.side,
            order.position_side,
            order.quantity
        ));
        if self.failing_kinds.lock().unwrap().contains(&order.kind) {
            return Err(DeskError::Exchange(format!("{} rejected", order.kind.as_str())));
        }
        self.orders.lock().unwrap().push(order.clone());
        self.fill(order);
        let n = self.orders.lock().unwrap().len();
        Ok(OrderAck {
            order_id: format!("ord-{}", n),
            status: "FILLED".into(),
            executed_qty: order.quantity,
            avg_price: Some(dec!(60000)),
        })
    }

    async fn get_ticker(&self, symbol: &str) -> Result<Ticker> {
        self.log(format!("get_ticker {}", symbol));
        Ok(Ticker {
            symbol: symbol.to_string(),
            last: dec!(60000),
            high_24h: dec!(61000),
            low_24h: dec!(59000),
            volume_24h: dec!(12345),
            change_pct_24h: dec!(1.5),
            timestamp: Utc::now(),
        })
    }

    async fn get_klines(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Kline>> {
        self.log(format!("get_klines {} {} {}", symbol, interval, limit));
        {
            let mut outages = self.kline_outages.lock().unwrap();
            if *outages > 0 {
                *outages -= 1;
                return Err(DeskError::Exchange("HTTP 503 Service Unavailable".into()));
            }
        }
        Ok((0..limit.min(60))
            .map(|i| {
                let close = dec!(60000) + Decimal::from(i);
                Kline {
                    open_time: Utc.timestamp_opt(1_700_000_000 + i64::from(i) * 3600, 0).unwrap(),
                    open: close,
                    high: close,
                    low: close,
                    close,
                    volume: dec!(10),
                }
            })
            .collect())
    }

    async fn get_funding_rate(&self, symbol: &str) -> Result<FundingRate> {
        Ok(FundingRate {
            symbol: symbol.to_string(),
            rate: dec!(0.0001),
            mark_price: dec!(60000),
            next_funding_time: Utc::now(),
        })
    }

    async fn get_order_book(&self, _symbol: &str, _depth: u32) -> Result<OrderBook> {
        Ok(OrderBook::default())
    }
}

type Script = Box<dyn Fn(&[ChatMessage], &[ToolSpec]) -> Result<LlmResponse> + Send + Sync>;

/// LLM double answering from a closure and recording every prompt
pub struct ScriptedLlm {
    script: Script,
    calls: Mutex<Vec<(ModelTier, Vec<ChatMessage>)>>,
}

impl ScriptedLlm {
    pub fn new(
        script: impl Fn(&[ChatMessage], &[ToolSpec]) -> Result<LlmResponse> + Send + Sync + 'static,
    ) -> Self {
        Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(ModelTier, Vec<ChatMessage>)> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of calls whose first message starts with `prefix`
    pub fn count_prompts(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, msgs)| msgs.first().map(|m| m.content.starts_with(prefix)).unwrap_or(false))
            .count()
    }
}

#[async_trait]
impl LlmGateway for ScriptedLlm {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        tier: ModelTier,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<LlmResponse> {
        self.calls.lock().unwrap().push((tier, messages.to_vec()));
        (self.script)(messages, tools)
    }
}
