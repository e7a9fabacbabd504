use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use serde_json::{json, Value};

use crate::domain::{FundingRate, Kline, OrderBook, Ticker};
use crate::error::Result;
use crate::exchange::ExchangeGateway;
use crate::execution::ExecutionStateMachine;
use crate::llm::ToolSpec;
use crate::retry::RetryPolicy;

use super::indicators::{ema, macd, rsi, sma};
use super::{arg_str, arg_u32, Tool};
use super::{
    GET_CRYPTO_DATA, GET_CRYPTO_INDICATORS, GET_FUNDING_RATE, GET_MARKET_INFO, GET_ORDER_BOOK,
    GET_POSITION_SUMMARY,
};

const DEFAULT_KLINE_LIMIT: u32 = 100;
const MAX_KLINE_LIMIT: u32 = 500;
const INDICATOR_HISTORY: u32 = 200;
const DEFAULT_BOOK_DEPTH: u32 = 20;

fn symbol_schema(extra: Value) -> Value {
    let mut properties = json!({
        "symbol": {"type": "string", "description": "Trading pair, e.g. BTC/USDT"}
    });
    if let (Some(props), Some(extra)) = (properties.as_object_mut(), extra.as_object()) {
        for (k, v) in extra {
            props.insert(k.clone(), v.clone());
        }
    }
    json!({"type": "object", "properties": properties})
}

/// Exchange reads shared by the data tools, each under the retry policy
#[derive(Clone)]
pub struct MarketFeed {
    gateway: Arc<dyn ExchangeGateway>,
    retry: RetryPolicy,
}

impl MarketFeed {
    pub fn new(gateway: Arc<dyn ExchangeGateway>, retry: RetryPolicy) -> Self {
        Self { gateway, retry }
    }

    async fn klines(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Kline>> {
        self.retry
            .run("get_klines", || self.gateway.get_klines(symbol, interval, limit))
            .await
    }

    async fn funding_rate(&self, symbol: &str) -> Result<FundingRate> {
        self.retry
            .run("get_funding_rate", || self.gateway.get_funding_rate(symbol))
            .await
    }

    async fn order_book(&self, symbol: &str, depth: u32) -> Result<OrderBook> {
        self.retry
            .run("get_order_book", || self.gateway.get_order_book(symbol, depth))
            .await
    }

    async fn ticker(&self, symbol: &str) -> Result<Ticker> {
        self.retry.run("get_ticker", || self.gateway.get_ticker(symbol)).await
    }
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map(|v| format!("{:.4}", v)).unwrap_or_else(|| "n/a".to_string())
}

/// OHLCV candles
pub struct CryptoDataTool {
    feed: MarketFeed,
    symbol: String,
    interval: String,
}

impl CryptoDataTool {
    pub fn new(feed: MarketFeed, symbol: &str, interval: &str) -> Self {
        Self {
            feed,
            symbol: symbol.to_string(),
            interval: interval.to_string(),
        }
    }
}

#[async_trait]
impl Tool for CryptoDataTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: GET_CRYPTO_DATA.to_string(),
            description: "Recent OHLCV candles for a crypto perpetual".to_string(),
            parameters: symbol_schema(json!({
                "interval": {"type": "string", "description": "Candle interval, e.g. 1h, 4h, 1d"},
                "limit": {"type": "integer", "description": "Number of candles (max 500)"}
            })),
        }
    }

    async fn call(&self, args: &Value) -> Result<String> {
        let symbol = arg_str(args, "symbol").unwrap_or(&self.symbol);
        let interval = arg_str(args, "interval").unwrap_or(&self.interval);
        let limit = arg_u32(args, "limit")
            .unwrap_or(DEFAULT_KLINE_LIMIT)
            .clamp(1, MAX_KLINE_LIMIT);

        let klines = self.feed.klines(symbol, interval, limit).await?;
        let mut out = format!("{} {} candles ({}):\n", symbol, interval, klines.len());
        out.push_str("time,open,high,low,close,volume\n");
        for k in &klines {
            let _ = writeln!(
                out,
                "{},{},{},{},{},{}",
                k.open_time.format("%Y-%m-%d %H:%M"),
                k.open,
                k.high,
                k.low,
                k.close,
                k.volume
            );
        }
        Ok(out)
    }
}

/// SMA / EMA / MACD / RSI computed from recent candles
pub struct IndicatorsTool {
    feed: MarketFeed,
    symbol: String,
    interval: String,
}

impl IndicatorsTool {
    pub fn new(feed: MarketFeed, symbol: &str, interval: &str) -> Self {
        Self {
            feed,
            symbol: symbol.to_string(),
            interval: interval.to_string(),
        }
    }
}

#[async_trait]
impl Tool for IndicatorsTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: GET_CRYPTO_INDICATORS.to_string(),
            description: "Technical indicators (SMA20/50, EMA12/26, MACD, RSI14)".to_string(),
            parameters: symbol_schema(json!({
                "interval": {"type": "string", "description": "Candle interval"}
            })),
        }
    }

    async fn call(&self, args: &Value) -> Result<String> {
        let symbol = arg_str(args, "symbol").unwrap_or(&self.symbol);
        let interval = arg_str(args, "interval").unwrap_or(&self.interval);

        let klines = self.feed.klines(symbol, interval, INDICATOR_HISTORY).await?;
        let closes: Vec<f64> = klines.iter().filter_map(|k| k.close.to_f64()).collect();

        let mut out = format!("{} {} indicators over {} candles:\n", symbol, interval, closes.len());
        let _ = writeln!(out, "last close: {}", fmt_opt(closes.last().copied()));
        let _ = writeln!(out, "SMA20: {}", fmt_opt(sma(&closes, 20)));
        let _ = writeln!(out, "SMA50: {}", fmt_opt(sma(&closes, 50)));
        let _ = writeln!(out, "EMA12: {}", fmt_opt(ema(&closes, 12)));
        let _ = writeln!(out, "EMA26: {}", fmt_opt(ema(&closes, 26)));
        match macd(&closes) {
            Some(m) => {
                let _ = writeln!(
                    out,
                    "MACD: line={:.4} signal={:.4} histogram={:.4}",
                    m.line, m.signal, m.histogram
                );
            }
            None => out.push_str("MACD: n/a\n"),
        }
        let _ = writeln!(out, "RSI14: {}", fmt_opt(rsi(&closes, 14)));
        Ok(out)
    }
}

pub struct FundingRateTool {
    feed: MarketFeed,
    symbol: String,
}

impl FundingRateTool {
    pub fn new(feed: MarketFeed, symbol: &str) -> Self {
        Self {
            feed,
            symbol: symbol.to_string(),
        }
    }
}

#[async_trait]
impl Tool for FundingRateTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: GET_FUNDING_RATE.to_string(),
            description: "Current perpetual funding rate and mark price".to_string(),
            parameters: symbol_schema(json!({})),
        }
    }

    async fn call(&self, args: &Value) -> Result<String> {
        let symbol = arg_str(args, "symbol").unwrap_or(&self.symbol);
        let f = self.feed.funding_rate(symbol).await?;
        let pct = f.rate * rust_decimal::Decimal::ONE_HUNDRED;
        let bias = if f.rate.is_sign_positive() && !f.rate.is_zero() {
            "longs pay shorts"
        } else if f.rate.is_zero() {
            "neutral"
        } else {
            "shorts pay longs"
        };
        Ok(format!(
            "{} funding rate: {}% ({})\nmark price: {}\nnext funding: {}\n",
            f.symbol,
            pct.round_dp(4),
            bias,
            f.mark_price,
            f.next_funding_time.format("%Y-%m-%d %H:%M UTC")
        ))
    }
}

pub struct OrderBookTool {
    feed: MarketFeed,
    symbol: String,
}

impl OrderBookTool {
    pub fn new(feed: MarketFeed, symbol: &str) -> Self {
        Self {
            feed,
            symbol: symbol.to_string(),
        }
    }
}

#[async_trait]
impl Tool for OrderBookTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: GET_ORDER_BOOK.to_string(),
            description: "Top of the order book with depth imbalance".to_string(),
            parameters: symbol_schema(json!({
                "depth": {"type": "integer", "description": "Levels per side (5, 10, 20)"}
            })),
        }
    }

    async fn call(&self, args: &Value) -> Result<String> {
        let symbol = arg_str(args, "symbol").unwrap_or(&self.symbol);
        let depth = arg_u32(args, "depth").unwrap_or(DEFAULT_BOOK_DEPTH);
        let book = self.feed.order_book(symbol, depth).await?;

        let mut out = format!("{} order book (top {}):\n", symbol, depth);
        let show = |v: Option<rust_decimal::Decimal>| v.map(|d| d.to_string()).unwrap_or_else(|| "n/a".into());
        let _ = writeln!(out, "best bid: {}", show(book.best_bid()));
        let _ = writeln!(out, "best ask: {}", show(book.best_ask()));
        let _ = writeln!(out, "spread: {}", show(book.spread()));
        let _ = writeln!(out, "imbalance: {} (positive = bid heavy)", book.imbalance().round_dp(4));
        for level in book.bids.iter().take(5) {
            let _ = writeln!(out, "  bid {} x {}", level.price, level.quantity);
        }
        for level in book.asks.iter().take(5) {
            let _ = writeln!(out, "  ask {} x {}", level.price, level.quantity);
        }
        Ok(out)
    }
}

/// Ticker with 24h statistics
pub struct MarketInfoTool {
    feed: MarketFeed,
    symbol: String,
}

impl MarketInfoTool {
    pub fn new(feed: MarketFeed, symbol: &str) -> Self {
        Self {
            feed,
            symbol: symbol.to_string(),
        }
    }
}

#[async_trait]
impl Tool for MarketInfoTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: GET_MARKET_INFO.to_string(),
            description: "Last price and 24h market statistics".to_string(),
            parameters: symbol_schema(json!({})),
        }
    }

    async fn call(&self, args: &Value) -> Result<String> {
        let symbol = arg_str(args, "symbol").unwrap_or(&self.symbol);
        let t = self.feed.ticker(symbol).await?;
        Ok(format!(
            "{} last: {}\n24h change: {}%\n24h high: {}\n24h low: {}\n24h volume: {}\nas of: {}\n",
            t.symbol,
            t.last,
            t.change_pct_24h.round_dp(2),
            t.high_24h,
            t.low_24h,
            t.volume_24h,
            t.timestamp.format("%Y-%m-%d %H:%M UTC")
        ))
    }
}

/// Balance and open legs, as reported by the execution engine
pub struct PositionSummaryTool {
    engine: Arc<ExecutionStateMachine>,
    symbol: String,
}

impl PositionSummaryTool {
    pub fn new(engine: Arc<ExecutionStateMachine>, symbol: &str) -> Self {
        Self {
            engine,
            symbol: symbol.to_string(),
        }
    }
}

#[async_trait]
impl Tool for PositionSummaryTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: GET_POSITION_SUMMARY.to_string(),
            description: "Account balance and open positions with PnL and liquidation distance".to_string(),
            parameters: symbol_schema(json!({})),
        }
    }

    async fn call(&self, args: &Value) -> Result<String> {
        let symbol = arg_str(args, "symbol").unwrap_or(&self.symbol);
        Ok(self.engine.position_summary(symbol).await)
    }
}
