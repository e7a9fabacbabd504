//! Tools analysts may call during their sub-loop.

pub mod indicators;
mod market;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{DeskError, Result};
use crate::execution::ExecutionStateMachine;

use super::traits::{ToolCall, ToolSpec};

pub use market::{
    CryptoDataTool, FundingRateTool, IndicatorsTool, MarketFeed, MarketInfoTool, OrderBookTool,
    PositionSummaryTool,
};

pub const GET_CRYPTO_DATA: &str = "get_crypto_data";
pub const GET_CRYPTO_INDICATORS: &str = "get_crypto_indicators";
pub const GET_FUNDING_RATE: &str = "get_funding_rate";
pub const GET_ORDER_BOOK: &str = "get_order_book";
pub const GET_MARKET_INFO: &str = "get_market_info";
pub const GET_POSITION_SUMMARY: &str = "get_position_summary";

#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;

    /// Run with model-supplied arguments, returning text for the model
    async fn call(&self, args: &Value) -> Result<String>;
}

/// Name-keyed tool table, filled once at startup
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in market tools over `engine`'s gateway and retry policy,
    /// trading `symbol` by default
    pub fn with_market_tools(engine: Arc<ExecutionStateMachine>, symbol: &str, timeframe: &str) -> Self {
        let feed = MarketFeed::new(engine.gateway().clone(), engine.retry().clone());
        let mut registry = Self::new();
        registry.register(Arc::new(CryptoDataTool::new(feed.clone(), symbol, timeframe)));
        registry.register(Arc::new(IndicatorsTool::new(feed.clone(), symbol, timeframe)));
        registry.register(Arc::new(FundingRateTool::new(feed.clone(), symbol)));
        registry.register(Arc::new(OrderBookTool::new(feed.clone(), symbol)));
        registry.register(Arc::new(MarketInfoTool::new(feed, symbol)));
        registry.register(Arc::new(PositionSummaryTool::new(engine, symbol)));
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.spec().name;
        if self.tools.insert(name.clone(), tool).is_some() {
            warn!(tool = %name, "Tool registered twice, keeping the latest");
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Specs for `names`, skipping unknown ones
    pub fn specs_for(&self, names: &[&str]) -> Vec<ToolSpec> {
        names
            .iter()
            .filter_map(|n| self.tools.get(*n))
            .map(|t| t.spec())
            .collect()
    }

    /// Invoke `call` only if its tool is among `offered`
    pub async fn invoke_offered(&self, call: &ToolCall, offered: &[ToolSpec]) -> Result<String> {
        if !offered.iter().any(|t| t.name == call.name) {
            return Err(DeskError::Tool {
                tool: call.name.clone(),
                reason: "not offered to this role".to_string(),
            });
        }
        self.invoke(call).await
    }

    pub async fn invoke(&self, call: &ToolCall) -> Result<String> {
        let tool = self.tools.get(&call.name).ok_or_else(|| DeskError::Tool {
            tool: call.name.clone(),
            reason: "unknown tool".to_string(),
        })?;
        debug!(tool = %call.name, args = %call.arguments, "Invoking tool");
        tool.call(&call.arguments).await
    }
}

/// Tools offered to each analyst role
pub fn tools_for_role(role: &str) -> &'static [&'static str] {
    match role {
        "market" => &[GET_CRYPTO_DATA, GET_CRYPTO_INDICATORS],
        "crypto" => &[GET_FUNDING_RATE, GET_ORDER_BOOK, GET_MARKET_INFO, GET_POSITION_SUMMARY],
        "sentiment" | "news" => &[GET_MARKET_INFO],
        _ => &[],
    }
}

pub(crate) fn arg_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

pub(crate) fn arg_u32(args: &Value, key: &str) -> Option<u32> {
    args.get(key)
        .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
        .and_then(|n| u32::try_from(n).ok())
}
