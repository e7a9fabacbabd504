use async_trait::async_trait;

use crate::domain::{
    AccountBalance, FundingRate, Kline, OrderAck, OrderBook, OrderRequest, Position, Ticker,
};
use crate::error::{DeskError, Result};

fn unsupported(feature: &str, exchange: &str) -> DeskError {
    DeskError::Validation(format!(
        "{} is not implemented for exchange '{}'",
        feature, exchange
    ))
}

/// Capability surface the execution engine and analyst tools consume.
///
/// Implementations own the wire protocol. Position queries return one entry
/// per non-flat leg; zero-size legs may be included and are treated as flat.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    fn name(&self) -> &str;

    async fn get_positions(&self, symbol: &str) -> Result<Vec<Position>>;

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()>;

    /// Switch the account to dual-side (hedge) position mode
    async fn set_hedge_mode(&self, enabled: bool) -> Result<()>;

    async fn get_balance(&self) -> Result<AccountBalance>;

    /// Place a market or conditional order
    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck>;

    async fn get_ticker(&self, symbol: &str) -> Result<Ticker>;

    async fn get_klines(&self, _symbol: &str, _interval: &str, _limit: u32) -> Result<Vec<Kline>> {
        Err(unsupported("get_klines", self.name()))
    }

    async fn get_funding_rate(&self, _symbol: &str) -> Result<FundingRate> {
        Err(unsupported("get_funding_rate", self.name()))
    }

    async fn get_order_book(&self, _symbol: &str, _depth: u32) -> Result<OrderBook> {
        Err(unsupported("get_order_book", self.name()))
    }
}
