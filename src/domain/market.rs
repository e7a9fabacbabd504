use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Last trade and 24h statistics for a symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub last: Decimal,
    pub high_24h: Decimal,
    pub low_24h: Decimal,
    pub volume_24h: Decimal,
    pub change_pct_24h: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// One OHLCV candle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Perpetual funding snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingRate {
    pub symbol: String,
    /// Rate per funding interval, as a fraction (0.0001 = 0.01%)
    pub rate: Decimal,
    pub mark_price: Decimal,
    pub next_funding_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

/// Top-of-book depth snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderBook {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }

    pub fn spread(&self) -> Option<Decimal> {
        Some(self.best_ask()? - self.best_bid()?)
    }

    /// (bid depth - ask depth) / (bid depth + ask depth), in [-1, 1]
    pub fn imbalance(&self) -> Decimal {
        let bid: Decimal = self.bids.iter().map(|l| l.quantity).sum();
        let ask: Decimal = self.asks.iter().map(|l| l.quantity).sum();
        let total = bid + ask;
        if total.is_zero() {
            return Decimal::ZERO;
        }
        (bid - ask) / total
    }
}

/// Quote-currency account balance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub asset: String,
    pub total: Decimal,
    pub available: Decimal,
    pub unrealized_pnl: Decimal,
}

impl AccountBalance {
    pub fn used_margin(&self) -> Decimal {
        self.total - self.available
    }
}
