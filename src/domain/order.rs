use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::PositionSide;

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderKind {
    Market,
    /// Conditional market order that fires when the mark crosses the stop
    StopMarket,
    /// Conditional market order that fires at the profit target
    TakeProfitMarket,
}

impl OrderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderKind::Market => "MARKET",
            OrderKind::StopMarket => "STOP_MARKET",
            OrderKind::TakeProfitMarket => "TAKE_PROFIT_MARKET",
        }
    }

    pub fn is_conditional(&self) -> bool {
        !matches!(self, OrderKind::Market)
    }
}

/// Order request (what we want to do)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub client_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    /// Hedge-mode leg this order belongs to
    pub position_side: PositionSide,
    pub quantity: Decimal,
    pub kind: OrderKind,
    /// Trigger price for conditional orders
    pub stop_price: Option<Decimal>,
}

impl OrderRequest {
    /// Market order that adds to `position_side`
    pub fn open(symbol: &str, position_side: PositionSide, quantity: Decimal) -> Self {
        Self::market(symbol, position_side.open_side(), position_side, quantity)
    }

    /// Market order that reduces `position_side`
    pub fn close(symbol: &str, position_side: PositionSide, quantity: Decimal) -> Self {
        Self::market(symbol, position_side.close_side(), position_side, quantity)
    }

    fn market(symbol: &str, side: OrderSide, position_side: PositionSide, quantity: Decimal) -> Self {
        Self {
            client_order_id: Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            side,
            position_side,
            quantity,
            kind: OrderKind::Market,
            stop_price: None,
        }
    }

    /// Protective stop for an existing position
    pub fn stop_loss(symbol: &str, position_side: PositionSide, quantity: Decimal, stop: Decimal) -> Self {
        Self {
            kind: OrderKind::StopMarket,
            stop_price: Some(stop),
            ..Self::close(symbol, position_side, quantity)
        }
    }

    /// Profit target for an existing position
    pub fn take_profit(symbol: &str, position_side: PositionSide, quantity: Decimal, target: Decimal) -> Self {
        Self {
            kind: OrderKind::TakeProfitMarket,
            stop_price: Some(target),
            ..Self::close(symbol, position_side, quantity)
        }
    }

    /// True when this order reduces exposure on its leg
    pub fn is_closing(&self) -> bool {
        self.side == self.position_side.close_side()
    }
}

/// Exchange acknowledgement of a submitted order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub status: String,
    pub executed_qty: Decimal,
    pub avg_price: Option<Decimal>,
}

/// Decimal places of the quantity step for a symbol
pub fn quantity_precision(symbol: &str) -> u32 {
    let base = symbol
        .split(['/', ':'])
        .next()
        .unwrap_or(symbol)
        .trim_end_matches("USDT")
        .to_ascii_uppercase();
    match base.as_str() {
        "BTC" | "ETH" => 3,
        "SOL" | "BNB" | "LTC" => 2,
        "XRP" | "DOGE" | "ADA" => 0,
        _ => 3,
    }
}

/// Truncate `quantity` to the symbol's step size; never rounds up
pub fn adjust_quantity(symbol: &str, quantity: Decimal) -> Decimal {
    quantity
        .round_dp_with_strategy(quantity_precision(symbol), RoundingStrategy::ToZero)
        .normalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn close_orders_take_the_opposite_side() {
        let close_short = OrderRequest::close("BTC/USDT", PositionSide::Short, dec!(0.02));
        assert_eq!(close_short.side, OrderSide::Buy);
        assert!(close_short.is_closing());

        let open_long = OrderRequest::open("BTC/USDT", PositionSide::Long, dec!(0.01));
        assert_eq!(open_long.side, OrderSide::Buy);
        assert!(!open_long.is_closing());
    }

    #[test]
    fn stop_loss_for_short_buys_back() {
        let sl = OrderRequest::stop_loss("BTC/USDT", PositionSide::Short, dec!(0.01), dec!(70000));
        assert_eq!(sl.side, OrderSide::Buy);
        assert_eq!(sl.kind, OrderKind::StopMarket);
        assert_eq!(sl.stop_price, Some(dec!(70000)));
    }

    #[test]
    fn quantity_truncates_toward_zero() {
        assert_eq!(adjust_quantity("BTC/USDT", dec!(0.0019)), dec!(0.001));
        assert_eq!(adjust_quantity("SOLUSDT", dec!(1.239)), dec!(1.23));
        assert_eq!(adjust_quantity("BTC/USDT", dec!(0.0004)), Decimal::ZERO);
    }
}
