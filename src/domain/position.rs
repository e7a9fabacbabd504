use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::OrderSide;

/// Position side under hedge (dual-side) mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn opposite(&self) -> Self {
        match self {
            PositionSide::Long => PositionSide::Short,
            PositionSide::Short => PositionSide::Long,
        }
    }

    /// Order side that adds to this position
    pub fn open_side(&self) -> OrderSide {
        match self {
            PositionSide::Long => OrderSide::Buy,
            PositionSide::Short => OrderSide::Sell,
        }
    }

    /// Order side that reduces this position
    pub fn close_side(&self) -> OrderSide {
        self.open_side().opposite()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Long => "LONG",
            PositionSide::Short => "SHORT",
        }
    }
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Snapshot of one side of a symbol's position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: PositionSide,
    /// Absolute size in base units
    pub size: Decimal,
    pub entry_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub leverage: u32,
    pub liquidation_price: Decimal,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.size > Decimal::ZERO
    }

    /// PnL in percent of entry at `mark`, signed for the position's side
    pub fn pnl_pct(&self, mark: Decimal) -> Decimal {
        if self.entry_price <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let diff = match self.side {
            PositionSide::Long => mark - self.entry_price,
            PositionSide::Short => self.entry_price - mark,
        };
        diff / self.entry_price * Decimal::ONE_HUNDRED
    }

    /// Distance to liquidation in percent of `mark`, if a liquidation price is known
    pub fn liquidation_distance_pct(&self, mark: Decimal) -> Option<Decimal> {
        if self.liquidation_price <= Decimal::ZERO || mark <= Decimal::ZERO {
            return None;
        }
        let diff = match self.side {
            PositionSide::Long => mark - self.liquidation_price,
            PositionSide::Short => self.liquidation_price - mark,
        };
        Some(diff / mark * Decimal::ONE_HUNDRED)
    }
}

/// Both sides of one symbol. A side without a nonzero entry is flat.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionBook {
    pub long: Option<Position>,
    pub short: Option<Position>,
}

impl PositionBook {
    /// Build from raw exchange entries, dropping zero-size legs
    pub fn from_positions(positions: impl IntoIterator<Item = Position>) -> Self {
        let mut book = Self::default();
        for pos in positions.into_iter().filter(Position::is_open) {
            match pos.side {
                PositionSide::Long => book.long = Some(pos),
                PositionSide::Short => book.short = Some(pos),
            }
        }
        book
    }

    pub fn side(&self, side: PositionSide) -> Option<&Position> {
        match side {
            PositionSide::Long => self.long.as_ref(),
            PositionSide::Short => self.short.as_ref(),
        }
        .filter(|p| p.is_open())
    }

    pub fn size(&self, side: PositionSide) -> Decimal {
        self.side(side).map(|p| p.size).unwrap_or(Decimal::ZERO)
    }

    pub fn is_flat(&self) -> bool {
        self.side(PositionSide::Long).is_none() && self.side(PositionSide::Short).is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn pos(side: PositionSide, size: Decimal) -> Position {
        Position {
            symbol: "BTC/USDT".into(),
            side,
            size,
            entry_price: dec!(100),
            unrealized_pnl: Decimal::ZERO,
            leverage: 10,
            liquidation_price: dec!(90),
        }
    }

    #[test]
    fn zero_size_entries_are_flat() {
        let book = PositionBook::from_positions(vec![
            pos(PositionSide::Long, Decimal::ZERO),
            pos(PositionSide::Short, dec!(0.02)),
        ]);
        assert!(book.side(PositionSide::Long).is_none());
        assert_eq!(book.size(PositionSide::Short), dec!(0.02));
        assert!(!book.is_flat());
    }

    #[test]
    fn pnl_sign_follows_side() {
        assert_eq!(pos(PositionSide::Long, dec!(1)).pnl_pct(dec!(110)), dec!(10));
        assert_eq!(pos(PositionSide::Short, dec!(1)).pnl_pct(dec!(110)), dec!(-10));
    }

    #[test]
    fn liquidation_distance_for_long() {
        let p = pos(PositionSide::Long, dec!(1));
        assert_eq!(p.liquidation_distance_pct(dec!(100)), Some(dec!(10)));
    }
}
