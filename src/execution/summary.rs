//! Human-readable position report fed to analysts and printed by the CLI.

use std::fmt::Write as _;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::warn;

use crate::domain::{AccountBalance, PositionBook, PositionSide};

use super::ExecutionStateMachine;

/// Liquidation distance (percent of mark) below which the summary warns
pub const LIQUIDATION_WARN_PCT: Decimal = dec!(10);
/// PnL (percent of entry) below which a stop-loss hint is added
pub const LOSS_HINT_PCT: Decimal = dec!(-5);
/// PnL (percent of entry) above which a take-profit hint is added
pub const PROFIT_HINT_PCT: Decimal = dec!(3);

/// Render the account balance and both legs of `book` against `mark`
pub fn render_position_summary(
    symbol: &str,
    balance: Option<&AccountBalance>,
    book: &PositionBook,
    mark: Option<Decimal>,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Position summary for {}", symbol);
    match balance {
        Some(b) => {
            let _ = writeln!(
                out,
                "Balance: {} {} (available {})",
                b.total.round_dp(2),
                b.asset,
                b.available.round_dp(2)
            );
        }
        None => {
            let _ = writeln!(out, "Balance: unavailable");
        }
    }
    if let Some(mark) = mark {
        let _ = writeln!(out, "Mark price: {}", mark.round_dp(4));
    }

    if book.is_flat() {
        let _ = writeln!(out, "No open positions (flat).");
        return out;
    }

    for side in [PositionSide::Long, PositionSide::Short] {
        let Some(pos) = book.side(side) else {
            continue;
        };
        let _ = writeln!(
            out,
            "{}: size={} entry={} unrealized_pnl={} leverage={}x",
            side,
            pos.size.normalize(),
            pos.entry_price.round_dp(4),
            pos.unrealized_pnl.round_dp(4),
            pos.leverage
        );

        let Some(mark) = mark else {
            continue;
        };

        let pnl = pos.pnl_pct(mark).round_dp(2);
        let _ = writeln!(out, "  pnl: {}%", pnl);

        if let Some(distance) = pos.liquidation_distance_pct(mark) {
            let distance = distance.round_dp(2);
            let _ = writeln!(out, "  liquidation: {} ({}% away)", pos.liquidation_price.round_dp(4), distance);
            if distance < LIQUIDATION_WARN_PCT {
                let _ = writeln!(out, "  WARNING: within {}% of liquidation, consider reducing exposure", LIQUIDATION_WARN_PCT);
            }
        }

        if pnl < LOSS_HINT_PCT {
            let _ = writeln!(out, "  hint: loss beyond {}%, review the stop-loss", LOSS_HINT_PCT);
        } else if pnl > PROFIT_HINT_PCT {
            let _ = writeln!(out, "  hint: profit above {}%, consider taking partial profit", PROFIT_HINT_PCT);
        }
    }

    out
}

impl ExecutionStateMachine {
    /// Position report for `symbol`. Read failures are reported inline.
    pub async fn position_summary(&self, symbol: &str) -> String {
        let balance = match self.retry().run("get_balance", || self.gateway().get_balance()).await {
            Ok(b) => Some(b),
            Err(e) => {
                warn!(symbol, "Balance unavailable for position summary: {}", e);
                None
            }
        };

        let book = match self.read_positions(symbol).await {
            Ok(book) => book,
            Err(e) => {
                warn!(symbol, "Position summary unavailable: {}", e);
                return format!("Position summary for {} unavailable: {}", symbol, e);
            }
        };

        let mark = match self
            .retry()
            .run("get_ticker", || self.gateway().get_ticker(symbol))
            .await
        {
            Ok(t) => Some(t.last),
            Err(e) => {
                warn!(symbol, "Ticker unavailable for position summary: {}", e);
                None
            }
        };

        render_position_summary(symbol, balance.as_ref(), &book, mark)
    }
}
