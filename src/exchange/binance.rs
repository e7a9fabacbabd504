//! Binance USDⓈ-M futures REST gateway.
//!
//! Signed endpoints use HMAC-SHA256 over the full query string, hex encoded,
//! with the key in `X-MBX-APIKEY`. Symbols are accepted in `BTC/USDT`,
//! `BTC/USDT:USDT` or `BTCUSDT` form.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ExchangeConfig;
use crate::domain::{
    AccountBalance, BookLevel, FundingRate, Kline, OrderAck, OrderBook, OrderKind, OrderRequest,
    Position, PositionSide, Ticker,
};
use crate::error::{DeskError, Result};
use crate::exchange::ExchangeGateway;

type HmacSha256 = Hmac<Sha256>;

/// Error code Binance returns when the requested position mode is already set
const NO_NEED_TO_CHANGE_POSITION_SIDE: i64 = -4059;

#[derive(Clone)]
pub struct BinanceFuturesClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    api_secret: Option<String>,
    recv_window_ms: u64,
}

impl BinanceFuturesClient {
    pub fn new(config: &ExchangeConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("deskagents/0.1")
            .build()
            .map_err(|e| DeskError::Internal(format!("failed to build Binance HTTP client: {}", e)))?;

        let non_empty = |s: &str| (!s.trim().is_empty()).then(|| s.trim().to_string());

        Ok(Self {
            http,
            base_url: config.rest_url.trim_end_matches('/').to_string(),
            api_key: non_empty(&config.api_key)
                .or_else(|| std::env::var("BINANCE_API_KEY").ok()),
            api_secret: non_empty(&config.api_secret)
                .or_else(|| std::env::var("BINANCE_SECRET").ok()),
            recv_window_ms: config.recv_window_ms,
        })
    }

    /// `BTC/USDT:USDT` -> `BTCUSDT`
    pub fn market_id(symbol: &str) -> String {
        let base = symbol.split(':').next().unwrap_or(symbol);
        base.replace('/', "").to_ascii_uppercase()
    }

    fn sign(secret: &str, payload: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| DeskError::Auth(format!("invalid Binance secret: {}", e)))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn encode_query(params: &[(&str, String)]) -> String {
        params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    async fn request_json(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        signed: bool,
    ) -> Result<Value> {
        let mut query = Self::encode_query(params);
        let mut headers = HeaderMap::new();

        if signed {
            let key = self.api_key.as_ref().ok_or_else(|| {
                DeskError::Auth("BINANCE_API_KEY is required for signed endpoints".to_string())
            })?;
            let secret = self.api_secret.as_ref().ok_or_else(|| {
                DeskError::Auth("BINANCE_SECRET is required for signed endpoints".to_string())
            })?;

            if !query.is_empty() {
                query.push('&');
            }
            query.push_str(&format!(
                "recvWindow={}&timestamp={}",
                self.recv_window_ms,
                Utc::now().timestamp_millis()
            ));
            let signature = Self::sign(secret, &query)?;
            query.push_str(&format!("&signature={}", signature));

            headers.insert(
                HeaderName::from_static("x-mbx-apikey"),
                HeaderValue::from_str(key)
                    .map_err(|e| DeskError::Auth(format!("invalid Binance API key header: {}", e)))?,
            );
        }

        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };

        debug!("Binance {} {}", method, path);
        let resp = self
            .http
            .request(method.clone(), &url)
            .headers(headers)
            .send()
            .await?;
        let status = resp.status();
        let text = resp.text().await?;

        if status.as_u16() == 429 || status.as_u16() == 418 {
            return Err(DeskError::RateLimited(format!(
                "Binance rate limited for {} {}",
                method, path
            )));
        }

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(DeskError::Auth(format!(
                "Binance rejected credentials for {} {}: {}",
                method, path, text
            )));
        }

        if !status.is_success() {
            let code = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v.get("code").and_then(Value::as_i64));
            return Err(match code {
                Some(-2014) | Some(-2015) => DeskError::Auth(format!("invalid api key: {}", text)),
                _ => DeskError::Exchange(format!(
                    "Binance {} {} failed: HTTP {} body={}",
                    method,
                    path,
                    status.as_u16(),
                    text
                )),
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&text)
            .map_err(|e| DeskError::Exchange(format!("invalid Binance JSON response: {}", e)))
    }

    fn parse_decimalish(value: &Value) -> Option<Decimal> {
        match value {
            Value::String(s) => Decimal::from_str_exact(s.trim()).ok(),
            Value::Number(n) => Decimal::from_str_exact(&n.to_string()).ok(),
            _ => None,
        }
    }

    fn dec(root: &Value, key: &str) -> Decimal {
        root.get(key)
            .and_then(Self::parse_decimalish)
            .unwrap_or(Decimal::ZERO)
    }

    fn millis(value: Option<&Value>) -> DateTime<Utc> {
        value
            .and_then(Value::as_i64)
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_else(Utc::now)
    }

    fn format_decimal(value: Decimal) -> String {
        value.normalize().to_string()
    }

    fn map_position(symbol: &str, raw: &Value) -> Option<Position> {
        let amount = Self::dec(raw, "positionAmt");
        let side = match raw.get("positionSide").and_then(Value::as_str) {
            Some("LONG") => PositionSide::Long,
            Some("SHORT") => PositionSide::Short,
            // one-way mode reports BOTH with a signed amount
            _ if amount < Decimal::ZERO => PositionSide::Short,
            _ => PositionSide::Long,
        };
        let size = amount.abs();
        if size.is_zero() {
            return None;
        }
        Some(Position {
            symbol: symbol.to_string(),
            side,
            size,
            entry_price: Self::dec(raw, "entryPrice"),
            unrealized_pnl: Self::dec(raw, "unRealizedProfit"),
            leverage: raw
                .get("leverage")
                .and_then(Self::parse_decimalish)
                .and_then(|d| d.trunc().to_u32())
                .unwrap_or(1),
            liquidation_price: Self::dec(raw, "liquidationPrice"),
        })
    }

    fn map_levels(value: Option<&Value>) -> Vec<BookLevel> {
        value
            .and_then(Value::as_array)
            .map(|rows| {
                rows.iter()
                    .filter_map(|row| {
                        let pair = row.as_array()?;
                        Some(BookLevel {
                            price: Self::parse_decimalish(pair.first()?)?,
                            quantity: Self::parse_decimalish(pair.get(1)?)?,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl ExchangeGateway for BinanceFuturesClient {
    fn name(&self) -> &str {
        "binance-futures"
    }

    async fn get_positions(&self, symbol: &str) -> Result<Vec<Position>> {
        let market = Self::market_id(symbol);
        let raw = self
            .request_json(Method::GET, "/fapi/v2/positionRisk", &[("symbol", market)], true)
            .await?;
        let rows = raw.as_array().cloned().unwrap_or_default();
        Ok(rows
            .iter()
            .filter_map(|row| Self::map_position(symbol, row))
            .collect())
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()> {
        self.request_json(
            Method::POST,
            "/fapi/v1/leverage",
            &[
                ("symbol", Self::market_id(symbol)),
                ("leverage", leverage.to_string()),
            ],
            true,
        )
        .await?;
        Ok(())
    }

    async fn set_hedge_mode(&self, enabled: bool) -> Result<()> {
        let result = self
            .request_json(
                Method::POST,
                "/fapi/v1/positionSide/dual",
                &[("dualSidePosition", enabled.to_string())],
                true,
            )
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(DeskError::Exchange(msg))
                if msg.contains(&NO_NEED_TO_CHANGE_POSITION_SIDE.to_string()) =>
            {
                debug!("Position mode already dual-side");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn get_balance(&self) -> Result<AccountBalance> {
        let raw = self
            .request_json(Method::GET, "/fapi/v2/balance", &[], true)
            .await?;
        let row = raw
            .as_array()
            .and_then(|rows| {
                rows.iter()
                    .find(|r| r.get("asset").and_then(Value::as_str) == Some("USDT"))
            })
            .cloned();
        let Some(row) = row else {
            warn!("No USDT entry in Binance balance response");
            return Ok(AccountBalance {
                asset: "USDT".to_string(),
                ..AccountBalance::default()
            });
        };
        Ok(AccountBalance {
            asset: "USDT".to_string(),
            total: Self::dec(&row, "balance"),
            available: Self::dec(&row, "availableBalance"),
            unrealized_pnl: Self::dec(&row, "crossUnPnl"),
        })
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck> {
        let mut params = vec![
            ("symbol", Self::market_id(&order.symbol)),
            ("side", order.side.to_string()),
            ("positionSide", order.position_side.to_string()),
            ("type", order.kind.as_str().to_string()),
            ("quantity", Self::format_decimal(order.quantity)),
            // fixed per request, so a retried submission is rejected as a duplicate
            ("newClientOrderId", order.client_order_id.clone()),
        ];
        if order.kind != OrderKind::Market {
            let stop = order.stop_price.ok_or_else(|| {
                DeskError::Validation(format!("{} order requires a stop price", order.kind.as_str()))
            })?;
            params.push(("stopPrice", Self::format_decimal(stop)));
            params.push(("workingType", "MARK_PRICE".to_string()));
        }

        let raw = self
            .request_json(Method::POST, "/fapi/v1/order", &params, true)
            .await?;

        let avg_price = raw
            .get("avgPrice")
            .and_then(Self::parse_decimalish)
            .filter(|p| !p.is_zero());
        Ok(OrderAck {
            order_id: raw
                .get("orderId")
                .map(|v| v.to_string().trim_matches('"').to_string())
                .unwrap_or_default(),
            status: raw
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or("NEW")
                .to_string(),
            executed_qty: Self::dec(&raw, "executedQty"),
            avg_price,
        })
    }

    async fn get_ticker(&self, symbol: &str) -> Result<Ticker> {
        let raw = self
            .request_json(
                Method::GET,
                "/fapi/v1/ticker/24hr",
                &[("symbol", Self::market_id(symbol))],
                false,
            )
            .await?;
        Ok(Ticker {
            symbol: symbol.to_string(),
            last: Self::dec(&raw, "lastPrice"),
            high_24h: Self::dec(&raw, "highPrice"),
            low_24h: Self::dec(&raw, "lowPrice"),
            volume_24h: Self::dec(&raw, "volume"),
            change_pct_24h: Self::dec(&raw, "priceChangePercent"),
            timestamp: Self::millis(raw.get("closeTime")),
        })
    }

    async fn get_klines(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Kline>> {
        let raw = self
            .request_json(
                Method::GET,
                "/fapi/v1/klines",
                &[
                    ("symbol", Self::market_id(symbol)),
                    ("interval", interval.to_string()),
                    ("limit", limit.min(1500).to_string()),
                ],
                false,
            )
            .await?;
        let rows = raw.as_array().cloned().unwrap_or_default();
        Ok(rows
            .iter()
            .filter_map(|row| {
                let cols = row.as_array()?;
                Some(Kline {
                    open_time: Self::millis(cols.first()),
                    open: Self::parse_decimalish(cols.get(1)?)?,
                    high: Self::parse_decimalish(cols.get(2)?)?,
                    low: Self::parse_decimalish(cols.get(3)?)?,
                    close: Self::parse_decimalish(cols.get(4)?)?,
                    volume: Self::parse_decimalish(cols.get(5)?)?,
                })
            })
            .collect())
    }

    async fn get_funding_rate(&self, symbol: &str) -> Result<FundingRate> {
        let raw = self
            .request_json(
                Method::GET,
                "/fapi/v1/premiumIndex",
                &[("symbol", Self::market_id(symbol))],
                false,
            )
            .await?;
        Ok(FundingRate {
            symbol: symbol.to_string(),
            rate: Self::dec(&raw, "lastFundingRate"),
            mark_price: Self::dec(&raw, "markPrice"),
            next_funding_time: Self::millis(raw.get("nextFundingTime")),
        })
    }

    async fn get_order_book(&self, symbol: &str, depth: u32) -> Result<OrderBook> {
        // Binance only accepts a fixed set of depth limits
        let limit = [5u32, 10, 20, 50, 100, 500, 1000]
            .into_iter()
            .find(|l| *l >= depth)
            .unwrap_or(1000);
        let raw = self
            .request_json(
                Method::GET,
                "/fapi/v1/depth",
                &[
                    ("symbol", Self::market_id(symbol)),
                    ("limit", limit.to_string()),
                ],
                false,
            )
            .await?;
        let mut book = OrderBook {
            bids: Self::map_levels(raw.get("bids")),
            asks: Self::map_levels(raw.get("asks")),
        };
        book.bids.truncate(depth as usize);
        book.asks.truncate(depth as usize);
        Ok(book)
    }
}
