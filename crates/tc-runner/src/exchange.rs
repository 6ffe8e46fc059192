//! Binance USDT-margined futures access.
//!
//! Three capabilities behind three seams:
//!
//! - [`MarketData`] — unsigned price and kline reads for the prefetch pool.
//! - [`PositionSource`] — the signed position snapshot reconciliation
//!   compares against.
//! - [`OrderRouter`] — market order execution for live runs.
//!
//! | Operation  | Method | Path                    |
//! |------------|--------|-------------------------|
//! | Price      | GET    | `/fapi/v1/ticker/price` |
//! | Klines     | GET    | `/fapi/v1/klines`       |
//! | Positions  | GET    | `/fapi/v3/positionRisk` |
//! | New order  | POST   | `/fapi/v1/order`        |

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use tc_core::config::ExchangeConfig;
use tc_core::error::TrustError;
use tc_core::time_util::now_ms;
use tc_core::types::{ExchangePosition, Side, TradeDirection};
use tc_ledger::PositionSource;

use crate::auth;

// ---------------------------------------------------------------------------
// Seams
// ---------------------------------------------------------------------------

/// One futures kline (candlestick).
#[derive(Debug, Clone, Copy)]
pub struct Kline {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Read-only market data consumed by the prefetch pool.
#[async_trait]
pub trait MarketData: Send + Sync {
    async fn fetch_price(&self, symbol: &str) -> Result<f64, TrustError>;
    async fn fetch_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Kline>, TrustError>;
}

/// Result of one market order execution.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub exchange_order_id: Option<String>,
    pub fill_price: f64,
    pub commission: f64,
}

/// Order execution capability. Live runs route to the exchange; paper runs
/// simulate the fill.
#[async_trait]
pub trait OrderRouter: Send + Sync {
    /// Submit a market order. `expected_price` is the decision-time mark,
    /// used for slippage accounting and as the simulated paper fill.
    async fn execute_market(
        &self,
        symbol: &str,
        side: Side,
        quantity: f64,
        reduce_only: bool,
        expected_price: f64,
    ) -> Result<ExecutionReport, TrustError>;
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Binance futures REST client.
pub struct BinanceFuturesClient {
    http: reqwest::Client,
    api_key: String,
    secret_key: String,
    base_url: String,
    recv_window: u64,
}

impl BinanceFuturesClient {
    pub fn new(cfg: &ExchangeConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: cfg.api_key.clone(),
            secret_key: cfg.secret_key.clone(),
            base_url: cfg.base_url.clone(),
            recv_window: cfg.recv_window,
        }
    }

    async fn get_json(&self, url: &str, signed: bool) -> Result<serde_json::Value, TrustError> {
        let mut req = self.http.get(url);
        if signed {
            req = req.header("X-MBX-APIKEY", &self.api_key);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| TrustError::Exchange(format!("GET {url}: {e}")))?
            .error_for_status()
            .map_err(|e| TrustError::Exchange(format!("GET {url}: {e}")))?;
        resp.json()
            .await
            .map_err(|e| TrustError::Parse(format!("GET {url}: invalid JSON body: {e}")))
    }

    /// Signed `GET /fapi/v3/positionRisk`: every nonzero position currently
    /// held on the exchange.
    pub async fn get_positions(&self) -> Result<Vec<ExchangePosition>, TrustError> {
        let timestamp = now_ms().to_string();
        let recv = self.recv_window.to_string();
        let query = auth::build_signed_query(
            &[("recvWindow", &recv), ("timestamp", &timestamp)],
            &self.secret_key,
        );
        let url = format!("{}/fapi/v3/positionRisk?{query}", self.base_url);
        let body = self.get_json(&url, true).await?;
        parse_positions(&body)
    }

    /// Signed `POST /fapi/v1/order`, type MARKET.
    pub async fn place_market_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: f64,
        reduce_only: bool,
    ) -> Result<serde_json::Value, TrustError> {
        let timestamp = now_ms().to_string();
        let recv = self.recv_window.to_string();
        let side_str = side.to_string();
        let qty_str = format!("{quantity}");
        let mut params: Vec<(&str, &str)> = vec![
            ("symbol", symbol),
            ("side", &side_str),
            ("type", "MARKET"),
            ("quantity", &qty_str),
        ];
        if reduce_only {
            params.push(("reduceOnly", "true"));
        }
        params.push(("recvWindow", &recv));
        params.push(("timestamp", &timestamp));

        let query = auth::build_signed_query(&params, &self.secret_key);
        let url = format!("{}/fapi/v1/order?{query}", self.base_url);

        let resp = self
            .http
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| TrustError::Exchange(format!("order {symbol}: {e}")))?
            .error_for_status()
            .map_err(|e| TrustError::Exchange(format!("order {symbol}: {e}")))?;
        resp.json()
            .await
            .map_err(|e| TrustError::Parse(format!("order {symbol}: invalid JSON body: {e}")))
    }
}

#[async_trait]
impl PositionSource for BinanceFuturesClient {
    async fn fetch_positions(&self) -> Result<Vec<ExchangePosition>, TrustError> {
        self.get_positions().await
    }
}

#[async_trait]
impl MarketData for BinanceFuturesClient {
    async fn fetch_price(&self, symbol: &str) -> Result<f64, TrustError> {
        let url = format!(
            "{}/fapi/v1/ticker/price?symbol={}",
            self.base_url,
            urlencoding::encode(symbol)
        );
        let body = self.get_json(&url, false).await?;
        let price = body
            .get("price")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(|| TrustError::Parse(format!("{symbol}: no price in ticker response")))?;
        debug!(symbol, price, "price fetched");
        Ok(price)
    }

    async fn fetch_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Kline>, TrustError> {
        let url = format!(
            "{}/fapi/v1/klines?symbol={}&interval={}&limit={}",
            self.base_url,
            urlencoding::encode(symbol),
            urlencoding::encode(interval),
            limit
        );
        let body = self.get_json(&url, false).await?;
        parse_klines(&body)
    }
}

#[async_trait]
impl OrderRouter for BinanceFuturesClient {
    async fn execute_market(
        &self,
        symbol: &str,
        side: Side,
        quantity: f64,
        reduce_only: bool,
        expected_price: f64,
    ) -> Result<ExecutionReport, TrustError> {
        let resp = self.place_market_order(symbol, side, quantity, reduce_only).await?;

        let exchange_order_id = resp
            .get("orderId")
            .and_then(|v| v.as_u64())
            .map(|id| id.to_string());
        // avgPrice lags for market orders; fall back to the decision mark.
        let avg = resp
            .get("avgPrice")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(0.0);
        let fill_price = if avg > 0.0 { avg } else { expected_price };

        Ok(ExecutionReport { exchange_order_id, fill_price, commission: 0.0 })
    }
}

// ---------------------------------------------------------------------------
// Wire parsing
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionRiskEntry {
    symbol: String,
    position_amt: String,
    #[serde(default)]
    entry_price: String,
    #[serde(default)]
    position_side: String,
    #[serde(default)]
    leverage: String,
}

/// Parse a `positionRisk` response, keeping only nonzero positions.
/// Unparseable entries are logged and skipped, never fatal.
fn parse_positions(body: &serde_json::Value) -> Result<Vec<ExchangePosition>, TrustError> {
    let entries: Vec<PositionRiskEntry> = serde_json::from_value(body.clone())
        .map_err(|e| TrustError::Parse(format!("positionRisk: {e}")))?;

    let mut positions = Vec::new();
    for entry in entries {
        let Ok(amt) = entry.position_amt.parse::<f64>() else {
            warn!(symbol = %entry.symbol, amt = %entry.position_amt, "unparseable positionAmt; skipping");
            continue;
        };
        if amt.abs() <= 0.0 {
            continue;
        }
        let direction = match entry.position_side.as_str() {
            "LONG" => TradeDirection::Long,
            "SHORT" => TradeDirection::Short,
            // one-way mode reports BOTH; the sign carries the direction
            _ => ExchangePosition::direction_from_amount(amt),
        };
        positions.push(ExchangePosition {
            symbol: entry.symbol,
            position_amt: amt,
            entry_price: entry.entry_price.parse().unwrap_or(0.0),
            position_side: direction,
            leverage: entry.leverage.parse().unwrap_or(1),
        });
    }
    Ok(positions)
}

/// Parse a klines response: arrays of
/// `[openTime, open, high, low, close, volume, ...]` with numeric strings.
fn parse_klines(body: &serde_json::Value) -> Result<Vec<Kline>, TrustError> {
    let rows = body
        .as_array()
        .ok_or_else(|| TrustError::Parse("klines: expected a JSON array".to_string()))?;

    let field = |row: &serde_json::Value, idx: usize| -> Option<f64> {
        row.get(idx)?.as_str()?.parse().ok()
    };

    let mut klines = Vec::with_capacity(rows.len());
    for row in rows {
        let parsed = (|| {
            Some(Kline {
                open: field(row, 1)?,
                high: field(row, 2)?,
                low: field(row, 3)?,
                close: field(row, 4)?,
                volume: field(row, 5)?,
            })
        })();
        match parsed {
            Some(k) => klines.push(k),
            None => return Err(TrustError::Parse("klines: malformed row".to_string())),
        }
    }
    Ok(klines)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_parsing_filters_zero_amounts() {
        let body = serde_json::json!([
            {"symbol": "BTCUSDT", "positionAmt": "0.500", "entryPrice": "50000.0", "positionSide": "LONG", "leverage": "3"},
            {"symbol": "ETHUSDT", "positionAmt": "0", "entryPrice": "0.0", "positionSide": "BOTH"},
            {"symbol": "SOLUSDT", "positionAmt": "-10.0", "entryPrice": "150.0", "positionSide": "BOTH"}
        ]);
        let positions = parse_positions(&body).unwrap();
        assert_eq!(positions.len(), 2);

        assert_eq!(positions[0].symbol, "BTCUSDT");
        assert_eq!(positions[0].position_amt, 0.5);
        assert_eq!(positions[0].position_side, TradeDirection::Long);
        assert_eq!(positions[0].leverage, 3);

        // BOTH side: direction inferred from the signed amount.
        assert_eq!(positions[1].symbol, "SOLUSDT");
        assert_eq!(positions[1].position_side, TradeDirection::Short);
    }

    #[test]
    fn position_parsing_skips_bad_amounts() {
        let body = serde_json::json!([
            {"symbol": "XXXUSDT", "positionAmt": "not-a-number"},
            {"symbol": "BTCUSDT", "positionAmt": "1.0"}
        ]);
        let positions = parse_positions(&body).unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].symbol, "BTCUSDT");
    }

    #[test]
    fn kline_parsing() {
        let body = serde_json::json!([
            [1700000000000u64, "100.0", "105.0", "99.0", "104.0", "1200.5", 1700000899999u64],
            [1700000900000u64, "104.0", "106.0", "103.0", "105.5", "900.0", 1700001799999u64]
        ]);
        let klines = parse_klines(&body).unwrap();
        assert_eq!(klines.len(), 2);
        assert_eq!(klines[0].open, 100.0);
        assert_eq!(klines[0].volume, 1200.5);
        assert_eq!(klines[1].close, 105.5);
    }

    #[test]
    fn kline_parsing_rejects_malformed_rows() {
        let body = serde_json::json!([[1700000000000u64, "100.0"]]);
        assert!(parse_klines(&body).is_err());
    }
}
