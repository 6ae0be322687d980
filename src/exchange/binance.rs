// src/exchange/binance.rs
use crate::domain::errors::{ExchangeError, ExchangeResult};
use crate::domain::models::OrderSide;
use crate::exchange::client::{ExchangeClient, RawKline, RawOrderFill, SymbolFilters};
use crate::exchange::rate_limiter::{ApiCategory, RateLimiter};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use hyper::client::HttpConnector;
use hyper::{Body, Method, Request};
use hyper_tls::HttpsConnector;
use rust_decimal::Decimal;
use serde_json::Value;
use sha2::Sha256;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

type HmacSha256 = Hmac<Sha256>;
type HttpClient = hyper::Client<HttpsConnector<HttpConnector>, Body>;

const MAINNET_URL: &str = "https://fapi.binance.com";
const TESTNET_URL: &str = "https://testnet.binancefuture.com";

/// "No need to change margin type" — returned when the margin type is
/// already what we asked for.
const MARGIN_TYPE_NO_CHANGE: i64 = -4046;

/// Binance USDT-M futures REST client.
///
/// Every call acquires weight from the shared `RateLimiter` before hitting
/// the wire, so all orchestrators draw from one budget.
pub struct BinanceFuturesClient {
    api_key: String,
    api_secret: String,
    base_url: String,
    http: HttpClient,
    limiter: Arc<RateLimiter>,
    // exchangeInfo is large and static per session; filters are cached on
    // first use per symbol.
    filters: Mutex<HashMap<String, SymbolFilters>>,
}

impl BinanceFuturesClient {
    pub fn new(api_key: &str, api_secret: &str, limiter: Arc<RateLimiter>) -> Self {
        let https = HttpsConnector::new();
        Self {
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
            base_url: MAINNET_URL.to_string(),
            http: hyper::Client::builder().build::<_, Body>(https),
            limiter,
            filters: Mutex::new(HashMap::new()),
        }
    }

    pub fn new_testnet(api_key: &str, api_secret: &str, limiter: Arc<RateLimiter>) -> Self {
        let mut client = Self::new(api_key, api_secret, limiter);
        client.base_url = TESTNET_URL.to_string();
        client
    }

    fn sign(&self, query: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn build_query(params: &[(&str, String)]) -> String {
        params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        signed: bool,
        category: ApiCategory,
        weight: u32,
    ) -> ExchangeResult<Value> {
        self.limiter.acquire(category, weight).await;

        let query = if signed {
            let mut all: Vec<(&str, String)> = params.to_vec();
            all.push((
                "timestamp",
                chrono::Utc::now().timestamp_millis().to_string(),
            ));
            all.push(("recvWindow", "5000".to_string()));
            let unsigned = Self::build_query(&all);
            let signature = self.sign(&unsigned);
            format!("{}&signature={}", unsigned, signature)
        } else {
            Self::build_query(params)
        };

        let uri = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };

        let request = Request::builder()
            .method(method)
            .uri(&uri)
            .header("X-MBX-APIKEY", &self.api_key)
            .body(Body::empty())
            .map_err(|e| ExchangeError::Request(format!("failed to build request: {}", e)))?;

        let response = self
            .http
            .request(request)
            .await
            .map_err(|e| ExchangeError::Connection(format!("request to {} failed: {}", uri, e)))?;

        let status = response.status();
        let bytes = hyper::body::to_bytes(response.into_body())
            .await
            .map_err(|e| ExchangeError::Request(format!("failed to read response body: {}", e)))?;

        let value: Value = serde_json::from_slice(&bytes).map_err(|e| {
            ExchangeError::Api(format!("invalid JSON from {}: {}", path, e))
        })?;

        if status.is_success() {
            return Ok(value);
        }

        let code = value["code"].as_i64().unwrap_or(0);
        let msg = value["msg"].as_str().unwrap_or("unknown error").to_string();
        if status.as_u16() == 429 || status.as_u16() == 418 {
            return Err(ExchangeError::RateLimit(format!("{} ({})", msg, code)));
        }
        Err(ExchangeError::Api(format!(
            "{} returned {}: {} (code {})",
            path, status, msg, code
        )))
    }

    fn parse_f64(value: &Value, field: &str) -> ExchangeResult<f64> {
        value
            .as_str()
            .and_then(|s| s.parse::<f64>().ok())
            .or_else(|| value.as_f64())
            .ok_or_else(|| ExchangeError::Api(format!("missing or invalid field {}", field)))
    }

    fn parse_kline_row(row: &Value) -> ExchangeResult<RawKline> {
        let arr = row
            .as_array()
            .ok_or_else(|| ExchangeError::Api("kline row is not an array".to_string()))?;
        if arr.len() < 9 {
            return Err(ExchangeError::Api("kline row too short".to_string()));
        }

        Ok(RawKline {
            open_time: arr[0]
                .as_i64()
                .ok_or_else(|| ExchangeError::Api("invalid kline open time".to_string()))?,
            open: Self::parse_f64(&arr[1], "open")?,
            high: Self::parse_f64(&arr[2], "high")?,
            low: Self::parse_f64(&arr[3], "low")?,
            close: Self::parse_f64(&arr[4], "close")?,
            volume: Self::parse_f64(&arr[5], "volume")?,
            close_time: arr[6]
                .as_i64()
                .ok_or_else(|| ExchangeError::Api("invalid kline close time".to_string()))?,
            quote_volume: Self::parse_f64(&arr[7], "quote volume")?,
            trades: arr[8].as_i64().unwrap_or(0),
        })
    }

    async fn fetch_symbol_info(&self, symbol: &str) -> ExchangeResult<Option<Value>> {
        let params = [("symbol", symbol.to_string())];
        let value = self
            .request(
                Method::GET,
                "/fapi/v1/exchangeInfo",
                &params,
                false,
                ApiCategory::Request,
                1,
            )
            .await?;

        let found = value["symbols"]
            .as_array()
            .and_then(|symbols| {
                symbols
                    .iter()
                    .find(|s| s["symbol"].as_str() == Some(symbol))
            })
            .cloned();
        Ok(found)
    }
}

#[async_trait]
impl ExchangeClient for BinanceFuturesClient {
    async fn klines(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: u32,
        start_time: Option<i64>,
        end_time: Option<i64>,
    ) -> ExchangeResult<Vec<RawKline>> {
        let mut params = vec![
            ("symbol", symbol.to_string()),
            ("interval", timeframe.to_string()),
            ("limit", limit.min(1000).to_string()),
        ];
        if let Some(start) = start_time {
            params.push(("startTime", start.to_string()));
        }
        if let Some(end) = end_time {
            params.push(("endTime", end.to_string()));
        }

        let value = self
            .request(
                Method::GET,
                "/fapi/v1/klines",
                &params,
                false,
                ApiCategory::Request,
                5,
            )
            .await?;

        let rows = value
            .as_array()
            .ok_or_else(|| ExchangeError::Api("klines response is not an array".to_string()))?;

        rows.iter().map(Self::parse_kline_row).collect()
    }

    async fn mark_price(&self, symbol: &str) -> ExchangeResult<f64> {
        let params = [("symbol", symbol.to_string())];
        let value = self
            .request(
                Method::GET,
                "/fapi/v1/premiumIndex",
                &params,
                false,
                ApiCategory::Request,
                1,
            )
            .await?;
        Self::parse_f64(&value["markPrice"], "markPrice")
    }

    async fn symbol_filters(&self, symbol: &str) -> ExchangeResult<SymbolFilters> {
        if let Some(cached) = self.filters.lock().unwrap().get(symbol) {
            return Ok(cached.clone());
        }

        let info = self
            .fetch_symbol_info(symbol)
            .await?
            .ok_or_else(|| ExchangeError::InvalidSymbol(symbol.to_string()))?;

        let empty = Vec::new();
        let filters = info["filters"].as_array().unwrap_or(&empty);
        let find = |filter_type: &str, field: &str| -> Option<Decimal> {
            filters
                .iter()
                .find(|f| f["filterType"].as_str() == Some(filter_type))
                .and_then(|f| f[field].as_str())
                .and_then(|s| Decimal::from_str(s).ok())
        };

        let parsed = SymbolFilters {
            step_size: find("LOT_SIZE", "stepSize")
                .ok_or_else(|| ExchangeError::Api(format!("no LOT_SIZE filter for {}", symbol)))?,
            min_qty: find("LOT_SIZE", "minQty").unwrap_or(Decimal::ZERO),
            min_notional: find("MIN_NOTIONAL", "notional").unwrap_or(Decimal::ZERO),
        };

        self.filters
            .lock()
            .unwrap()
            .insert(symbol.to_string(), parsed.clone());
        Ok(parsed)
    }

    async fn is_symbol_tradeable(&self, symbol: &str) -> ExchangeResult<bool> {
        match self.fetch_symbol_info(symbol).await {
            Ok(Some(info)) => Ok(info["status"].as_str() == Some("TRADING")),
            Ok(None) => Ok(false),
            // Binance answers an unknown symbol on this endpoint with an
            // error rather than an empty list.
            Err(ExchangeError::Api(_)) | Err(ExchangeError::InvalidSymbol(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn set_margin_type(&self, symbol: &str, isolated: bool) -> ExchangeResult<()> {
        let margin_type = if isolated { "ISOLATED" } else { "CROSSED" };
        let params = [
            ("symbol", symbol.to_string()),
            ("marginType", margin_type.to_string()),
        ];
        match self
            .request(
                Method::POST,
                "/fapi/v1/marginType",
                &params,
                true,
                ApiCategory::Request,
                1,
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(ExchangeError::Api(msg))
                if msg.contains(&MARGIN_TYPE_NO_CHANGE.to_string()) =>
            {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> ExchangeResult<()> {
        let params = [
            ("symbol", symbol.to_string()),
            ("leverage", leverage.to_string()),
        ];
        self.request(
            Method::POST,
            "/fapi/v1/leverage",
            &params,
            true,
            ApiCategory::Request,
            1,
        )
        .await?;
        Ok(())
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        reduce_only: bool,
    ) -> ExchangeResult<RawOrderFill> {
        let mut params = vec![
            ("symbol", symbol.to_string()),
            ("side", side.as_str().to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", quantity.to_string()),
            ("newOrderRespType", "RESULT".to_string()),
        ];
        if reduce_only {
            params.push(("reduceOnly", "true".to_string()));
        }

        let value = self
            .request(
                Method::POST,
                "/fapi/v1/order",
                &params,
                true,
                ApiCategory::Order,
                1,
            )
            .await?;

        let order_id = value["orderId"]
            .as_i64()
            .map(|id| id.to_string())
            .ok_or_else(|| ExchangeError::Order("order response missing orderId".to_string()))?;

        Ok(RawOrderFill {
            order_id,
            avg_price: Self::parse_f64(&value["avgPrice"], "avgPrice").unwrap_or(0.0),
            executed_qty: Self::parse_f64(&value["executedQty"], "executedQty").unwrap_or(0.0),
            // RESULT responses carry no commission breakdown; fills would
            // need newOrderRespType=FULL, which futures does not support.
            commission: 0.0,
            timestamp: value["updateTime"]
                .as_i64()
                .unwrap_or_else(|| chrono::Utc::now().timestamp_millis()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> BinanceFuturesClient {
        BinanceFuturesClient::new("key", "secret", Arc::new(RateLimiter::binance_futures()))
    }

    #[test]
    fn signature_is_deterministic_hex() {
        let c = client();
        let sig = c.sign("symbol=BTCUSDT&timestamp=1");
        assert_eq!(sig.len(), 64);
        assert_eq!(sig, c.sign("symbol=BTCUSDT&timestamp=1"));
        assert!(sig.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn kline_row_parses_binance_shape() {
        let row = serde_json::json!([
            1700000000000i64,
            "42000.1",
            "42100.5",
            "41900.0",
            "42050.2",
            "123.45",
            1700000059999i64,
            "5190000.0",
            321,
            "60.0",
            "2500000.0",
            "0"
        ]);
        let kline = BinanceFuturesClient::parse_kline_row(&row).unwrap();
        assert_eq!(kline.open_time, 1700000000000);
        assert_eq!(kline.close_time, 1700000059999);
        assert!((kline.close - 42050.2).abs() < 1e-9);
        assert_eq!(kline.trades, 321);
    }

    #[test]
    fn kline_row_rejects_short_rows() {
        let row = serde_json::json!([1, "2", "3"]);
        assert!(BinanceFuturesClient::parse_kline_row(&row).is_err());
    }
}
