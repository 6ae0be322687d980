// src/testutil.rs
//! Shared test doubles: a scriptable in-memory exchange and candle
//! generators.
use crate::domain::errors::{ExchangeError, ExchangeResult};
use crate::domain::models::{Candle, OrderSide};
use crate::exchange::client::{ExchangeClient, RawKline, RawOrderFill, SymbolFilters};
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

pub const BASE_OPEN_TIME: i64 = 1_700_000_000_000;

/// Scriptable exchange double. Histories are keyed by (symbol, timeframe);
/// failure switches let tests drive the retry and pause paths.
pub struct MockExchange {
    series: Mutex<HashMap<(String, String), Vec<RawKline>>>,
    kline_calls: AtomicUsize,
    fail_klines: AtomicBool,
    fail_orders: AtomicBool,
    order_attempts: AtomicUsize,
    orders: Mutex<Vec<(String, OrderSide, Decimal, bool)>>,
    margin_calls: Mutex<Vec<(String, bool)>>,
    leverage_calls: Mutex<Vec<(String, u32)>>,
    mark: Mutex<f64>,
    tradeable: AtomicBool,
    filters: Mutex<SymbolFilters>,
}

impl MockExchange {
    pub fn new() -> Self {
        Self {
            series: Mutex::new(HashMap::new()),
            kline_calls: AtomicUsize::new(0),
            fail_klines: AtomicBool::new(false),
            fail_orders: AtomicBool::new(false),
            order_attempts: AtomicUsize::new(0),
            orders: Mutex::new(Vec::new()),
            margin_calls: Mutex::new(Vec::new()),
            leverage_calls: Mutex::new(Vec::new()),
            mark: Mutex::new(100.0),
            tradeable: AtomicBool::new(true),
            filters: Mutex::new(SymbolFilters {
                step_size: dec!(0.001),
                min_qty: dec!(0.001),
                min_notional: dec!(5),
            }),
        }
    }

    pub fn with_history(symbol: &str, timeframe: &str, n: usize) -> Self {
        let mock = Self::new();
        mock.add_series(symbol, timeframe, n);
        mock
    }

    /// Install `n` gently uptrending candles for the pair.
    pub fn add_series(&self, symbol: &str, timeframe: &str, n: usize) {
        let tf_ms = crate::domain::models::timeframe_ms(timeframe);
        let rows = (0..n)
            .map(|i| {
                let open_time = BASE_OPEN_TIME + i as i64 * tf_ms;
                let price = 100.0 + i as f64 * 0.01;
                RawKline {
                    open_time,
                    close_time: open_time + tf_ms - 1,
                    open: price,
                    high: price + 0.05,
                    low: price - 0.05,
                    close: price,
                    volume: 10.0,
                    quote_volume: price * 10.0,
                    trades: 5,
                }
            })
            .collect();
        self.series
            .lock()
            .unwrap()
            .insert((symbol.to_string(), timeframe.to_string()), rows);
    }

    pub fn kline_calls(&self) -> usize {
        self.kline_calls.load(Ordering::SeqCst)
    }

    pub fn order_attempts(&self) -> usize {
        self.order_attempts.load(Ordering::SeqCst)
    }

    pub fn orders(&self) -> Vec<(String, OrderSide, Decimal, bool)> {
        self.orders.lock().unwrap().clone()
    }

    pub fn leverage_calls(&self) -> Vec<(String, u32)> {
        self.leverage_calls.lock().unwrap().clone()
    }

    pub fn margin_calls(&self) -> Vec<(String, bool)> {
        self.margin_calls.lock().unwrap().clone()
    }

    pub fn set_fail_klines(&self, fail: bool) {
        self.fail_klines.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_orders(&self, fail: bool) {
        self.fail_orders.store(fail, Ordering::SeqCst);
    }

    pub fn set_tradeable(&self, tradeable: bool) {
        self.tradeable.store(tradeable, Ordering::SeqCst);
    }

    pub fn set_mark_price(&self, price: f64) {
        *self.mark.lock().unwrap() = price;
    }

    pub fn set_filters(&self, filters: SymbolFilters) {
        *self.filters.lock().unwrap() = filters;
    }

    /// Rewrite the close of the newest stored candle, simulating a live
    /// update of an open bucket.
    pub fn bump_last_close(&self, close: f64) {
        let mut series = self.series.lock().unwrap();
        for rows in series.values_mut() {
            if let Some(last) = rows.last_mut() {
                last.close = close;
            }
        }
    }

    /// Append one closed candle to every stored series.
    pub fn push_candle(&self, close: f64) {
        let mut series = self.series.lock().unwrap();
        for ((_, timeframe), rows) in series.iter_mut() {
            let tf_ms = crate::domain::models::timeframe_ms(timeframe);
            let open_time = rows.last().map(|r| r.open_time + tf_ms).unwrap_or(BASE_OPEN_TIME);
            rows.push(RawKline {
                open_time,
                close_time: open_time + tf_ms - 1,
                open: close,
                high: close + 0.05,
                low: close - 0.05,
                close,
                volume: 10.0,
                quote_volume: close * 10.0,
                trades: 5,
            });
        }
    }
}

#[async_trait]
impl ExchangeClient for MockExchange {
    async fn klines(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: u32,
        start_time: Option<i64>,
        end_time: Option<i64>,
    ) -> ExchangeResult<Vec<RawKline>> {
        self.kline_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_klines.load(Ordering::SeqCst) {
            return Err(ExchangeError::Api("scripted kline failure".to_string()));
        }

        let series = self.series.lock().unwrap();
        let rows = match series.get(&(symbol.to_string(), timeframe.to_string())) {
            Some(rows) => rows,
            None => return Ok(Vec::new()),
        };

        let filtered: Vec<RawKline> = rows
            .iter()
            .filter(|r| start_time.map(|s| r.open_time >= s).unwrap_or(true))
            .filter(|r| end_time.map(|e| r.open_time <= e).unwrap_or(true))
            .cloned()
            .collect();

        let limit = limit as usize;
        let out = if start_time.is_some() {
            filtered.into_iter().take(limit).collect()
        } else {
            let skip = filtered.len().saturating_sub(limit);
            filtered.into_iter().skip(skip).collect()
        };
        Ok(out)
    }

    async fn mark_price(&self, _symbol: &str) -> ExchangeResult<f64> {
        Ok(*self.mark.lock().unwrap())
    }

    async fn symbol_filters(&self, _symbol: &str) -> ExchangeResult<SymbolFilters> {
        Ok(self.filters.lock().unwrap().clone())
    }

    async fn is_symbol_tradeable(&self, _symbol: &str) -> ExchangeResult<bool> {
        Ok(self.tradeable.load(Ordering::SeqCst))
    }

    async fn set_margin_type(&self, symbol: &str, isolated: bool) -> ExchangeResult<()> {
        self.margin_calls
            .lock()
            .unwrap()
            .push((symbol.to_string(), isolated));
        Ok(())
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> ExchangeResult<()> {
        self.leverage_calls
            .lock()
            .unwrap()
            .push((symbol.to_string(), leverage));
        Ok(())
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        reduce_only: bool,
    ) -> ExchangeResult<RawOrderFill> {
        self.order_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_orders.load(Ordering::SeqCst) {
            return Err(ExchangeError::Api("Margin is insufficient".to_string()));
        }

        self.orders
            .lock()
            .unwrap()
            .push((symbol.to_string(), side, quantity, reduce_only));
        let price = *self.mark.lock().unwrap();
        Ok(RawOrderFill {
            order_id: format!("mock-{}", self.order_attempts.load(Ordering::SeqCst)),
            avg_price: price,
            executed_qty: quantity.to_f64().unwrap_or(0.0),
            commission: 0.0,
            timestamp: chrono::Utc::now().timestamp_millis(),
        })
    }
}

/// Candles from a close series, one minute apart, flat volume.
pub fn candles_from_closes(symbol: &str, closes: &[f64]) -> Vec<Candle> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open_time = BASE_OPEN_TIME + i as i64 * 60_000;
            Candle {
                symbol: symbol.to_string(),
                timeframe: "1m".to_string(),
                open_time,
                close_time: open_time + 59_999,
                open: close,
                high: close + 0.1,
                low: close - 0.1,
                close,
                volume: 10.0,
                quote_volume: close * 10.0,
                trades: 5,
            }
        })
        .collect()
}

/// A steadily rising close series long enough for a full snapshot.
pub fn uptrend_closes(n: usize) -> Vec<f64> {
    (0..n).map(|i| 100.0 + i as f64 * 0.05).collect()
}
