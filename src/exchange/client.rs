// src/exchange/client.rs
use crate::domain::errors::ExchangeResult;
use crate::domain::models::OrderSide;
use async_trait::async_trait;
use rust_decimal::Decimal;

/// One raw kline row as returned by the exchange, already parsed to numbers.
#[derive(Debug, Clone, Default)]
pub struct RawKline {
    pub open_time: i64,
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub quote_volume: f64,
    pub trades: i64,
}

/// Order-size constraints from the exchange's symbol filters.
#[derive(Debug, Clone)]
pub struct SymbolFilters {
    pub step_size: Decimal,
    pub min_qty: Decimal,
    pub min_notional: Decimal,
}

/// Raw fill data from a market order, before mapping into `OrderResult`.
#[derive(Debug, Clone)]
pub struct RawOrderFill {
    pub order_id: String,
    pub avg_price: f64,
    pub executed_qty: f64,
    pub commission: f64,
    pub timestamp: i64,
}

/// Futures exchange REST collaborator.
///
/// The core only needs these operations as abstract calls; request/response
/// shapes belong to the implementing client.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Candle query. `limit` is capped by the exchange per call; pagination
    /// is the fetcher's concern.
    async fn klines(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: u32,
        start_time: Option<i64>,
        end_time: Option<i64>,
    ) -> ExchangeResult<Vec<RawKline>>;

    /// Current mark price for the symbol.
    async fn mark_price(&self, symbol: &str) -> ExchangeResult<f64>;

    /// LOT_SIZE / MIN_NOTIONAL constraints for the symbol.
    async fn symbol_filters(&self, symbol: &str) -> ExchangeResult<SymbolFilters>;

    /// Whether the symbol exists and is currently tradeable.
    async fn is_symbol_tradeable(&self, symbol: &str) -> ExchangeResult<bool>;

    /// Set isolated/cross margin. Implementations tolerate the exchange's
    /// "already set" response.
    async fn set_margin_type(&self, symbol: &str, isolated: bool) -> ExchangeResult<()>;

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> ExchangeResult<()>;

    /// Place a market order. `reduce_only` marks position-closing orders.
    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        reduce_only: bool,
    ) -> ExchangeResult<RawOrderFill>;
}
