// src/trading/execution.rs
use crate::domain::errors::{TradingError, TradingResult};
use crate::domain::models::{OrderResult, OrderSide};
use crate::exchange::{ExchangeClient, RawOrderFill};
use log::{info, warn};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Retry behaviour for order placement. Delays grow as
/// `base_delay * multiplier^attempt`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * self.multiplier.saturating_pow(attempt)
    }
}

/// Places market orders through an exchange client, handling quantity
/// normalization, symbol preparation and bounded retries.
pub struct ExecutionAdapter<C: ExchangeClient> {
    client: Arc<C>,
    retry: RetryPolicy,
}

impl<C: ExchangeClient> ExecutionAdapter<C> {
    pub fn new(client: Arc<C>, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    /// Round a raw quantity down to the symbol's step size and verify
    /// the exchange minimums at the given reference price.
    pub async fn normalize_quantity(
        &self,
        symbol: &str,
        raw_quantity: f64,
        price: f64,
    ) -> TradingResult<Decimal> {
        let filters = self
            .client
            .symbol_filters(symbol)
            .await
            .map_err(|e| TradingError::Normalization(e.to_string()))?;

        let quantity = Decimal::from_f64(raw_quantity).ok_or_else(|| {
            TradingError::Normalization(format!("quantity {} is not representable", raw_quantity))
        })?;
        let price_dec = Decimal::from_f64(price).ok_or_else(|| {
            TradingError::Normalization(format!("price {} is not representable", price))
        })?;

        if filters.step_size <= Decimal::ZERO {
            return Err(TradingError::Normalization(format!(
                "invalid step size {} for {}",
                filters.step_size, symbol
            )));
        }
        let stepped = (quantity / filters.step_size).floor() * filters.step_size;

        if stepped < filters.min_qty {
            return Err(TradingError::Normalization(format!(
                "quantity {} below minimum {} for {}",
                stepped, filters.min_qty, symbol
            )));
        }
        let notional = stepped * price_dec;
        if notional < filters.min_notional {
            return Err(TradingError::Normalization(format!(
                "notional {} below minimum {} for {}",
                notional, filters.min_notional, symbol
            )));
        }
        Ok(stepped.normalize())
    }

    /// Check tradeability and set the margin mode plus leverage.
    /// Returns false when the symbol cannot be traded at all.
    pub async fn prepare_symbol(
        &self,
        symbol: &str,
        leverage: u32,
        isolated: bool,
    ) -> TradingResult<bool> {
        let tradeable = self
            .client
            .is_symbol_tradeable(symbol)
            .await
            .map_err(|e| TradingError::OrderExecution(e.to_string()))?;
        if !tradeable {
            return Ok(false);
        }
        self.client
            .set_margin_type(symbol, isolated)
            .await
            .map_err(|e| TradingError::OrderExecution(e.to_string()))?;
        self.client
            .set_leverage(symbol, leverage)
            .await
            .map_err(|e| TradingError::OrderExecution(e.to_string()))?;
        Ok(true)
    }

    pub async fn place_market_long(&self, symbol: &str, quantity: Decimal) -> OrderResult {
        self.place_with_retry(symbol, OrderSide::Buy, quantity, false)
            .await
    }

    pub async fn close_market_long(&self, symbol: &str, quantity: Decimal) -> OrderResult {
        self.place_with_retry(symbol, OrderSide::Sell, quantity, true)
            .await
    }

    async fn place_with_retry(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        reduce_only: bool,
    ) -> OrderResult {
        let mut last_error = String::new();
        for attempt in 0..self.retry.max_attempts {
            match self
                .client
                .place_market_order(symbol, side, quantity, reduce_only)
                .await
            {
                Ok(fill) => {
                    info!(
                        "{} {} {} filled at {} (order {})",
                        side.as_str(),
                        quantity,
                        symbol,
                        fill.avg_price,
                        fill.order_id
                    );
                    return Self::fill_to_result(side, fill);
                }
                Err(e) => {
                    last_error = e.to_string();
                    let remaining = self.retry.max_attempts - attempt - 1;
                    if remaining > 0 {
                        let delay = self.retry.delay_for(attempt);
                        warn!(
                            "{} order on {} failed ({}), retrying in {:?} ({} left)",
                            side.as_str(),
                            symbol,
                            last_error,
                            delay,
                            remaining
                        );
                        sleep(delay).await;
                    }
                }
            }
        }
        warn!(
            "{} order on {} failed after {} attempts: {}",
            side.as_str(),
            symbol,
            self.retry.max_attempts,
            last_error
        );
        OrderResult::failed(side, last_error)
    }

    fn fill_to_result(side: OrderSide, fill: RawOrderFill) -> OrderResult {
        OrderResult {
            success: true,
            order_id: Some(fill.order_id),
            side,
            avg_price: fill.avg_price,
            quantity: fill.executed_qty,
            commission: fill.commission,
            timestamp: fill.timestamp,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::SymbolFilters;
    use crate::testutil::MockExchange;
    use rust_decimal_macros::dec;

    fn adapter(mock: Arc<MockExchange>) -> ExecutionAdapter<MockExchange> {
        ExecutionAdapter::new(mock, RetryPolicy::default())
    }

    #[tokio::test]
    async fn normalizes_quantity_down_to_step() {
        let mock = Arc::new(MockExchange::new());
        mock.set_filters(SymbolFilters {
            step_size: dec!(0.001),
            min_qty: dec!(0.001),
            min_notional: dec!(5),
        });
        let qty = adapter(mock)
            .normalize_quantity("BTCUSDT", 0.123456, 100.0)
            .await
            .unwrap();
        assert_eq!(qty, dec!(0.123));
    }

    #[tokio::test]
    async fn rejects_quantity_below_minimums() {
        let mock = Arc::new(MockExchange::new());
        mock.set_filters(SymbolFilters {
            step_size: dec!(0.001),
            min_qty: dec!(0.01),
            min_notional: dec!(5),
        });
        let adapter = adapter(mock);

        let err = adapter
            .normalize_quantity("BTCUSDT", 0.005, 100.0)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("below minimum"));

        // Meets min_qty but not notional at a low price.
        let err = adapter
            .normalize_quantity("BTCUSDT", 0.02, 100.0)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("notional"));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_exactly_max_attempts_then_reports_failure() {
        let mock = Arc::new(MockExchange::new());
        mock.set_fail_orders(true);
        let result = adapter(mock.clone())
            .place_market_long("BTCUSDT", dec!(0.1))
            .await;
        assert!(!result.success);
        assert_eq!(mock.order_attempts(), 3);
        assert!(result.error.unwrap().contains("Margin is insufficient"));
    }

    #[tokio::test]
    async fn successful_fill_maps_to_order_result() {
        let mock = Arc::new(MockExchange::new());
        mock.set_mark_price(250.0);
        let result = adapter(mock.clone())
            .place_market_long("ETHUSDT", dec!(0.5))
            .await;
        assert!(result.success);
        assert_eq!(result.avg_price, 250.0);
        assert_eq!(result.side, OrderSide::Buy);
        assert!(result.order_id.is_some());

        let orders = mock.orders();
        assert_eq!(orders.len(), 1);
        assert!(!orders[0].3, "entry must not be reduce-only");
    }

    #[tokio::test]
    async fn close_is_reduce_only_sell() {
        let mock = Arc::new(MockExchange::new());
        let result = adapter(mock.clone())
            .close_market_long("ETHUSDT", dec!(0.5))
            .await;
        assert!(result.success);
        assert_eq!(result.side, OrderSide::Sell);
        assert!(mock.orders()[0].3);
    }

    #[tokio::test]
    async fn prepare_symbol_reports_untradeable() {
        let mock = Arc::new(MockExchange::new());
        mock.set_tradeable(false);
        let ready = adapter(mock.clone())
            .prepare_symbol("DELISTED", 5, true)
            .await
            .unwrap();
        assert!(!ready);
        assert!(mock.leverage_calls().is_empty());

        mock.set_tradeable(true);
        let ready = adapter(mock.clone())
            .prepare_symbol("BTCUSDT", 5, true)
            .await
            .unwrap();
        assert!(ready);
        assert_eq!(mock.leverage_calls(), vec![("BTCUSDT".to_string(), 5)]);
    }

    #[tokio::test]
    async fn prepare_symbol_applies_configured_margin_mode() {
        let mock = Arc::new(MockExchange::new());
        adapter(mock.clone())
            .prepare_symbol("BTCUSDT", 10, false)
            .await
            .unwrap();
        assert_eq!(mock.margin_calls(), vec![("BTCUSDT".to_string(), false)]);

        adapter(mock.clone())
            .prepare_symbol("ETHUSDT", 10, true)
            .await
            .unwrap();
        assert_eq!(mock.margin_calls()[1], ("ETHUSDT".to_string(), true));
    }
}
