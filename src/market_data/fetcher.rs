// src/market_data/fetcher.rs
use crate::domain::errors::{MarketDataError, MarketDataResult};
use crate::domain::models::Candle;
use crate::exchange::client::{ExchangeClient, RawKline};
use crate::market_data::cache::MarketDataCache;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

/// Exchange cap on rows per klines call.
const PAGE_LIMIT: u32 = 1000;

/// Pulls candles from the exchange into the cache.
///
/// Covers three paths: paginated historical loads, an incremental
/// latest-candle refresh, and background polling loops (one per
/// (symbol, timeframe) pair).
pub struct DataFetcher<C: ExchangeClient> {
    client: Arc<C>,
    cache: Arc<MarketDataCache>,
    poll_interval: Duration,
    error_backoff: Duration,
    polling: Arc<AtomicBool>,
    pollers: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl<C: ExchangeClient + 'static> DataFetcher<C> {
    pub fn new(client: Arc<C>, cache: Arc<MarketDataCache>) -> Self {
        Self {
            client,
            cache,
            poll_interval: Duration::from_secs(1),
            error_backoff: Duration::from_secs(5),
            polling: Arc::new(AtomicBool::new(false)),
            pollers: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn cache(&self) -> &Arc<MarketDataCache> {
        &self.cache
    }

    fn to_candle(symbol: &str, timeframe: &str, row: RawKline) -> Candle {
        Candle {
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            open_time: row.open_time,
            close_time: row.close_time,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
            quote_volume: row.quote_volume,
            trades: row.trades,
        }
    }

    /// Fetch up to `limit` candles, paginating under the exchange cap, and
    /// bulk-insert them into the cache. Without a range the most recent
    /// `limit` candles are walked backwards from now; with one, forwards
    /// from its start.
    pub async fn fetch_historical(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
        range: Option<(i64, i64)>,
    ) -> MarketDataResult<Vec<Candle>> {
        let candles = match range {
            Some((start, end)) => self.fetch_range(symbol, timeframe, limit, start, end).await?,
            None => self.fetch_recent(symbol, timeframe, limit).await?,
        };

        self.cache.add_candles_bulk(candles.clone());
        log::debug!(
            "loaded {} candles for {}/{}",
            candles.len(),
            symbol,
            timeframe
        );
        Ok(candles)
    }

    async fn fetch_recent(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> MarketDataResult<Vec<Candle>> {
        let mut pages: Vec<Vec<Candle>> = Vec::new();
        let mut remaining = limit;
        let mut end_cursor: Option<i64> = None;

        while remaining > 0 {
            let page_size = (remaining as u32).min(PAGE_LIMIT);
            let rows = self
                .client
                .klines(symbol, timeframe, page_size, None, end_cursor)
                .await
                .map_err(|e| MarketDataError::Fetch(e.to_string()))?;
            if rows.is_empty() {
                break;
            }

            let fetched = rows.len();
            end_cursor = Some(rows[0].open_time - 1);
            pages.push(
                rows.into_iter()
                    .map(|r| Self::to_candle(symbol, timeframe, r))
                    .collect(),
            );
            remaining = remaining.saturating_sub(fetched);
            if fetched < page_size as usize {
                // History exhausted before the requested depth.
                break;
            }
        }

        // Pages were walked newest-first; flatten back to ascending order.
        pages.reverse();
        Ok(pages.into_iter().flatten().collect())
    }

    async fn fetch_range(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
        start: i64,
        end: i64,
    ) -> MarketDataResult<Vec<Candle>> {
        let mut out: Vec<Candle> = Vec::new();
        let mut cursor = start;

        while out.len() < limit && cursor <= end {
            let page_size = ((limit - out.len()) as u32).min(PAGE_LIMIT);
            let rows = self
                .client
                .klines(symbol, timeframe, page_size, Some(cursor), Some(end))
                .await
                .map_err(|e| MarketDataError::Fetch(e.to_string()))?;
            if rows.is_empty() {
                break;
            }

            let fetched = rows.len();
            cursor = rows[fetched - 1].close_time + 1;
            out.extend(
                rows.into_iter()
                    .map(|r| Self::to_candle(symbol, timeframe, r)),
            );
            if fetched < page_size as usize {
                break;
            }
        }

        Ok(out)
    }

    /// Fetch the single most recent candle and upsert it into the cache.
    pub async fn fetch_latest_candle(
        &self,
        symbol: &str,
        timeframe: &str,
    ) -> MarketDataResult<Candle> {
        let rows = self
            .client
            .klines(symbol, timeframe, 1, None, None)
            .await
            .map_err(|e| MarketDataError::Fetch(e.to_string()))?;
        let row = rows.into_iter().last().ok_or(MarketDataError::InsufficientData {
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            have: 0,
            need: 1,
        })?;

        let candle = Self::to_candle(symbol, timeframe, row);
        self.cache.add_candle(candle.clone());
        Ok(candle)
    }

    /// Latest `n` candles, served from cache when possible. A cache miss
    /// triggers a fetch, retried once, before giving up with
    /// `InsufficientData`.
    pub async fn latest(
        &self,
        symbol: &str,
        timeframe: &str,
        n: usize,
    ) -> MarketDataResult<Vec<Candle>> {
        for _attempt in 0..2 {
            if self.cache.has_sufficient(symbol, timeframe, n) {
                return self.cache.latest(symbol, timeframe, n);
            }
            self.fetch_historical(symbol, timeframe, n.max(1), None)
                .await?;
        }
        self.cache.latest(symbol, timeframe, n)
    }

    /// Spawn one polling loop per pair, each refreshing the latest candle
    /// at a fixed interval. Fetch errors back off and keep the loop alive.
    pub async fn start_polling(
        self: &Arc<Self>,
        pairs: &[(String, String)],
        on_update: Arc<dyn Fn(Candle) + Send + Sync>,
    ) {
        self.polling.store(true, Ordering::SeqCst);
        let mut pollers = self.pollers.lock().await;

        for (symbol, timeframe) in pairs {
            let fetcher = Arc::clone(self);
            let flag = Arc::clone(&self.polling);
            let on_update = Arc::clone(&on_update);
            let symbol = symbol.clone();
            let timeframe = timeframe.clone();

            pollers.push(tokio::spawn(async move {
                log::info!("polling started for {}/{}", symbol, timeframe);
                while flag.load(Ordering::SeqCst) {
                    match fetcher.fetch_latest_candle(&symbol, &timeframe).await {
                        Ok(candle) => {
                            on_update(candle);
                            sleep(fetcher.poll_interval).await;
                        }
                        Err(e) => {
                            log::warn!(
                                "poll failed for {}/{}: {}, backing off",
                                symbol,
                                timeframe,
                                e
                            );
                            sleep(fetcher.error_backoff).await;
                        }
                    }
                }
                log::info!("polling stopped for {}/{}", symbol, timeframe);
            }));
        }
    }

    /// Flag every polling loop down and await their termination.
    pub async fn stop_polling(&self) {
        self.polling.store(false, Ordering::SeqCst);
        let mut pollers = self.pollers.lock().await;
        for handle in pollers.drain(..) {
            if let Err(e) = handle.await {
                log::warn!("poller task ended abnormally: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockExchange;
    use std::sync::atomic::AtomicUsize;

    fn setup(history: usize) -> (Arc<MockExchange>, Arc<DataFetcher<MockExchange>>) {
        let client = Arc::new(MockExchange::with_history("BTCUSDT", "1m", history));
        let cache = Arc::new(MarketDataCache::new(1000));
        let fetcher = Arc::new(DataFetcher::new(Arc::clone(&client), cache));
        (client, fetcher)
    }

    #[tokio::test]
    async fn fetch_historical_paginates_and_sorts_ascending() {
        let (client, fetcher) = setup(2500);
        let candles = fetcher
            .fetch_historical("BTCUSDT", "1m", 2400, None)
            .await
            .unwrap();

        assert_eq!(candles.len(), 2400);
        assert!(candles
            .windows(2)
            .all(|w| w[0].open_time < w[1].open_time));
        // 2400 rows at a 1000-row page cap means three upstream calls.
        assert_eq!(client.kline_calls(), 3);
        assert!(fetcher.cache().has_sufficient("BTCUSDT", "1m", 1000));
    }

    #[tokio::test]
    async fn latest_serves_from_cache_without_refetch() {
        let (client, fetcher) = setup(300);
        fetcher
            .fetch_historical("BTCUSDT", "1m", 250, None)
            .await
            .unwrap();
        let calls_before = client.kline_calls();

        let candles = fetcher.latest("BTCUSDT", "1m", 200).await.unwrap();
        assert_eq!(candles.len(), 200);
        assert_eq!(client.kline_calls(), calls_before);
    }

    #[tokio::test]
    async fn latest_fails_with_insufficient_data_after_retry() {
        let (client, fetcher) = setup(50);
        let err = fetcher.latest("BTCUSDT", "1m", 200).await.unwrap_err();
        match err {
            MarketDataError::InsufficientData { have, need, .. } => {
                assert_eq!(have, 50);
                assert_eq!(need, 200);
            }
            other => panic!("unexpected error: {}", other),
        }
        // First miss plus one retry.
        assert_eq!(client.kline_calls(), 2);
    }

    #[tokio::test]
    async fn fetch_latest_candle_upserts_open_bucket() {
        let (client, fetcher) = setup(10);
        fetcher
            .fetch_historical("BTCUSDT", "1m", 10, None)
            .await
            .unwrap();
        let before = fetcher.cache().len("BTCUSDT", "1m");

        client.bump_last_close(999.0);
        let candle = fetcher.fetch_latest_candle("BTCUSDT", "1m").await.unwrap();
        assert!((candle.close - 999.0).abs() < 1e-9);
        assert_eq!(fetcher.cache().len("BTCUSDT", "1m"), before);
    }

    #[tokio::test(start_paused = true)]
    async fn polling_survives_errors_and_stops_cleanly() {
        let (client, fetcher) = setup(10);
        let updates = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&updates);

        client.set_fail_klines(true);
        fetcher
            .start_polling(
                &[("BTCUSDT".to_string(), "1m".to_string())],
                Arc::new(move |_| {
                    seen.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await;

        // Errors back off without killing the loop.
        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(updates.load(Ordering::SeqCst), 0);

        client.set_fail_klines(false);
        tokio::time::sleep(Duration::from_secs(12)).await;
        assert!(updates.load(Ordering::SeqCst) > 0);

        fetcher.stop_polling().await;
        let after = updates.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(updates.load(Ordering::SeqCst), after);
    }
}
