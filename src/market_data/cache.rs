// src/market_data/cache.rs
use crate::domain::errors::{MarketDataError, MarketDataResult};
use crate::domain::models::Candle;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Bounded, per-(symbol, timeframe) ordered candle store.
///
/// Each key holds a fixed-capacity ring of candles sorted ascending by open
/// time. The newest entry is replaced in place when a live update arrives
/// with the same open time; otherwise the candle is appended and the oldest
/// entry evicted once the ring is full. Keys are created on first use and
/// unbounded in number.
pub struct MarketDataCache {
    max_candles: usize,
    series: Mutex<HashMap<(String, String), VecDeque<Candle>>>,
}

impl MarketDataCache {
    pub fn new(max_candles: usize) -> Self {
        Self {
            max_candles,
            series: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_candles(&self) -> usize {
        self.max_candles
    }

    fn key(symbol: &str, timeframe: &str) -> (String, String) {
        (symbol.to_string(), timeframe.to_string())
    }

    /// Upsert one candle: replace the last entry on matching open time,
    /// append (with eviction) when newer. Candles at or before an
    /// already-stored open time are dropped so overlapping refills
    /// cannot break the ascending order.
    pub fn add_candle(&self, candle: Candle) {
        let mut series = self.series.lock().unwrap();
        let ring = series
            .entry(Self::key(&candle.symbol, &candle.timeframe))
            .or_default();

        if let Some(last) = ring.back_mut() {
            if last.open_time == candle.open_time {
                *last = candle;
                return;
            }
            if last.open_time > candle.open_time {
                return;
            }
        }

        if ring.len() == self.max_candles {
            ring.pop_front();
        }
        ring.push_back(candle);
    }

    /// Bulk-insert candles, assumed sorted ascending by the fetcher.
    pub fn add_candles_bulk(&self, candles: Vec<Candle>) {
        for candle in candles {
            self.add_candle(candle);
        }
    }

    /// Latest `n` candles, oldest first. Errors when fewer are stored.
    pub fn latest(&self, symbol: &str, timeframe: &str, n: usize) -> MarketDataResult<Vec<Candle>> {
        let series = self.series.lock().unwrap();
        let ring = series.get(&Self::key(symbol, timeframe));
        let have = ring.map(|r| r.len()).unwrap_or(0);
        if have < n {
            return Err(MarketDataError::InsufficientData {
                symbol: symbol.to_string(),
                timeframe: timeframe.to_string(),
                have,
                need: n,
            });
        }
        let ring = ring.unwrap();
        Ok(ring.iter().skip(have - n).cloned().collect())
    }

    pub fn latest_one(&self, symbol: &str, timeframe: &str) -> Option<Candle> {
        let series = self.series.lock().unwrap();
        series
            .get(&Self::key(symbol, timeframe))
            .and_then(|r| r.back().cloned())
    }

    pub fn has_sufficient(&self, symbol: &str, timeframe: &str, n: usize) -> bool {
        let series = self.series.lock().unwrap();
        series
            .get(&Self::key(symbol, timeframe))
            .map(|r| r.len() >= n)
            .unwrap_or(false)
    }

    pub fn len(&self, symbol: &str, timeframe: &str) -> usize {
        let series = self.series.lock().unwrap();
        series
            .get(&Self::key(symbol, timeframe))
            .map(|r| r.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, symbol: &str, timeframe: &str) -> bool {
        self.len(symbol, timeframe) == 0
    }

    /// Drop all series for a symbol, or everything when `None`.
    pub fn clear(&self, symbol: Option<&str>) {
        let mut series = self.series.lock().unwrap();
        match symbol {
            Some(symbol) => series.retain(|(s, _), _| s != symbol),
            None => series.clear(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open_time: i64, close: f64) -> Candle {
        Candle {
            symbol: "BTCUSDT".to_string(),
            timeframe: "1m".to_string(),
            open_time,
            close_time: open_time + 59_999,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
            quote_volume: close,
            trades: 1,
        }
    }

    #[test]
    fn never_exceeds_capacity_and_stays_sorted() {
        let cache = MarketDataCache::new(5);
        for i in 0..50 {
            cache.add_candle(candle(i * 60_000, 100.0 + i as f64));
        }
        let stored = cache.latest("BTCUSDT", "1m", 5).unwrap();
        assert_eq!(cache.len("BTCUSDT", "1m"), 5);
        assert!(stored.windows(2).all(|w| w[0].open_time < w[1].open_time));
        assert_eq!(stored.last().unwrap().open_time, 49 * 60_000);
    }

    #[test]
    fn same_open_time_replaces_instead_of_appending() {
        let cache = MarketDataCache::new(10);
        cache.add_candle(candle(0, 100.0));
        cache.add_candle(candle(60_000, 101.0));
        cache.add_candle(candle(60_000, 102.5));
        assert_eq!(cache.len("BTCUSDT", "1m"), 2);
        assert!((cache.latest_one("BTCUSDT", "1m").unwrap().close - 102.5).abs() < 1e-9);
    }

    #[test]
    fn overlapping_refill_does_not_duplicate_or_reorder() {
        let cache = MarketDataCache::new(100);
        let history: Vec<Candle> = (0..50).map(|i| candle(i * 60_000, 100.0)).collect();
        cache.add_candles_bulk(history.clone());
        // A retry re-delivers the same window from the start.
        cache.add_candles_bulk(history);

        assert_eq!(cache.len("BTCUSDT", "1m"), 50);
        let stored = cache.latest("BTCUSDT", "1m", 50).unwrap();
        assert!(stored.windows(2).all(|w| w[0].open_time < w[1].open_time));

        // Stale single candles are dropped too.
        cache.add_candle(candle(10 * 60_000, 999.0));
        assert_eq!(cache.len("BTCUSDT", "1m"), 50);
        assert!((cache.latest_one("BTCUSDT", "1m").unwrap().close - 100.0).abs() < 1e-9);
    }

    #[test]
    fn latest_errors_when_short() {
        let cache = MarketDataCache::new(10);
        cache.add_candle(candle(0, 100.0));
        let err = cache.latest("BTCUSDT", "1m", 3).unwrap_err();
        match err {
            MarketDataError::InsufficientData { have, need, .. } => {
                assert_eq!(have, 1);
                assert_eq!(need, 3);
            }
            other => panic!("unexpected error: {}", other),
        }
        assert!(cache.latest("ETHUSDT", "1m", 1).is_err());
    }

    #[test]
    fn keys_are_independent_and_clear_is_per_symbol() {
        let cache = MarketDataCache::new(10);
        cache.add_candle(candle(0, 100.0));
        let mut other = candle(0, 50.0);
        other.symbol = "ETHUSDT".to_string();
        cache.add_candle(other);

        cache.clear(Some("BTCUSDT"));
        assert!(cache.is_empty("BTCUSDT", "1m"));
        assert_eq!(cache.len("ETHUSDT", "1m"), 1);

        cache.clear(None);
        assert!(cache.is_empty("ETHUSDT", "1m"));
    }

    #[test]
    fn has_sufficient_matches_len() {
        let cache = MarketDataCache::new(10);
        for i in 0..3 {
            cache.add_candle(candle(i * 60_000, 100.0));
        }
        assert!(cache.has_sufficient("BTCUSDT", "1m", 3));
        assert!(!cache.has_sufficient("BTCUSDT", "1m", 4));
    }
}
