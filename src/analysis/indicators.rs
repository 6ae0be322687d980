// src/analysis/indicators.rs
use crate::domain::errors::{AnalysisError, AnalysisResult};
use crate::domain::models::{Candle, IndicatorSnapshot, TrendLabel};

/// Minimum candle window for a full snapshot (EMA120 plus MACD warmup).
pub const MIN_CANDLES: usize = 200;

pub const RSI_PERIOD: usize = 14;
pub const STOCH_RSI_PERIOD: usize = 14;
pub const STOCH_RSI_SMOOTH: usize = 3;
pub const ATR_PERIOD: usize = 14;
pub const VOLUME_LOOKBACK: usize = 20;
pub const VOLUME_SPIKE_MULTIPLIER: f64 = 3.0;

/// Relative tolerance for the trend-label EMA comparisons.
const TREND_TOLERANCE: f64 = 0.001;

/// Exponential moving average over the whole series, seeded with the first
/// value: `ema = price*k + ema*(1-k)`, `k = 2/(period+1)`.
pub fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }
    let k = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut ema = values[0];
    out.push(ema);
    for &value in &values[1..] {
        ema = value * k + ema * (1.0 - k);
        out.push(ema);
    }
    out
}

/// Wilder RSI series: seed average gain/loss as simple means over the first
/// `period` deltas, then smooth recursively. One value per close from index
/// `period` onwards.
pub fn rsi_series(closes: &[f64], period: usize) -> Vec<f64> {
    if closes.len() <= period {
        return Vec::new();
    }

    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let mut avg_gain = deltas[..period].iter().filter(|&&d| d > 0.0).sum::<f64>() / period as f64;
    let mut avg_loss = deltas[..period].iter().filter(|&&d| d < 0.0).map(|d| -d).sum::<f64>()
        / period as f64;

    let rsi_of = |gain: f64, loss: f64| -> f64 {
        if loss == 0.0 {
            100.0
        } else {
            100.0 - 100.0 / (1.0 + gain / loss)
        }
    };

    let mut out = Vec::with_capacity(deltas.len() - period + 1);
    out.push(rsi_of(avg_gain, avg_loss));
    for &delta in &deltas[period..] {
        let (gain, loss) = if delta > 0.0 { (delta, 0.0) } else { (0.0, -delta) };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
        out.push(rsi_of(avg_gain, avg_loss));
    }
    out
}

/// Stochastic RSI: %K min-max normalizes the last `period` RSI values to
/// 0-100; %D is the mean of the last `smooth` %K values. A flat RSI window
/// normalizes to the midpoint.
pub fn stoch_rsi(rsi: &[f64], period: usize, smooth: usize) -> Option<(f64, f64)> {
    if rsi.len() < period + smooth - 1 {
        return None;
    }

    let k_at = |end: usize| -> f64 {
        let window = &rsi[end + 1 - period..=end];
        let min = window.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = window.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        if (max - min).abs() < f64::EPSILON {
            50.0
        } else {
            (rsi[end] - min) / (max - min) * 100.0
        }
    };

    let last = rsi.len() - 1;
    let k = k_at(last);
    let d = (0..smooth).map(|i| k_at(last - i)).sum::<f64>() / smooth as f64;
    Some((k, d))
}

/// MACD(12,26,9): (line, signal, histogram) series.
pub fn macd_series(
    closes: &[f64],
    fast: usize,
    slow: usize,
    signal: usize,
) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let fast_ema = ema_series(closes, fast);
    let slow_ema = ema_series(closes, slow);
    let line: Vec<f64> = fast_ema
        .iter()
        .zip(slow_ema.iter())
        .map(|(f, s)| f - s)
        .collect();
    let signal_line = ema_series(&line, signal);
    let histogram: Vec<f64> = line
        .iter()
        .zip(signal_line.iter())
        .map(|(l, s)| l - s)
        .collect();
    (line, signal_line, histogram)
}

/// Cumulative VWAP over the provided window (no session reset).
pub fn vwap(candles: &[Candle]) -> f64 {
    let mut pv = 0.0;
    let mut volume = 0.0;
    for c in candles {
        let typical = (c.high + c.low + c.close) / 3.0;
        pv += typical * c.volume;
        volume += c.volume;
    }
    if volume == 0.0 {
        candles.last().map(|c| c.close).unwrap_or(0.0)
    } else {
        pv / volume
    }
}

/// ATR as an EMA of the true range.
pub fn atr(candles: &[Candle], period: usize) -> f64 {
    if candles.len() < 2 {
        return 0.0;
    }
    let tr: Vec<f64> = candles
        .windows(2)
        .map(|w| {
            let prev_close = w[0].close;
            let c = &w[1];
            (c.high - c.low)
                .max((c.high - prev_close).abs())
                .max((c.low - prev_close).abs())
        })
        .collect();
    *ema_series(&tr, period).last().unwrap_or(&0.0)
}

/// Current volume against the mean of the previous `lookback` volumes.
pub fn volume_spike(volumes: &[f64], lookback: usize, multiplier: f64) -> bool {
    if volumes.len() < lookback + 1 {
        return false;
    }
    let current = volumes[volumes.len() - 1];
    let window = &volumes[volumes.len() - 1 - lookback..volumes.len() - 1];
    let mean = window.iter().sum::<f64>() / lookback as f64;
    mean > 0.0 && current > mean * multiplier
}

/// EMA20 vs EMA60 vs EMA120 with tolerance bands.
pub fn trend_label(ema20: f64, ema60: f64, ema120: f64) -> TrendLabel {
    if ema20 > ema60 * (1.0 + TREND_TOLERANCE) && ema60 > ema120 * (1.0 + TREND_TOLERANCE) {
        TrendLabel::StrongUptrend
    } else if ema20 > ema60 && ema60 > ema120 {
        TrendLabel::Uptrend
    } else if ema20 < ema60 * (1.0 - TREND_TOLERANCE) && ema60 < ema120 * (1.0 - TREND_TOLERANCE) {
        TrendLabel::Downtrend
    } else {
        TrendLabel::Neutral
    }
}

/// Compute a full snapshot from an ascending candle series.
///
/// Deterministic and side-effect free; fails when the window is shorter
/// than `MIN_CANDLES` or when any computed value falls outside its valid
/// range.
pub fn compute_snapshot(candles: &[Candle]) -> AnalysisResult<IndicatorSnapshot> {
    if candles.len() < MIN_CANDLES {
        return Err(AnalysisError::InsufficientData {
            need: MIN_CANDLES,
            got: candles.len(),
        });
    }

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();
    let last = &candles[candles.len() - 1];

    let ema_last = |period: usize| *ema_series(&closes, period).last().unwrap_or(&0.0);
    let ema5 = ema_last(5);
    let ema10 = ema_last(10);
    let ema20 = ema_last(20);
    let ema60 = ema_last(60);
    let ema120 = ema_last(120);

    let rsi = rsi_series(&closes, RSI_PERIOD);
    let rsi_value = *rsi.last().ok_or(AnalysisError::InsufficientData {
        need: RSI_PERIOD + 1,
        got: closes.len(),
    })?;
    let (stoch_k, stoch_d) =
        stoch_rsi(&rsi, STOCH_RSI_PERIOD, STOCH_RSI_SMOOTH).ok_or(
            AnalysisError::InsufficientData {
                need: RSI_PERIOD + STOCH_RSI_PERIOD + STOCH_RSI_SMOOTH,
                got: rsi.len(),
            },
        )?;

    let (macd_line, macd_signal, macd_histogram) = macd_series(&closes, 12, 26, 9);

    let snapshot = IndicatorSnapshot {
        symbol: last.symbol.clone(),
        timestamp: last.close_time,
        close: last.close,
        ema5,
        ema10,
        ema20,
        ema60,
        ema120,
        rsi: rsi_value,
        stoch_rsi_k: stoch_k,
        stoch_rsi_d: stoch_d,
        macd_line: *macd_line.last().unwrap_or(&0.0),
        macd_signal: *macd_signal.last().unwrap_or(&0.0),
        macd_histogram: *macd_histogram.last().unwrap_or(&0.0),
        vwap: vwap(candles),
        atr: atr(candles, ATR_PERIOD),
        volume_spike: volume_spike(&volumes, VOLUME_LOOKBACK, VOLUME_SPIKE_MULTIPLIER),
        trend: trend_label(ema20, ema60, ema120),
    };

    validate(&snapshot)?;
    Ok(snapshot)
}

/// Reject snapshots whose values left their valid domain.
fn validate(snapshot: &IndicatorSnapshot) -> AnalysisResult<()> {
    let in_percent = |v: f64| (0.0..=100.0).contains(&v);
    if !in_percent(snapshot.rsi) {
        return Err(AnalysisError::Validation(format!(
            "RSI out of range: {}",
            snapshot.rsi
        )));
    }
    if !in_percent(snapshot.stoch_rsi_k) || !in_percent(snapshot.stoch_rsi_d) {
        return Err(AnalysisError::Validation(format!(
            "StochRSI out of range: k={} d={}",
            snapshot.stoch_rsi_k, snapshot.stoch_rsi_d
        )));
    }
    for (name, ema) in [
        ("ema5", snapshot.ema5),
        ("ema10", snapshot.ema10),
        ("ema20", snapshot.ema20),
        ("ema60", snapshot.ema60),
        ("ema120", snapshot.ema120),
    ] {
        if ema <= 0.0 || !ema.is_finite() {
            return Err(AnalysisError::Validation(format!(
                "non-positive {}: {}",
                name, ema
            )));
        }
    }
    if snapshot.atr < 0.0 {
        return Err(AnalysisError::Validation(format!(
            "negative ATR: {}",
            snapshot.atr
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{candles_from_closes, uptrend_closes};

    #[test]
    fn ema_of_constant_series_is_constant() {
        let values = vec![50.0; 30];
        let ema = ema_series(&values, 10);
        assert!(ema.iter().all(|&v| (v - 50.0).abs() < 1e-9));
    }

    #[test]
    fn ema_follows_recursion() {
        let values = [10.0, 20.0];
        let ema = ema_series(&values, 9);
        let k = 2.0 / 10.0;
        assert!((ema[1] - (20.0 * k + 10.0 * (1.0 - k))).abs() < 1e-12);
    }

    #[test]
    fn rsi_is_100_for_pure_gains_and_bounded() {
        let rising: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let rsi = rsi_series(&rising, RSI_PERIOD);
        assert!((rsi.last().unwrap() - 100.0).abs() < 1e-9);

        let mixed: Vec<f64> = (0..60)
            .map(|i| 100.0 + ((i * 7) % 13) as f64 - 6.0)
            .collect();
        for v in rsi_series(&mixed, RSI_PERIOD) {
            assert!((0.0..=100.0).contains(&v));
        }
    }

    #[test]
    fn stoch_rsi_stays_in_percent_range() {
        let mixed: Vec<f64> = (0..80)
            .map(|i| 100.0 + ((i * 11) % 17) as f64 - 8.0)
            .collect();
        let rsi = rsi_series(&mixed, RSI_PERIOD);
        let (k, d) = stoch_rsi(&rsi, STOCH_RSI_PERIOD, STOCH_RSI_SMOOTH).unwrap();
        assert!((0.0..=100.0).contains(&k));
        assert!((0.0..=100.0).contains(&d));
    }

    #[test]
    fn macd_histogram_is_line_minus_signal() {
        let closes = uptrend_closes(100);
        let (line, signal, hist) = macd_series(&closes, 12, 26, 9);
        let i = line.len() - 1;
        assert!((hist[i] - (line[i] - signal[i])).abs() < 1e-12);
    }

    #[test]
    fn atr_positive_for_moving_prices() {
        let candles = candles_from_closes("BTCUSDT", &uptrend_closes(50));
        assert!(atr(&candles, ATR_PERIOD) > 0.0);
    }

    #[test]
    fn volume_spike_requires_multiplier_breach() {
        let mut volumes = vec![10.0; 21];
        assert!(!volume_spike(&volumes, VOLUME_LOOKBACK, 3.0));
        *volumes.last_mut().unwrap() = 31.0;
        assert!(volume_spike(&volumes, VOLUME_LOOKBACK, 3.0));
    }

    #[test]
    fn trend_labels_follow_ema_ordering() {
        assert_eq!(trend_label(110.0, 105.0, 100.0), TrendLabel::StrongUptrend);
        assert_eq!(
            trend_label(100.05, 100.02, 100.0),
            TrendLabel::Uptrend
        );
        assert_eq!(trend_label(90.0, 95.0, 100.0), TrendLabel::Downtrend);
        assert_eq!(trend_label(100.0, 100.0, 100.0), TrendLabel::Neutral);
    }

    #[test]
    fn snapshot_requires_min_window() {
        let candles = candles_from_closes("BTCUSDT", &uptrend_closes(199));
        match compute_snapshot(&candles) {
            Err(AnalysisError::InsufficientData { need, got }) => {
                assert_eq!(need, MIN_CANDLES);
                assert_eq!(got, 199);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn snapshot_of_uptrend_is_bullish_and_valid() {
        let candles = candles_from_closes("BTCUSDT", &uptrend_closes(250));
        let snap = compute_snapshot(&candles).unwrap();
        assert_eq!(snap.symbol, "BTCUSDT");
        assert!(snap.ema20 > snap.ema60);
        assert!(snap.ema60 > snap.ema120);
        assert!(matches!(
            snap.trend,
            TrendLabel::Uptrend | TrendLabel::StrongUptrend
        ));
        assert!((0.0..=100.0).contains(&snap.rsi));
        assert!(snap.atr >= 0.0);
        assert_eq!(snap.timestamp, candles.last().unwrap().close_time);
    }
}
