// src/trading/signals.rs
use crate::domain::models::{IndicatorSnapshot, SignalAction, SignalResult, TrendLabel};
use std::collections::VecDeque;

// Entry trigger weights. Independent conditions; the score is their sum.
const W_VOLUME_SPIKE: f64 = 20.0;
const W_ABOVE_VWAP: f64 = 15.0;
const W_EMA_UPTREND: f64 = 20.0;
const W_EMA_STACK: f64 = 25.0;
const W_EMA20_RISING: f64 = 10.0;
const W_CONFIRM_TREND: f64 = 20.0;
const W_MACD_HIST_RISING: f64 = 15.0;
const W_MACD_GOLDEN_CROSS: f64 = 25.0;
const W_MACD_BULLISH: f64 = 15.0;
const W_RSI_REBOUND: f64 = 20.0;

/// Maximum attainable entry score.
pub const MAX_ENTRY_SCORE: f64 = W_VOLUME_SPIKE
    + W_ABOVE_VWAP
    + W_EMA_UPTREND
    + W_EMA_STACK
    + W_EMA20_RISING
    + W_CONFIRM_TREND
    + W_MACD_HIST_RISING
    + W_MACD_GOLDEN_CROSS
    + W_RSI_REBOUND;

// Exit trigger weights.
const W_EXIT_EMA_BREAKDOWN: f64 = 30.0;
const W_EXIT_MACD_BEARISH: f64 = 25.0;
const W_EXIT_MACD_HIST_FALLING: f64 = 15.0;
const W_EXIT_STOCH_CROSS: f64 = 30.0;

const MAX_EXIT_SCORE: f64 =
    W_EXIT_EMA_BREAKDOWN + W_EXIT_MACD_BEARISH + W_EXIT_MACD_HIST_FALLING + W_EXIT_STOCH_CROSS;

const RSI_OVERSOLD: f64 = 35.0;
const STOCH_OVERBOUGHT: f64 = 80.0;

/// Entry-score thresholds. `strong` and `instant` both resolve to
/// BUY_LONG; the instant level is reported for observability only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalThresholds {
    pub entry_min: f64,
    pub entry_strong: f64,
    pub entry_instant: f64,
}

impl Default for SignalThresholds {
    fn default() -> Self {
        Self {
            entry_min: 60.0,
            entry_strong: 100.0,
            entry_instant: 140.0,
        }
    }
}

/// Weighted entry/exit scoring over indicator snapshots.
pub struct SignalEngine {
    thresholds: SignalThresholds,
}

impl SignalEngine {
    pub fn new(thresholds: SignalThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> SignalThresholds {
        self.thresholds
    }

    /// Overwrite thresholds; the adaptive path feeds percentile-derived
    /// values through here.
    pub fn set_thresholds(&mut self, thresholds: SignalThresholds) {
        self.thresholds = thresholds;
    }

    /// Score in the watchlist band: promising but below the entry bar.
    pub fn is_watchlist(&self, score: f64) -> bool {
        score >= self.thresholds.entry_min && score < self.thresholds.entry_strong
    }

    /// Entry evaluation for a flat book.
    ///
    /// `prev` is the previous entry-timeframe snapshot; `confirm` and
    /// `filter` are the confirming and filtering timeframe snapshots. A
    /// downtrend on the filter timeframe suppresses entry regardless of
    /// score.
    pub fn evaluate_entry(
        &self,
        snapshot: &IndicatorSnapshot,
        prev: Option<&IndicatorSnapshot>,
        confirm: &IndicatorSnapshot,
        filter: &IndicatorSnapshot,
    ) -> SignalResult {
        let mut score = 0.0;
        let mut triggers = Vec::new();
        let mut hit = |weight: f64, name: &str| {
            score += weight;
            triggers.push(name.to_string());
        };

        if snapshot.volume_spike {
            hit(W_VOLUME_SPIKE, "VOLUME_SPIKE");
        }
        if snapshot.close > snapshot.vwap {
            hit(W_ABOVE_VWAP, "ABOVE_VWAP");
        }
        if snapshot.ema20 > snapshot.ema60 {
            hit(W_EMA_UPTREND, "EMA_UPTREND");
        }
        if snapshot.ema5 > snapshot.ema10
            && snapshot.ema10 > snapshot.ema20
            && snapshot.ema20 > snapshot.ema60
            && snapshot.ema60 > snapshot.ema120
        {
            hit(W_EMA_STACK, "EMA_STACK");
        }
        if matches!(
            confirm.trend,
            TrendLabel::Uptrend | TrendLabel::StrongUptrend
        ) {
            hit(W_CONFIRM_TREND, "CONFIRM_UPTREND");
        }

        match prev {
            Some(prev) => {
                if snapshot.ema20 > prev.ema20 {
                    hit(W_EMA20_RISING, "EMA20_RISING");
                }
                if snapshot.macd_histogram > prev.macd_histogram {
                    hit(W_MACD_HIST_RISING, "MACD_HIST_RISING");
                }
                if prev.macd_line <= prev.macd_signal && snapshot.macd_line > snapshot.macd_signal
                {
                    hit(W_MACD_GOLDEN_CROSS, "MACD_GOLDEN_CROSS");
                }
                if prev.rsi < RSI_OVERSOLD && snapshot.rsi > prev.rsi {
                    hit(W_RSI_REBOUND, "RSI_REBOUND");
                }
            }
            None => {
                // No history yet; fall back to the weaker level-based MACD
                // check instead of the cross.
                if snapshot.macd_line > snapshot.macd_signal && snapshot.macd_histogram > 0.0 {
                    hit(W_MACD_BULLISH, "MACD_BULLISH");
                }
            }
        }

        let suppressed = filter.trend == TrendLabel::Downtrend;
        let action = if suppressed || score < self.thresholds.entry_strong {
            SignalAction::Hold
        } else {
            SignalAction::BuyLong
        };

        let reason = if suppressed {
            format!(
                "entry suppressed by filter-timeframe downtrend (score {:.0})",
                score
            )
        } else if action == SignalAction::BuyLong {
            let level = if score >= self.thresholds.entry_instant {
                "instant"
            } else {
                "strong"
            };
            format!("{} entry at score {:.0}: {}", level, score, triggers.join("+"))
        } else if self.is_watchlist(score) {
            format!("watchlist at score {:.0}: {}", score, triggers.join("+"))
        } else {
            format!("score {:.0} below entry threshold", score)
        };

        SignalResult {
            symbol: snapshot.symbol.clone(),
            timestamp: snapshot.timestamp,
            action,
            score,
            confidence: (score / MAX_ENTRY_SCORE * 100.0).min(100.0),
            triggers,
            reason,
        }
    }

    /// Exit evaluation while in a position: any fired trigger closes.
    pub fn evaluate_exit(
        &self,
        snapshot: &IndicatorSnapshot,
        prev: Option<&IndicatorSnapshot>,
    ) -> SignalResult {
        let mut score = 0.0;
        let mut triggers = Vec::new();
        let mut hit = |weight: f64, name: &str| {
            score += weight;
            triggers.push(name.to_string());
        };

        if snapshot.ema20 < snapshot.ema60 {
            hit(W_EXIT_EMA_BREAKDOWN, "EMA_BREAKDOWN");
        }
        if snapshot.macd_line < snapshot.macd_signal {
            hit(W_EXIT_MACD_BEARISH, "MACD_BEARISH");
        }
        if let Some(prev) = prev {
            if snapshot.macd_histogram < prev.macd_histogram {
                hit(W_EXIT_MACD_HIST_FALLING, "MACD_HIST_FALLING");
            }
        }
        if snapshot.stoch_rsi_k > STOCH_OVERBOUGHT && snapshot.stoch_rsi_k < snapshot.stoch_rsi_d
        {
            hit(W_EXIT_STOCH_CROSS, "STOCH_OVERBOUGHT_CROSS");
        }

        let action = if score > 0.0 {
            SignalAction::CloseLong
        } else {
            SignalAction::Hold
        };
        let reason = if triggers.is_empty() {
            "no exit trigger fired".to_string()
        } else {
            format!("exit at score {:.0}: {}", score, triggers.join("+"))
        };

        SignalResult {
            symbol: snapshot.symbol.clone(),
            timestamp: snapshot.timestamp,
            action,
            score,
            confidence: (score / MAX_EXIT_SCORE * 100.0).min(100.0),
            triggers,
            reason,
        }
    }
}

/// Rolling percentile tracker over recent entry scores, feeding the
/// adaptive-threshold path.
pub struct ScoreTracker {
    samples: VecDeque<f64>,
    capacity: usize,
    min_samples: usize,
}

impl ScoreTracker {
    pub fn new(capacity: usize, min_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            min_samples,
        }
    }

    pub fn push(&mut self, score: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(score);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    fn percentile(sorted: &[f64], p: f64) -> f64 {
        let idx = (p / 100.0 * (sorted.len() - 1) as f64).round() as usize;
        sorted[idx.min(sorted.len() - 1)]
    }

    /// Percentile-derived thresholds (p60/p80/p95), once the minimum
    /// sample gate is met.
    pub fn thresholds(&self) -> Option<SignalThresholds> {
        if self.samples.is_empty() || self.samples.len() < self.min_samples {
            return None;
        }
        let mut sorted: Vec<f64> = self.samples.iter().cloned().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        Some(SignalThresholds {
            entry_min: Self::percentile(&sorted, 60.0),
            entry_strong: Self::percentile(&sorted, 80.0),
            entry_instant: Self::percentile(&sorted, 95.0),
        })
    }
}
