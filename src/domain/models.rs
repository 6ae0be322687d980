// src/domain/models.rs
use serde::{Deserialize, Serialize};
use std::fmt;

/// One OHLCV bar for a (symbol, timeframe) pair.
///
/// Candles are immutable once their bucket has closed; the most recent
/// candle of an open bucket may be overwritten in place by the cache.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub timeframe: String,
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

/// Millisecond length of a timeframe string ("1m", "5m", "15m", "1h", "4h", "1d").
///
/// Unknown suffixes fall back to one minute rather than panicking; the
/// configuration layer validates timeframes up front.
pub fn timeframe_ms(timeframe: &str) -> i64 {
    let (num, unit) = timeframe.split_at(timeframe.len().saturating_sub(1));
    let n: i64 = num.parse().unwrap_or(1);
    match unit {
        "m" => n * 60_000,
        "h" => n * 3_600_000,
        "d" => n * 86_400_000,
        "w" => n * 7 * 86_400_000,
        _ => 60_000,
    }
}

/// Trend classification from the EMA20/EMA60/EMA120 relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendLabel {
    StrongUptrend,
    Uptrend,
    Downtrend,
    Neutral,
}

impl fmt::Display for TrendLabel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TrendLabel::StrongUptrend => write!(f, "STRONG_UPTREND"),
            TrendLabel::Uptrend => write!(f, "UPTREND"),
            TrendLabel::Downtrend => write!(f, "DOWNTREND"),
            TrendLabel::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

/// Full indicator snapshot computed from one candle window.
///
/// The 200-candle minimum window guarantees every field is computable, so
/// none of them are optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub symbol: String,
    pub timestamp: i64,
    pub close: f64,
    pub ema5: f64,
    pub ema10: f64,
    pub ema20: f64,
    pub ema60: f64,
    pub ema120: f64,
    pub rsi: f64,
    pub stoch_rsi_k: f64,
    pub stoch_rsi_d: f64,
    pub macd_line: f64,
    pub macd_signal: f64,
    pub macd_histogram: f64,
    pub vwap: f64,
    pub atr: f64,
    pub volume_spike: bool,
    pub trend: TrendLabel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalAction {
    BuyLong,
    CloseLong,
    Hold,
}

impl fmt::Display for SignalAction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SignalAction::BuyLong => write!(f, "BUY_LONG"),
            SignalAction::CloseLong => write!(f, "CLOSE_LONG"),
            SignalAction::Hold => write!(f, "HOLD"),
        }
    }
}

/// Outcome of one signal evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalResult {
    pub symbol: String,
    pub timestamp: i64,
    pub action: SignalAction,
    pub score: f64,
    pub confidence: f64,
    pub triggers: Vec<String>,
    pub reason: String,
}

/// Open long position tracked by one orchestrator.
///
/// At most one of these exists per orchestrator at any time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionState {
    pub symbol: String,
    pub entry_price: f64,
    pub quantity: f64,
    pub leverage: u32,
    pub opened_at: i64,
    pub highest_price: f64,
    pub lowest_price: f64,
    pub unrealized_pnl: f64,
    pub pnl_pct: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub trailing_active: bool,
    pub take_profit_extended: bool,
}

impl PositionState {
    pub fn open(
        symbol: &str,
        entry_price: f64,
        quantity: f64,
        leverage: u32,
        opened_at: i64,
        stop_loss: f64,
        take_profit: f64,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            entry_price,
            quantity,
            leverage,
            opened_at,
            highest_price: entry_price,
            lowest_price: entry_price,
            unrealized_pnl: 0.0,
            pnl_pct: 0.0,
            stop_loss,
            take_profit,
            trailing_active: false,
            take_profit_extended: false,
        }
    }

    /// Refresh extremes and PnL from the current price. Called once at the
    /// start of every risk evaluation, before any exit check.
    pub fn mark(&mut self, price: f64) {
        if price > self.highest_price {
            self.highest_price = price;
        }
        if price < self.lowest_price {
            self.lowest_price = price;
        }
        self.pnl_pct = (price - self.entry_price) / self.entry_price * 100.0;
        self.unrealized_pnl = (price - self.entry_price) * self.quantity;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    TrailingStop,
    TimeLimit,
    Signal,
    Manual,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExitReason::StopLoss => write!(f, "STOP_LOSS"),
            ExitReason::TakeProfit => write!(f, "TAKE_PROFIT"),
            ExitReason::TrailingStop => write!(f, "TRAILING_STOP"),
            ExitReason::TimeLimit => write!(f, "TIME_LIMIT"),
            ExitReason::Signal => write!(f, "SIGNAL"),
            ExitReason::Manual => write!(f, "MANUAL"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitSignal {
    pub reason: ExitReason,
    pub action: SignalAction,
    pub message: String,
}

impl ExitSignal {
    pub fn close(reason: ExitReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            action: SignalAction::CloseLong,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

/// Result of a market order attempt, success or failure.
///
/// A failed attempt still yields an `OrderResult` carrying the last error so
/// callers can surface it through the event stream without a second channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResult {
    pub success: bool,
    pub order_id: Option<String>,
    pub side: OrderSide,
    pub avg_price: f64,
    pub quantity: f64,
    pub commission: f64,
    pub timestamp: i64,
    pub error: Option<String>,
}

impl OrderResult {
    pub fn failed(side: OrderSide, error: impl Into<String>) -> Self {
        Self {
            success: false,
            order_id: None,
            side,
            avg_price: 0.0,
            quantity: 0.0,
            commission: 0.0,
            timestamp: chrono::Utc::now().timestamp_millis(),
            error: Some(error.into()),
        }
    }
}

/// Append-only trade record handed to the persistence collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub engine: String,
    pub symbol: String,
    pub timestamp: i64,
    pub funds: f64,
    pub leverage: u32,
    pub pnl: f64,
    pub pnl_pct: f64,
}

/// Typed event stream from the core to external consumers.
///
/// Delivery is at-least-once per occurrence; ordering is preserved per
/// originating loop.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    Entry {
        engine: String,
        symbol: String,
        price: f64,
        quantity: f64,
        score: f64,
        timestamp: i64,
    },
    EntryFail {
        engine: String,
        symbol: String,
        error: String,
        timestamp: i64,
    },
    Exit {
        engine: String,
        symbol: String,
        reason: ExitReason,
        price: f64,
        pnl: f64,
        pnl_pct: f64,
        timestamp: i64,
    },
    ExitFail {
        engine: String,
        symbol: String,
        reason: ExitReason,
        error: String,
        timestamp: i64,
    },
    Hold {
        engine: String,
        symbol: String,
        score: f64,
        timestamp: i64,
    },
    HoldInPosition {
        engine: String,
        symbol: String,
        pnl_pct: f64,
        score: f64,
        timestamp: i64,
    },
    Watchlist {
        engine: String,
        symbol: String,
        score: f64,
        timestamp: i64,
    },
    Pause {
        engine: String,
        symbol: String,
        until: i64,
        timestamp: i64,
    },
    ProtectivePause {
        engine: String,
        symbol: String,
        failures: usize,
        until: i64,
        timestamp: i64,
    },
    ThresholdUpdate {
        engine: String,
        symbol: String,
        entry_min: f64,
        entry_strong: f64,
        entry_instant: f64,
        adaptive: bool,
        timestamp: i64,
    },
    DataProgress {
        engine: String,
        symbol: String,
        timeframe: String,
        loaded: usize,
        required: usize,
        timestamp: i64,
    },
    SymbolUnsupported {
        engine: String,
        symbol: String,
        timestamp: i64,
    },
    TrailingActivated {
        engine: String,
        symbol: String,
        stop_price: f64,
        timestamp: i64,
    },
    WarmupFail {
        engine: String,
        symbol: String,
        error: String,
        timestamp: i64,
    },
    EngineStatusUpdate {
        engine: String,
        symbol: String,
        in_position: bool,
        realized_pnl: f64,
        timestamp: i64,
    },
    EngineTradeCompleted {
        engine: String,
        symbol: String,
        pnl: f64,
        pnl_pct: f64,
        timestamp: i64,
    },
}

impl EngineEvent {
    /// Engine name the event originated from.
    pub fn engine(&self) -> &str {
        match self {
            EngineEvent::Entry { engine, .. }
            | EngineEvent::EntryFail { engine, .. }
            | EngineEvent::Exit { engine, .. }
            | EngineEvent::ExitFail { engine, .. }
            | EngineEvent::Hold { engine, .. }
            | EngineEvent::HoldInPosition { engine, .. }
            | EngineEvent::Watchlist { engine, .. }
            | EngineEvent::Pause { engine, .. }
            | EngineEvent::ProtectivePause { engine, .. }
            | EngineEvent::ThresholdUpdate { engine, .. }
            | EngineEvent::DataProgress { engine, .. }
            | EngineEvent::SymbolUnsupported { engine, .. }
            | EngineEvent::TrailingActivated { engine, .. }
            | EngineEvent::WarmupFail { engine, .. }
            | EngineEvent::EngineStatusUpdate { engine, .. }
            | EngineEvent::EngineTradeCompleted { engine, .. } => engine,
        }
    }
}
