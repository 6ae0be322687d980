// src/domain/mod.rs
pub mod errors;
pub mod models;
pub mod repository;

pub use errors::{
    AnalysisError, AnalysisResult, AppError, AppResult, ExchangeError, ExchangeResult,
    MarketDataError, MarketDataResult, TradingError, TradingResult,
};
pub use models::{
    timeframe_ms, Candle, EngineEvent, ExitReason, ExitSignal, IndicatorSnapshot, OrderResult,
    OrderSide, PositionState, SignalAction, SignalResult, TradeRecord, TrendLabel,
};
pub use repository::{InMemoryTradeRepository, JsonlTradeRepository, TradeRepository};
