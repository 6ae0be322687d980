// src/domain/errors.rs
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("Market data error: {0}")]
    MarketData(#[from] MarketDataError),

    #[error("Trading error: {0}")]
    Trading(#[from] TradingError),

    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<String> for AppError {
    fn from(s: String) -> Self {
        AppError::Unknown(s)
    }
}

#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Order error: {0}")]
    Order(String),

    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Request error: {0}")]
    Request(String),
}

#[derive(Error, Debug)]
pub enum MarketDataError {
    #[error("Insufficient data for {symbol}/{timeframe}: have {have}, need {need}")]
    InsufficientData {
        symbol: String,
        timeframe: String,
        have: usize,
        need: usize,
    },

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Fetch error: {0}")]
    Fetch(String),
}

#[derive(Error, Debug)]
pub enum TradingError {
    #[error("Order execution error: {0}")]
    OrderExecution(String),

    #[error("Quantity normalization failed: {0}")]
    Normalization(String),

    #[error("Symbol not supported: {0}")]
    SymbolUnsupported(String),

    #[error("Risk management error: {0}")]
    RiskManagement(String),

    #[error("Warmup failed: {0}")]
    Warmup(String),

    #[error("Engine error: {0}")]
    Engine(String),
}

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Insufficient data for analysis: need {need} candles, got {got}")]
    InsufficientData { need: usize, got: usize },

    #[error("Indicator validation failed: {0}")]
    Validation(String),
}

// Result type aliases for convenience
pub type AppResult<T> = Result<T, AppError>;
pub type ExchangeResult<T> = Result<T, ExchangeError>;
pub type MarketDataResult<T> = Result<T, MarketDataError>;
pub type TradingResult<T> = Result<T, TradingError>;
pub type AnalysisResult<T> = Result<T, AnalysisError>;
