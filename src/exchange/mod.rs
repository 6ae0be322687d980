// src/exchange/mod.rs
pub mod binance;
pub mod client;
pub mod rate_limiter;

pub use binance::BinanceFuturesClient;
pub use client::{ExchangeClient, RawKline, RawOrderFill, SymbolFilters};
pub use rate_limiter::{ApiCategory, RateLimiter};
