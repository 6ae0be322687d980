// src/market_data/mod.rs
pub mod cache;
pub mod fetcher;

pub use cache::MarketDataCache;
pub use fetcher::DataFetcher;
