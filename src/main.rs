// src/main.rs
use futures_engine::config::Config;
use futures_engine::domain::errors::{AppError, AppResult};
use futures_engine::domain::models::EngineEvent;
use futures_engine::domain::repository::{JsonlTradeRepository, TradeRepository};
use futures_engine::exchange::{BinanceFuturesClient, RateLimiter};
use futures_engine::market_data::{DataFetcher, MarketDataCache};
use futures_engine::trading::{
    EngineManager, ExecutionAdapter, RetryPolicy, StrategyOrchestrator,
};

use std::sync::Arc;
use tokio::signal::ctrl_c;

const CACHE_CAPACITY: usize = 1000;
const TRADE_LOG_PATH: &str = "trades.jsonl";

#[tokio::main]
async fn main() -> AppResult<()> {
    let config = Config::from_env()?;
    config.init_logging()?;

    log::info!("Starting futures_engine v{}", env!("CARGO_PKG_VERSION"));
    if config.exchange.testnet {
        log::info!("Using Binance futures testnet");
    }

    let limiter = Arc::new(RateLimiter::binance_futures());
    let client = if config.exchange.testnet {
        BinanceFuturesClient::new_testnet(
            &config.exchange.api_key,
            &config.exchange.api_secret,
            limiter,
        )
    } else {
        BinanceFuturesClient::new(
            &config.exchange.api_key,
            &config.exchange.api_secret,
            limiter,
        )
    };
    let client = Arc::new(client);

    let repository: Arc<dyn TradeRepository> =
        Arc::new(JsonlTradeRepository::open(TRADE_LOG_PATH)?);
    let manager = EngineManager::new(repository);

    let engine_configs = config.engine_configs();
    if engine_configs.is_empty() {
        log::warn!("No engines configured, nothing to do");
        return Ok(());
    }

    for engine_config in engine_configs {
        let cache = Arc::new(MarketDataCache::new(CACHE_CAPACITY));
        let fetcher = Arc::new(DataFetcher::new(Arc::clone(&client), cache));
        let execution = ExecutionAdapter::new(Arc::clone(&client), RetryPolicy::default());
        let orchestrator = Arc::new(StrategyOrchestrator::new(
            engine_config,
            Arc::clone(&client),
            fetcher,
            execution,
            manager.events_sender(),
        ));
        log::info!(
            "Registered engine {} for {}",
            orchestrator.name(),
            orchestrator.symbol()
        );
        manager.register(orchestrator).await;
    }

    // Log the event stream; external consumers would subscribe the
    // same way.
    let mut events = manager.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match &event {
                EngineEvent::Hold { .. } | EngineEvent::EngineStatusUpdate { .. } => {
                    log::debug!("{:?}", event)
                }
                _ => log::info!("{:?}", event),
            }
        }
    });

    manager.start_all().await;

    log::info!("Engines running. Press Ctrl+C to stop.");
    ctrl_c().await.map_err(AppError::Io)?;

    log::info!("Shutting down...");
    manager.shutdown(false).await;
    log::info!("Shutdown complete. Goodbye!");
    Ok(())
}
