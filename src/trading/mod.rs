// src/trading/mod.rs
pub mod execution;
pub mod manager;
pub mod orchestrator;
pub mod risk;
pub mod signals;

pub use execution::{ExecutionAdapter, RetryPolicy};
pub use manager::EngineManager;
pub use orchestrator::{EngineStatus, StrategyOrchestrator};
pub use risk::{RiskConfig, RiskEvent, RiskManager};
pub use signals::{ScoreTracker, SignalEngine, SignalThresholds};
