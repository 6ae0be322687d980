// src/config.rs
use crate::domain::errors::{AppError, AppResult};
use crate::trading::risk::RiskConfig;
use crate::trading::signals::SignalThresholds;
use dotenv::dotenv;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration: exchange credentials, logging, and one
/// entry per engine loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub exchange: ExchangeConfig,
    pub logging: LoggingConfig,
    pub engines: Vec<EngineFileConfig>,
}

/// Exchange API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub api_key: String,
    pub api_secret: String,
    pub testnet: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub to_file: bool,
    pub file_path: Option<String>,
}

/// One engine entry as it appears in the config file. Durations are
/// plain seconds; `engine_configs` turns these into runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineFileConfig {
    pub name: String,
    pub symbol: String,
    #[serde(default = "default_leverage")]
    pub leverage: u32,
    #[serde(default = "default_isolated_margin")]
    pub isolated_margin: bool,
    #[serde(default = "default_entry_timeframe")]
    pub entry_timeframe: String,
    #[serde(default = "default_confirm_timeframe")]
    pub confirm_timeframe: String,
    #[serde(default = "default_filter_timeframe")]
    pub filter_timeframe: String,
    #[serde(default = "default_required_candles")]
    pub required_candles: usize,
    #[serde(default = "default_order_funds")]
    pub order_funds: f64,
    #[serde(default = "default_step_interval_secs")]
    pub step_interval_secs: u64,
    #[serde(default)]
    pub trading_enabled: bool,
    #[serde(default)]
    pub adaptive_thresholds: bool,
    #[serde(default = "default_entry_min")]
    pub entry_min: f64,
    #[serde(default = "default_entry_strong")]
    pub entry_strong: f64,
    #[serde(default = "default_entry_instant")]
    pub entry_instant: f64,
    #[serde(default = "default_max_entry_failures")]
    pub max_entry_failures: usize,
    #[serde(default = "default_failure_window_secs")]
    pub failure_window_secs: u64,
    #[serde(default = "default_pause_cooldown_secs")]
    pub pause_cooldown_secs: u64,
    #[serde(default = "default_reentry_pause_secs")]
    pub reentry_pause_secs: u64,
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: f64,
    #[serde(default = "default_break_even_pct")]
    pub break_even_pct: f64,
    #[serde(default = "default_primary_target_pct")]
    pub primary_target_pct: f64,
    #[serde(default = "default_extended_target_pct")]
    pub extended_target_pct: f64,
    #[serde(default = "default_trailing_pct")]
    pub trailing_pct: f64,
    #[serde(default = "default_energy_score")]
    pub energy_score: f64,
    #[serde(default = "default_max_holding_hours")]
    pub max_holding_hours: Option<f64>,
}

fn default_leverage() -> u32 {
    5
}
fn default_isolated_margin() -> bool {
    true
}
fn default_entry_timeframe() -> String {
    "5m".to_string()
}
fn default_confirm_timeframe() -> String {
    "15m".to_string()
}
fn default_filter_timeframe() -> String {
    "1h".to_string()
}
fn default_required_candles() -> usize {
    200
}
fn default_order_funds() -> f64 {
    100.0
}
fn default_step_interval_secs() -> u64 {
    10
}
fn default_entry_min() -> f64 {
    60.0
}
fn default_entry_strong() -> f64 {
    100.0
}
fn default_entry_instant() -> f64 {
    140.0
}
fn default_max_entry_failures() -> usize {
    3
}
fn default_failure_window_secs() -> u64 {
    300
}
fn default_pause_cooldown_secs() -> u64 {
    1800
}
fn default_reentry_pause_secs() -> u64 {
    300
}
fn default_stop_loss_pct() -> f64 {
    2.0
}
fn default_break_even_pct() -> f64 {
    1.0
}
fn default_primary_target_pct() -> f64 {
    2.0
}
fn default_extended_target_pct() -> f64 {
    3.5
}
fn default_trailing_pct() -> f64 {
    1.0
}
fn default_energy_score() -> f64 {
    100.0
}
fn default_max_holding_hours() -> Option<f64> {
    None
}

/// Runtime settings for one engine loop.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub name: String,
    pub symbol: String,
    pub leverage: u32,
    pub isolated_margin: bool,
    pub entry_timeframe: String,
    pub confirm_timeframe: String,
    pub filter_timeframe: String,
    pub required_candles: usize,
    pub order_funds: f64,
    pub step_interval: Duration,
    pub trading_enabled: bool,
    pub adaptive_thresholds: bool,
    pub thresholds: SignalThresholds,
    pub max_entry_failures: usize,
    pub failure_window_ms: i64,
    pub pause_cooldown_ms: i64,
    pub reentry_pause_ms: i64,
    pub risk: RiskConfig,
}

impl EngineFileConfig {
    fn to_engine_config(&self) -> EngineConfig {
        EngineConfig {
            name: self.name.clone(),
            symbol: self.symbol.clone(),
            leverage: self.leverage,
            isolated_margin: self.isolated_margin,
            entry_timeframe: self.entry_timeframe.clone(),
            confirm_timeframe: self.confirm_timeframe.clone(),
            filter_timeframe: self.filter_timeframe.clone(),
            required_candles: self.required_candles,
            order_funds: self.order_funds,
            step_interval: Duration::from_secs(self.step_interval_secs),
            trading_enabled: self.trading_enabled,
            adaptive_thresholds: self.adaptive_thresholds,
            thresholds: SignalThresholds {
                entry_min: self.entry_min,
                entry_strong: self.entry_strong,
                entry_instant: self.entry_instant,
            },
            max_entry_failures: self.max_entry_failures,
            failure_window_ms: self.failure_window_secs as i64 * 1000,
            pause_cooldown_ms: self.pause_cooldown_secs as i64 * 1000,
            reentry_pause_ms: self.reentry_pause_secs as i64 * 1000,
            risk: RiskConfig {
                stop_loss_pct: self.stop_loss_pct,
                break_even_pct: self.break_even_pct,
                primary_target_pct: self.primary_target_pct,
                extended_target_pct: self.extended_target_pct,
                trailing_pct: self.trailing_pct,
                energy_score: self.energy_score,
                max_holding_ms: self
                    .max_holding_hours
                    .map(|h| (h * 3600.0 * 1000.0) as i64),
            },
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to a
    /// single default engine per symbol in TRADING_SYMBOLS.
    pub fn from_env() -> AppResult<Self> {
        dotenv().ok();

        let exchange = ExchangeConfig {
            api_key: env::var("API_KEY").map_err(|_| {
                AppError::Config("Missing API_KEY environment variable".to_string())
            })?,
            api_secret: env::var("API_SECRET").map_err(|_| {
                AppError::Config("Missing API_SECRET environment variable".to_string())
            })?,
            testnet: env::var("USE_TESTNET")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
        };

        let trading_enabled = env::var("TRADING_ENABLED")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .unwrap_or(false);

        let engines = env::var("TRADING_SYMBOLS")
            .unwrap_or_else(|_| "BTCUSDT".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(|symbol| EngineFileConfig {
                name: symbol.to_lowercase(),
                symbol,
                leverage: default_leverage(),
                isolated_margin: default_isolated_margin(),
                entry_timeframe: default_entry_timeframe(),
                confirm_timeframe: default_confirm_timeframe(),
                filter_timeframe: default_filter_timeframe(),
                required_candles: default_required_candles(),
                order_funds: default_order_funds(),
                step_interval_secs: default_step_interval_secs(),
                trading_enabled,
                adaptive_thresholds: false,
                entry_min: default_entry_min(),
                entry_strong: default_entry_strong(),
                entry_instant: default_entry_instant(),
                max_entry_failures: default_max_entry_failures(),
                failure_window_secs: default_failure_window_secs(),
                pause_cooldown_secs: default_pause_cooldown_secs(),
                reentry_pause_secs: default_reentry_pause_secs(),
                stop_loss_pct: default_stop_loss_pct(),
                break_even_pct: default_break_even_pct(),
                primary_target_pct: default_primary_target_pct(),
                extended_target_pct: default_extended_target_pct(),
                trailing_pct: default_trailing_pct(),
                energy_score: default_energy_score(),
                max_holding_hours: default_max_holding_hours(),
            })
            .collect();

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            to_file: env::var("LOG_TO_FILE")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),
            file_path: env::var("LOG_FILE_PATH").ok(),
        };

        Ok(Config {
            exchange,
            logging,
            engines,
        })
    }

    /// Load configuration from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let mut file = File::open(path)
            .map_err(|e| AppError::Config(format!("Failed to open config file: {}", e)))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| AppError::Config(format!("Failed to read config file: {}", e)))?;
        serde_json::from_str(&contents)
            .map_err(|e| AppError::Config(format!("Failed to parse config file: {}", e)))
    }

    /// Save configuration to a JSON file.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> AppResult<()> {
        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| AppError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)
            .map_err(|e| AppError::Config(format!("Failed to write config file: {}", e)))?;
        Ok(())
    }

    /// Resolved per-engine runtime settings.
    pub fn engine_configs(&self) -> Vec<EngineConfig> {
        self.engines.iter().map(|e| e.to_engine_config()).collect()
    }

    /// Initialize logging based on configuration.
    pub fn init_logging(&self) -> AppResult<()> {
        let mut builder = env_logger::Builder::new();

        let log_level = match self.logging.level.to_lowercase().as_str() {
            "trace" => log::LevelFilter::Trace,
            "debug" => log::LevelFilter::Debug,
            "info" => log::LevelFilter::Info,
            "warn" => log::LevelFilter::Warn,
            "error" => log::LevelFilter::Error,
            _ => log::LevelFilter::Info,
        };
        builder.filter_level(log_level);

        if self.logging.to_file {
            if let Some(file_path) = &self.logging.file_path {
                let file = File::create(file_path)
                    .map_err(|e| AppError::Config(format!("Failed to create log file: {}", e)))?;
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
        }

        builder.init();
        Ok(())
    }
}
