// src/domain/repository.rs
use crate::domain::errors::AppResult;
use crate::domain::models::TradeRecord;
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

/// Persistence collaborator: append-only trade records plus key/value
/// settings read at startup. The core calls into this but does not own the
/// underlying schema.
#[async_trait]
pub trait TradeRepository: Send + Sync {
    async fn append_trade(&self, record: &TradeRecord) -> AppResult<()>;

    async fn load_setting(&self, key: &str) -> AppResult<Option<String>>;
}

/// In-memory repository used in tests and as a fallback when no store is
/// configured.
#[derive(Default)]
pub struct InMemoryTradeRepository {
    trades: Mutex<Vec<TradeRecord>>,
    settings: Mutex<HashMap<String, String>>,
}

impl InMemoryTradeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_setting(self, key: &str, value: &str) -> Self {
        self.settings
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn trades(&self) -> Vec<TradeRecord> {
        self.trades.lock().unwrap().clone()
    }
}

#[async_trait]
impl TradeRepository for InMemoryTradeRepository {
    async fn append_trade(&self, record: &TradeRecord) -> AppResult<()> {
        self.trades.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn load_setting(&self, key: &str) -> AppResult<Option<String>> {
        Ok(self.settings.lock().unwrap().get(key).cloned())
    }
}

/// JSON-lines file repository, one serialized `TradeRecord` per line.
pub struct JsonlTradeRepository {
    path: PathBuf,
    file: Mutex<std::fs::File>,
}

impl JsonlTradeRepository {
    pub fn open(path: impl Into<PathBuf>) -> AppResult<Self> {
        let path = path.into();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[async_trait]
impl TradeRepository for JsonlTradeRepository {
    async fn append_trade(&self, record: &TradeRecord) -> AppResult<()> {
        let line = serde_json::to_string(record)?;
        let mut file = self.file.lock().unwrap();
        writeln!(file, "{}", line)?;
        Ok(())
    }

    async fn load_setting(&self, _key: &str) -> AppResult<Option<String>> {
        // Settings live in the environment for the file-backed store.
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_round_trip() {
        let repo = InMemoryTradeRepository::new().with_setting("mode", "paper");

        let record = TradeRecord {
            engine: "alpha".to_string(),
            symbol: "BTCUSDT".to_string(),
            timestamp: 1,
            funds: 1000.0,
            leverage: 5,
            pnl: 12.5,
            pnl_pct: 1.25,
        };
        repo.append_trade(&record).await.unwrap();

        assert_eq!(repo.trades().len(), 1);
        assert_eq!(repo.trades()[0].symbol, "BTCUSDT");
        assert_eq!(
            repo.load_setting("mode").await.unwrap().as_deref(),
            Some("paper")
        );
        assert!(repo.load_setting("missing").await.unwrap().is_none());
    }
}
