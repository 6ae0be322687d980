// src/trading/manager.rs
use crate::domain::errors::TradingResult;
use crate::domain::models::{EngineEvent, TradeRecord};
use crate::domain::repository::TradeRepository;
use crate::exchange::ExchangeClient;
use crate::trading::orchestrator::{EngineStatus, StrategyOrchestrator};
use chrono::Utc;
use futures_util::future::join_all;
use log::{error, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::sleep;

const MONITOR_INTERVAL: Duration = Duration::from_secs(5);
const BROADCAST_CAPACITY: usize = 256;

/// Per-engine bookkeeping kept by the supervisor.
struct EngineRecord<C: ExchangeClient + 'static> {
    orchestrator: Arc<StrategyOrchestrator<C>>,
    trades: u64,
    total_pnl: f64,
}

pub type PnlCallback = Arc<dyn Fn(&str, f64, f64) + Send + Sync>;

/// Supervises a set of independent engine loops: lifecycle, event
/// fan-out, trade persistence and periodic status reporting.
pub struct EngineManager<C: ExchangeClient + 'static> {
    engines: Mutex<HashMap<String, EngineRecord<C>>>,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<EngineEvent>>>,
    broadcast_tx: broadcast::Sender<EngineEvent>,
    repository: Arc<dyn TradeRepository>,
    pnl_callback: Mutex<Option<PnlCallback>>,
    background: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
    stop_pump: Notify,
}

impl<C: ExchangeClient + 'static> EngineManager<C> {
    pub fn new(repository: Arc<dyn TradeRepository>) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Arc::new(Self {
            engines: Mutex::new(HashMap::new()),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            broadcast_tx,
            repository,
            pnl_callback: Mutex::new(None),
            background: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            stop_pump: Notify::new(),
        })
    }

    /// Sender that registered orchestrators publish their events on.
    pub fn events_sender(&self) -> mpsc::UnboundedSender<EngineEvent> {
        self.events_tx.clone()
    }

    /// Subscribe to the fanned-out event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.broadcast_tx.subscribe()
    }

    pub async fn set_pnl_callback(&self, callback: PnlCallback) {
        *self.pnl_callback.lock().await = Some(callback);
    }

    pub async fn register(&self, orchestrator: Arc<StrategyOrchestrator<C>>) {
        let name = orchestrator.name().to_string();
        let mut engines = self.engines.lock().await;
        if engines.contains_key(&name) {
            warn!("engine {} already registered, replacing", name);
        }
        engines.insert(
            name,
            EngineRecord {
                orchestrator,
                trades: 0,
                total_pnl: 0.0,
            },
        );
    }

    pub async fn start(&self, name: &str) -> TradingResult<()> {
        let orchestrator = {
            let engines = self.engines.lock().await;
            engines.get(name).map(|r| Arc::clone(&r.orchestrator))
        };
        match orchestrator {
            Some(orch) => orch.start().await,
            None => {
                warn!("start requested for unknown engine {}", name);
                Ok(())
            }
        }
    }

    pub async fn stop(&self, name: &str, force_close: bool) {
        let orchestrator = {
            let engines = self.engines.lock().await;
            engines.get(name).map(|r| Arc::clone(&r.orchestrator))
        };
        if let Some(orch) = orchestrator {
            orch.stop(force_close).await;
        }
    }

    /// Start every registered engine plus the pump and monitor tasks.
    /// Engines whose warmup fails are skipped, not fatal.
    pub async fn start_all(self: &Arc<Self>) {
        self.start_background().await;
        let orchestrators: Vec<_> = {
            let engines = self.engines.lock().await;
            engines
                .values()
                .map(|r| Arc::clone(&r.orchestrator))
                .collect()
        };
        for orch in orchestrators {
            if let Err(e) = orch.start().await {
                error!("engine {} failed to start: {}", orch.name(), e);
            }
        }
    }

    pub async fn stop_all(&self, force_close: bool) {
        let orchestrators: Vec<_> = {
            let engines = self.engines.lock().await;
            engines
                .values()
                .map(|r| Arc::clone(&r.orchestrator))
                .collect()
        };
        join_all(orchestrators.iter().map(|orch| orch.stop(force_close))).await;
    }

    pub async fn statuses(&self) -> Vec<EngineStatus> {
        let engines = self.engines.lock().await;
        engines
            .values()
            .map(|r| r.orchestrator.status())
            .collect()
    }

    /// Stop engines, then let the background tasks finish on their own
    /// and wait for them.
    pub async fn shutdown(self: &Arc<Self>, force_close: bool) {
        info!("shutting down engine manager");
        self.running.store(false, Ordering::SeqCst);
        self.stop_all(force_close).await;
        // One last sweep so trades from a forced close still persist.
        self.poll_once().await;
        self.stop_pump.notify_one();
        for handle in self.background.lock().await.drain(..) {
            let _ = handle.await;
        }
    }

    async fn start_background(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut background = self.background.lock().await;

        if let Some(mut rx) = self.events_rx.lock().await.take() {
            let pump = Arc::clone(self);
            background.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = pump.stop_pump.notified() => break,
                        event = rx.recv() => match event {
                            // Send fails only with zero subscribers.
                            Some(event) => {
                                let _ = pump.broadcast_tx.send(event);
                            }
                            None => break,
                        },
                    }
                }
                // Flush whatever was queued before the stop signal.
                while let Ok(event) = rx.try_recv() {
                    let _ = pump.broadcast_tx.send(event);
                }
            }));
        }

        let monitor = Arc::clone(self);
        background.push(tokio::spawn(async move {
            while monitor.running.load(Ordering::SeqCst) {
                sleep(MONITOR_INTERVAL).await;
                if monitor.running.load(Ordering::SeqCst) {
                    monitor.poll_once().await;
                }
            }
        }));
    }

    /// One supervision sweep: collect completed trades, persist them,
    /// invoke the PnL callback and publish status updates.
    pub async fn poll_once(&self) {
        let now_ms = Utc::now().timestamp_millis();
        let callback = self.pnl_callback.lock().await.clone();
        let mut engines = self.engines.lock().await;

        for record in engines.values_mut() {
            let orch = &record.orchestrator;
            let status = orch.status();

            if let Some((pnl, pnl_pct)) = orch.take_completed_trade() {
                record.trades += 1;
                record.total_pnl += pnl;
                let config = orch.config();
                let trade = TradeRecord {
                    engine: status.name.clone(),
                    symbol: status.symbol.clone(),
                    timestamp: now_ms,
                    funds: config.order_funds,
                    leverage: config.leverage,
                    pnl,
                    pnl_pct,
                };
                info!(
                    "engine {} completed trade #{} (pnl {:.4}, running total {:.4})",
                    status.name, record.trades, pnl, record.total_pnl
                );
                let repository = Arc::clone(&self.repository);
                // Persistence must not stall supervision.
                tokio::spawn(async move {
                    if let Err(e) = repository.append_trade(&trade).await {
                        error!("failed to persist trade for {}: {}", trade.engine, e);
                    }
                });
                if let Some(callback) = &callback {
                    callback(&status.name, pnl, pnl_pct);
                }
                let _ = self.events_tx.send(EngineEvent::EngineTradeCompleted {
                    engine: status.name.clone(),
                    symbol: status.symbol.clone(),
                    pnl,
                    pnl_pct,
                    timestamp: now_ms,
                });
            }

            let _ = self.events_tx.send(EngineEvent::EngineStatusUpdate {
                engine: status.name,
                symbol: status.symbol,
                in_position: status.in_position,
                realized_pnl: status.realized_pnl,
                timestamp: now_ms,
            });
        }
    }
}
