// src/trading/orchestrator.rs
use crate::analysis::compute_snapshot;
use crate::config::EngineConfig;
use crate::domain::errors::{TradingError, TradingResult};
use crate::domain::models::{
    timeframe_ms, EngineEvent, ExitReason, ExitSignal, IndicatorSnapshot, PositionState,
    SignalAction, SignalResult,
};
use crate::exchange::ExchangeClient;
use crate::market_data::DataFetcher;
use crate::trading::execution::ExecutionAdapter;
use crate::trading::risk::{RiskEvent, RiskManager};
use crate::trading::signals::{ScoreTracker, SignalEngine};
use chrono::Utc;
use log::{debug, error, info, warn};
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

const SCORE_TRACKER_CAPACITY: usize = 500;
const SCORE_TRACKER_MIN_SAMPLES: usize = 50;
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Point-in-time view of one engine, used by the supervisor.
#[derive(Debug, Clone)]
pub struct EngineStatus {
    pub name: String,
    pub symbol: String,
    pub in_position: bool,
    pub realized_pnl: f64,
    pub last_score: f64,
    pub paused_until: i64,
}

/// Drives one symbol end to end: data refresh, scoring, risk checks and
/// order placement, stepped on a fixed interval.
pub struct StrategyOrchestrator<C: ExchangeClient> {
    config: EngineConfig,
    client: Arc<C>,
    fetcher: Arc<DataFetcher<C>>,
    execution: ExecutionAdapter<C>,
    risk: RiskManager,
    signals: Mutex<SignalEngine>,
    tracker: Mutex<ScoreTracker>,
    position: Mutex<Option<PositionState>>,
    prev_snapshot: Mutex<Option<IndicatorSnapshot>>,
    watermarks: Mutex<HashMap<String, i64>>,
    failures: Mutex<VecDeque<i64>>,
    paused_until: AtomicI64,
    last_score: Mutex<f64>,
    realized_pnl: Mutex<f64>,
    completed_trade: Mutex<Option<(f64, f64)>>,
    running: AtomicBool,
    handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    events: UnboundedSender<EngineEvent>,
}

impl<C: ExchangeClient + 'static> StrategyOrchestrator<C> {
    pub fn new(
        config: EngineConfig,
        client: Arc<C>,
        fetcher: Arc<DataFetcher<C>>,
        execution: ExecutionAdapter<C>,
        events: UnboundedSender<EngineEvent>,
    ) -> Self {
        let signals = SignalEngine::new(config.thresholds);
        let risk = RiskManager::new(config.risk.clone());
        Self {
            config,
            client,
            fetcher,
            execution,
            risk,
            signals: Mutex::new(signals),
            tracker: Mutex::new(ScoreTracker::new(
                SCORE_TRACKER_CAPACITY,
                SCORE_TRACKER_MIN_SAMPLES,
            )),
            position: Mutex::new(None),
            prev_snapshot: Mutex::new(None),
            watermarks: Mutex::new(HashMap::new()),
            failures: Mutex::new(VecDeque::new()),
            paused_until: AtomicI64::new(0),
            last_score: Mutex::new(0.0),
            realized_pnl: Mutex::new(0.0),
            completed_trade: Mutex::new(None),
            running: AtomicBool::new(false),
            handle: tokio::sync::Mutex::new(None),
            events,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn symbol(&self) -> &str {
        &self.config.symbol
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            name: self.config.name.clone(),
            symbol: self.config.symbol.clone(),
            in_position: self.position.lock().unwrap().is_some(),
            realized_pnl: *self.realized_pnl.lock().unwrap(),
            last_score: *self.last_score.lock().unwrap(),
            paused_until: self.paused_until.load(Ordering::SeqCst),
        }
    }

    /// Hand the most recent completed trade (pnl, pnl_pct) to the
    /// supervisor, at most once per trade.
    pub fn take_completed_trade(&self) -> Option<(f64, f64)> {
        self.completed_trade.lock().unwrap().take()
    }

    fn emit(&self, event: EngineEvent) {
        // A closed receiver only means nobody is listening.
        let _ = self.events.send(event);
    }

    fn timeframes(&self) -> Vec<&str> {
        let mut tfs = vec![self.config.entry_timeframe.as_str()];
        for tf in [
            self.config.confirm_timeframe.as_str(),
            self.config.filter_timeframe.as_str(),
        ] {
            if !tfs.contains(&tf) {
                tfs.push(tf);
            }
        }
        tfs
    }

    /// Prepare the symbol on the exchange and backfill every timeframe
    /// to the required depth.
    pub async fn warmup(&self) -> TradingResult<()> {
        let symbol = self.config.symbol.clone();
        let ready = self
            .execution
            .prepare_symbol(&symbol, self.config.leverage, self.config.isolated_margin)
            .await?;
        if !ready {
            self.emit(EngineEvent::SymbolUnsupported {
                engine: self.config.name.clone(),
                symbol: symbol.clone(),
                timestamp: Utc::now().timestamp_millis(),
            });
            return Err(TradingError::SymbolUnsupported(symbol));
        }

        for tf in self.timeframes() {
            self.fetcher
                .fetch_historical(&symbol, tf, self.config.required_candles, None)
                .await
                .map_err(|e| TradingError::Warmup(e.to_string()))?;
            let loaded = self.fetcher.cache().len(&symbol, tf);
            self.emit(EngineEvent::DataProgress {
                engine: self.config.name.clone(),
                symbol: symbol.clone(),
                timeframe: tf.to_string(),
                loaded,
                required: self.config.required_candles,
                timestamp: Utc::now().timestamp_millis(),
            });
        }
        info!("[{}] warmup complete for {}", self.config.name, symbol);
        Ok(())
    }

    fn is_paused(&self, now_ms: i64) -> bool {
        now_ms < self.paused_until.load(Ordering::SeqCst)
    }

    /// Pull any newly closed candles, refilling from scratch if the
    /// cache has drained below the indicator window.
    async fn refresh_data(&self, now_ms: i64) -> TradingResult<()> {
        let symbol = &self.config.symbol;
        for tf in self.timeframes() {
            let bucket = now_ms - now_ms % timeframe_ms(tf);
            let stale = {
                let marks = self.watermarks.lock().unwrap();
                marks.get(tf).copied().unwrap_or(0) < bucket
            };
            if stale {
                self.fetcher
                    .fetch_latest_candle(symbol, tf)
                    .await
                    .map_err(|e| TradingError::Engine(e.to_string()))?;
                self.watermarks
                    .lock()
                    .unwrap()
                    .insert(tf.to_string(), bucket);
            }
            if !self
                .fetcher
                .cache()
                .has_sufficient(symbol, tf, self.config.required_candles)
            {
                self.fetcher
                    .fetch_historical(symbol, tf, self.config.required_candles, None)
                    .await
                    .map_err(|e| TradingError::Engine(e.to_string()))?;
            }
        }
        Ok(())
    }

    async fn snapshot_for(&self, timeframe: &str) -> TradingResult<IndicatorSnapshot> {
        let candles = self
            .fetcher
            .latest(&self.config.symbol, timeframe, self.config.required_candles)
            .await
            .map_err(|e| TradingError::Engine(e.to_string()))?;
        compute_snapshot(&candles).map_err(|e| TradingError::Engine(e.to_string()))
    }

    async fn mark_price_or(&self, fallback: f64) -> f64 {
        match self.client.mark_price(&self.config.symbol).await {
            Ok(price) => price,
            Err(e) => {
                warn!(
                    "[{}] mark price unavailable ({}), using last close",
                    self.config.name, e
                );
                fallback
            }
        }
    }

    /// One evaluation pass at `now_ms`.
    pub async fn step(&self, now_ms: i64) -> TradingResult<()> {
        self.refresh_data(now_ms).await?;

        let entry_snap = self.snapshot_for(&self.config.entry_timeframe).await?;
        let confirm_snap = self.snapshot_for(&self.config.confirm_timeframe).await?;
        let filter_snap = self.snapshot_for(&self.config.filter_timeframe).await?;
        let prev = self.prev_snapshot.lock().unwrap().clone();

        let entry_eval = {
            let engine = self.signals.lock().unwrap();
            engine.evaluate_entry(&entry_snap, prev.as_ref(), &confirm_snap, &filter_snap)
        };
        *self.last_score.lock().unwrap() = entry_eval.score;

        self.update_thresholds(entry_eval.score, now_ms);

        let price = self.mark_price_or(entry_snap.close).await;
        let in_position = self.position.lock().unwrap().is_some();
        if in_position {
            self.step_in_position(&entry_snap, prev.as_ref(), price, now_ms)
                .await;
        } else {
            self.step_flat(&entry_eval, price, now_ms).await;
        }

        *self.prev_snapshot.lock().unwrap() = Some(entry_snap);
        Ok(())
    }

    fn update_thresholds(&self, score: f64, now_ms: i64) {
        let derived = {
            let mut tracker = self.tracker.lock().unwrap();
            tracker.push(score);
            tracker.thresholds()
        };
        if !self.config.adaptive_thresholds {
            return;
        }

        // Report the active thresholds every step while the toggle is
        // on, whether they are still static or percentile-derived.
        let from_tracker = derived.is_some();
        let active = {
            let mut engine = self.signals.lock().unwrap();
            if let Some(thresholds) = derived {
                engine.set_thresholds(thresholds);
            }
            engine.thresholds()
        };
        self.emit(EngineEvent::ThresholdUpdate {
            engine: self.config.name.clone(),
            symbol: self.config.symbol.clone(),
            entry_min: active.entry_min,
            entry_strong: active.entry_strong,
            entry_instant: active.entry_instant,
            adaptive: from_tracker,
            timestamp: now_ms,
        });
    }

    async fn step_flat(&self, eval: &SignalResult, price: f64, now_ms: i64) {
        let name = self.config.name.clone();
        let symbol = self.config.symbol.clone();

        if eval.action == SignalAction::BuyLong {
            if self.is_paused(now_ms) {
                let until = self.paused_until.load(Ordering::SeqCst);
                debug!("[{}] entry signal suppressed while paused", name);
                self.emit(EngineEvent::Pause {
                    engine: name,
                    symbol,
                    until,
                    timestamp: now_ms,
                });
                return;
            }
            if !self.config.trading_enabled {
                info!("[{}] entry signal ignored, trading disabled", name);
                self.emit(EngineEvent::Hold {
                    engine: name,
                    symbol,
                    score: eval.score,
                    timestamp: now_ms,
                });
                return;
            }
            self.try_enter(eval.score, price, now_ms).await;
            return;
        }

        let watchlist = self.signals.lock().unwrap().is_watchlist(eval.score);
        if watchlist {
            self.emit(EngineEvent::Watchlist {
                engine: name,
                symbol,
                score: eval.score,
                timestamp: now_ms,
            });
        } else {
            self.emit(EngineEvent::Hold {
                engine: name,
                symbol,
                score: eval.score,
                timestamp: now_ms,
            });
        }
    }

    async fn try_enter(&self, score: f64, price: f64, now_ms: i64) {
        let name = self.config.name.clone();
        let symbol = self.config.symbol.clone();
        let raw_quantity = self.config.order_funds * self.config.leverage as f64 / price;

        let quantity = match self
            .execution
            .normalize_quantity(&symbol, raw_quantity, price)
            .await
        {
            Ok(q) => q,
            Err(e) => {
                warn!("[{}] entry rejected during normalization: {}", name, e);
                self.record_entry_failure(now_ms, e.to_string());
                return;
            }
        };

        let result = self.execution.place_market_long(&symbol, quantity).await;
        if !result.success {
            let error = result.error.unwrap_or_else(|| "unknown".to_string());
            self.record_entry_failure(now_ms, error);
            return;
        }

        let entry_price = result.avg_price;
        let stop_loss = entry_price * (1.0 - self.risk.config().stop_loss_pct / 100.0);
        let take_profit = entry_price * (1.0 + self.risk.config().primary_target_pct / 100.0);
        let position = PositionState::open(
            &symbol,
            entry_price,
            result.quantity,
            self.config.leverage,
            now_ms,
            stop_loss,
            take_profit,
        );
        info!(
            "[{}] opened long {} {} @ {} (score {:.0})",
            name, result.quantity, symbol, entry_price, score
        );
        *self.position.lock().unwrap() = Some(position);
        self.emit(EngineEvent::Entry {
            engine: name,
            symbol,
            price: entry_price,
            quantity: result.quantity,
            score,
            timestamp: now_ms,
        });
    }

    fn record_entry_failure(&self, now_ms: i64, error: String) {
        let name = self.config.name.clone();
        let symbol = self.config.symbol.clone();
        self.emit(EngineEvent::EntryFail {
            engine: name.clone(),
            symbol: symbol.clone(),
            error,
            timestamp: now_ms,
        });

        let tripped = {
            let mut failures = self.failures.lock().unwrap();
            failures.push_back(now_ms);
            while let Some(&oldest) = failures.front() {
                if now_ms - oldest > self.config.failure_window_ms {
                    failures.pop_front();
                } else {
                    break;
                }
            }
            if failures.len() >= self.config.max_entry_failures {
                failures.clear();
                true
            } else {
                false
            }
        };

        if tripped {
            let until = now_ms + self.config.pause_cooldown_ms;
            self.paused_until.store(until, Ordering::SeqCst);
            warn!(
                "[{}] too many entry failures, pausing entries until {}",
                name, until
            );
            self.emit(EngineEvent::ProtectivePause {
                engine: name,
                symbol,
                failures: self.config.max_entry_failures,
                until,
                timestamp: now_ms,
            });
        }
    }

    async fn step_in_position(
        &self,
        entry_snap: &IndicatorSnapshot,
        prev: Option<&IndicatorSnapshot>,
        price: f64,
        now_ms: i64,
    ) {
        let last_score = *self.last_score.lock().unwrap();
        let (verdict, risk_events) = {
            let mut guard = self.position.lock().unwrap();
            let position = match guard.as_mut() {
                Some(p) => p,
                None => return,
            };
            self.risk.evaluate(position, price, now_ms, last_score)
        };

        for event in risk_events {
            match event {
                RiskEvent::TrailingActivated { stop_price } => {
                    self.emit(EngineEvent::TrailingActivated {
                        engine: self.config.name.clone(),
                        symbol: self.config.symbol.clone(),
                        stop_price,
                        timestamp: now_ms,
                    });
                }
                RiskEvent::TakeProfitExtended { take_profit } => {
                    info!(
                        "[{}] extended take profit to {:.4}",
                        self.config.name, take_profit
                    );
                }
            }
        }

        if let Some(exit) = verdict {
            self.try_close(exit, now_ms).await;
            return;
        }

        // Risk says hold; the signal engine still gets a veto.
        let exit_eval = {
            let engine = self.signals.lock().unwrap();
            engine.evaluate_exit(entry_snap, prev)
        };
        if exit_eval.action == SignalAction::CloseLong {
            self.try_close(
                ExitSignal::close(ExitReason::Signal, exit_eval.reason),
                now_ms,
            )
            .await;
            return;
        }

        let pnl_pct = self
            .position
            .lock()
            .unwrap()
            .as_ref()
            .map(|p| p.pnl_pct)
            .unwrap_or(0.0);
        self.emit(EngineEvent::HoldInPosition {
            engine: self.config.name.clone(),
            symbol: self.config.symbol.clone(),
            pnl_pct,
            score: last_score,
            timestamp: now_ms,
        });
    }

    async fn try_close(&self, exit: ExitSignal, now_ms: i64) {
        let name = self.config.name.clone();
        let symbol = self.config.symbol.clone();
        let (entry_price, quantity) = match self.position.lock().unwrap().as_ref() {
            Some(p) => (p.entry_price, p.quantity),
            None => return,
        };
        let quantity_dec = match Decimal::try_from(quantity) {
            Ok(q) => q,
            Err(_) => {
                error!("[{}] position quantity {} not representable", name, quantity);
                return;
            }
        };

        let result = self.execution.close_market_long(&symbol, quantity_dec).await;
        if !result.success {
            let error = result.error.unwrap_or_else(|| "unknown".to_string());
            warn!("[{}] close failed ({}), position kept", name, error);
            self.emit(EngineEvent::ExitFail {
                engine: name,
                symbol,
                reason: exit.reason,
                error,
                timestamp: now_ms,
            });
            return;
        }

        let exit_price = result.avg_price;
        let pnl = (exit_price - entry_price) * result.quantity;
        let pnl_pct = (exit_price - entry_price) / entry_price * 100.0;
        info!(
            "[{}] closed {} @ {} ({}, pnl {:.4} / {:.2}%)",
            name, symbol, exit_price, exit.reason, pnl, pnl_pct
        );

        *self.position.lock().unwrap() = None;
        *self.realized_pnl.lock().unwrap() += pnl;
        *self.completed_trade.lock().unwrap() = Some((pnl, pnl_pct));
        self.emit(EngineEvent::Exit {
            engine: name.clone(),
            symbol: symbol.clone(),
            reason: exit.reason,
            price: exit_price,
            pnl,
            pnl_pct,
            timestamp: now_ms,
        });

        if self.config.reentry_pause_ms > 0 {
            let until = now_ms + self.config.reentry_pause_ms;
            // Never shorten an active protective pause.
            let current = self.paused_until.load(Ordering::SeqCst);
            if until > current {
                self.paused_until.store(until, Ordering::SeqCst);
            }
            self.emit(EngineEvent::Pause {
                engine: name,
                symbol,
                until,
                timestamp: now_ms,
            });
        }
    }

    async fn run_loop(self: Arc<Self>) {
        info!("[{}] engine loop started", self.config.name);
        while self.running.load(Ordering::SeqCst) {
            let started = tokio::time::Instant::now();
            let now_ms = Utc::now().timestamp_millis();
            if let Err(e) = self.step(now_ms).await {
                error!("[{}] step failed: {}", self.config.name, e);
            }
            let elapsed = started.elapsed();
            match self.config.step_interval.checked_sub(elapsed) {
                Some(remainder) => sleep(remainder).await,
                None => warn!(
                    "[{}] step took {:?}, longer than the {:?} interval",
                    self.config.name, elapsed, self.config.step_interval
                ),
            }
        }
        info!("[{}] engine loop stopped", self.config.name);
    }

    /// Warm up and spawn the step loop. Warmup failure keeps the engine
    /// stopped.
    pub async fn start(self: &Arc<Self>) -> TradingResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(e) = self.warmup().await {
            self.running.store(false, Ordering::SeqCst);
            self.emit(EngineEvent::WarmupFail {
                engine: self.config.name.clone(),
                symbol: self.config.symbol.clone(),
                error: e.to_string(),
                timestamp: Utc::now().timestamp_millis(),
            });
            return Err(e);
        }
        let task = Arc::clone(self);
        *self.handle.lock().await = Some(tokio::spawn(task.run_loop()));
        Ok(())
    }

    /// Stop the loop, then optionally flatten any open position.
    pub async fn stop(&self, force_close: bool) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().await.take() {
            if timeout(STOP_JOIN_TIMEOUT, handle).await.is_err() {
                warn!(
                    "[{}] step loop did not finish within {:?}",
                    self.config.name, STOP_JOIN_TIMEOUT
                );
            }
        }
        if force_close && self.position.lock().unwrap().is_some() {
            let now_ms = Utc::now().timestamp_millis();
            self.try_close(
                ExitSignal::close(ExitReason::Manual, "engine stopped".to_string()),
                now_ms,
            )
            .await;
        }
    }
}
