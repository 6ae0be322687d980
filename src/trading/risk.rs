// src/trading/risk.rs
use crate::domain::models::{ExitReason, ExitSignal, PositionState};

/// Position risk parameters, all percentages of entry price except the
/// holding limit.
#[derive(Debug, Clone)]
pub struct RiskConfig {
    pub stop_loss_pct: f64,
    pub break_even_pct: f64,
    pub primary_target_pct: f64,
    pub extended_target_pct: f64,
    pub trailing_pct: f64,
    /// Entry-style score above which a position at its primary target is
    /// allowed to run toward the extended target.
    pub energy_score: f64,
    pub max_holding_ms: Option<i64>,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            stop_loss_pct: 2.0,
            break_even_pct: 1.0,
            primary_target_pct: 2.0,
            extended_target_pct: 3.5,
            trailing_pct: 1.0,
            energy_score: 100.0,
            max_holding_ms: None,
        }
    }
}

/// Non-exit outcomes of a risk pass that the caller should surface.
#[derive(Debug, Clone, PartialEq)]
pub enum RiskEvent {
    TrailingActivated { stop_price: f64 },
    TakeProfitExtended { take_profit: f64 },
}

/// Evaluates an open long against price, clock and momentum. Checks run
/// in fixed priority order; protective checks always win over
/// profit-taking ones.
pub struct RiskManager {
    config: RiskConfig,
}

impl RiskManager {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// One risk pass at `price`/`now_ms` with the latest entry-style
    /// score as the momentum input. Mutates the position (extremes,
    /// stop ratchets, target extension) and returns an exit signal when
    /// the position must close, plus any state-change events.
    pub fn evaluate(
        &self,
        position: &mut PositionState,
        price: f64,
        now_ms: i64,
        last_score: f64,
    ) -> (Option<ExitSignal>, Vec<RiskEvent>) {
        position.mark(price);
        let mut events = Vec::new();

        // 1. Holding-time limit.
        if let Some(limit) = self.config.max_holding_ms {
            if now_ms - position.opened_at >= limit {
                return (
                    Some(ExitSignal::close(
                        ExitReason::TimeLimit,
                        format!("holding time exceeded {} ms", limit),
                    )),
                    events,
                );
            }
        }

        // 2. Stop loss on drawdown.
        if position.pnl_pct <= -self.config.stop_loss_pct {
            return (
                Some(ExitSignal::close(
                    ExitReason::StopLoss,
                    format!("pnl {:.2}% hit stop loss", position.pnl_pct),
                )),
                events,
            );
        }

        // 3. Break-even shift: once in profit enough, the stop moves to
        // entry and trailing arms.
        if position.pnl_pct >= self.config.break_even_pct && !position.trailing_active {
            position.stop_loss = position.stop_loss.max(position.entry_price);
            position.trailing_active = true;
            events.push(RiskEvent::TrailingActivated {
                stop_price: position.stop_loss,
            });
        }

        // 4. Primary target: lock it in as a stop floor, then either run
        // for the extended target (momentum still strong) or take profit.
        if position.pnl_pct >= self.config.primary_target_pct {
            let primary_price =
                position.entry_price * (1.0 + self.config.primary_target_pct / 100.0);
            position.stop_loss = position.stop_loss.max(primary_price);

            if last_score >= self.config.energy_score {
                if !position.take_profit_extended {
                    position.take_profit =
                        position.entry_price * (1.0 + self.config.extended_target_pct / 100.0);
                    position.take_profit_extended = true;
                    events.push(RiskEvent::TakeProfitExtended {
                        take_profit: position.take_profit,
                    });
                }
            } else {
                return (
                    Some(ExitSignal::close(
                        ExitReason::TakeProfit,
                        format!(
                            "primary target hit at {:.2}% with fading score {:.0}",
                            position.pnl_pct, last_score
                        ),
                    )),
                    events,
                );
            }
        }

        // 5. Trailing stop follows the high-water mark.
        if position.trailing_active {
            let trail = position.highest_price * (1.0 - self.config.trailing_pct / 100.0);
            position.stop_loss = position.stop_loss.max(trail);
            if price <= position.stop_loss {
                return (
                    Some(ExitSignal::close(
                        ExitReason::TrailingStop,
                        format!("price {:.4} fell to stop {:.4}", price, position.stop_loss),
                    )),
                    events,
                );
            }
        }

        // 6. Extended target.
        if position.take_profit_extended && price >= position.take_profit {
            return (
                Some(ExitSignal::close(
                    ExitReason::TakeProfit,
                    format!("extended target {:.4} reached", position.take_profit),
                )),
                events,
            );
        }

        (None, events)
    }
}
