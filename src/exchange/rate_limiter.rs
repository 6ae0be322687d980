// src/exchange/rate_limiter.rs
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};

/// Exchange API weight categories. Binance futures accounts request weight
/// and order count against separate sliding windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiCategory {
    Request,
    Order,
}

#[derive(Debug, Clone, Copy)]
struct Budget {
    limit: u32,
    window: Duration,
}

/// Sliding-window weight budget shared by every exchange call in the
/// process.
///
/// `acquire` blocks the caller until issuing the requested weight would not
/// exceed the category budget. The whole check-and-record sequence runs
/// under one lock, so concurrent orchestrators cannot oversubscribe the
/// window between the check and the record. Waiters are served in FIFO
/// sleep-until-available order; no fairness beyond that is guaranteed.
pub struct RateLimiter {
    budgets: HashMap<ApiCategory, Budget>,
    history: Mutex<HashMap<ApiCategory, VecDeque<(Instant, u32)>>>,
}

/// Margin added on top of the computed wait so a timestamp is strictly
/// outside the window when we retry.
const SAFETY_MARGIN: Duration = Duration::from_millis(50);

impl RateLimiter {
    /// Binance USDT-M futures defaults: 2400 request weight and 1200 order
    /// weight per rolling minute.
    pub fn binance_futures() -> Self {
        Self::new(&[
            (ApiCategory::Request, 2400, Duration::from_secs(60)),
            (ApiCategory::Order, 1200, Duration::from_secs(60)),
        ])
    }

    pub fn new(budgets: &[(ApiCategory, u32, Duration)]) -> Self {
        let budgets = budgets
            .iter()
            .map(|&(cat, limit, window)| (cat, Budget { limit, window }))
            .collect();
        Self {
            budgets,
            history: Mutex::new(HashMap::new()),
        }
    }

    /// Block until `weight` units can be issued in `category`, then record
    /// them. Unknown categories pass through unthrottled.
    pub async fn acquire(&self, category: ApiCategory, weight: u32) {
        let budget = match self.budgets.get(&category) {
            Some(b) => *b,
            None => return,
        };

        loop {
            let wait = {
                let mut history = self.history.lock().await;
                let entries = history.entry(category).or_default();
                let now = Instant::now();

                while let Some(&(ts, _)) = entries.front() {
                    if now.duration_since(ts) >= budget.window {
                        entries.pop_front();
                    } else {
                        break;
                    }
                }

                let used: u32 = entries.iter().map(|&(_, w)| w).sum();
                if used + weight <= budget.limit {
                    entries.push_back((now, weight));
                    return;
                }

                match entries.front() {
                    Some(&(oldest, _)) => {
                        budget.window.saturating_sub(now.duration_since(oldest)) + SAFETY_MARGIN
                    }
                    // Single request heavier than the whole budget; wait a
                    // full window and let it through next round.
                    None => budget.window,
                }
            };

            log::debug!(
                "rate limit reached for {:?}, sleeping {:?} before retry",
                category,
                wait
            );
            sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn acquire_within_budget_does_not_block() {
        let limiter = RateLimiter::new(&[(ApiCategory::Request, 10, Duration::from_secs(60))]);
        let start = Instant::now();
        for _ in 0..10 {
            limiter.acquire(ApiCategory::Request, 1).await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_blocks_until_window_expires() {
        let limiter = RateLimiter::new(&[(ApiCategory::Request, 2400, Duration::from_secs(60))]);
        let start = Instant::now();
        for _ in 0..2400 {
            limiter.acquire(ApiCategory::Request, 1).await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);

        // The 2401st call must wait until the oldest timestamp ages out.
        limiter.acquire(ApiCategory::Request, 1).await;
        assert!(start.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn categories_are_independent() {
        let limiter = RateLimiter::new(&[
            (ApiCategory::Request, 1, Duration::from_secs(60)),
            (ApiCategory::Order, 1, Duration::from_secs(60)),
        ]);
        let start = Instant::now();
        limiter.acquire(ApiCategory::Request, 1).await;
        limiter.acquire(ApiCategory::Order, 1).await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_acquires_do_not_oversubscribe() {
        let limiter = Arc::new(RateLimiter::new(&[(
            ApiCategory::Request,
            4,
            Duration::from_secs(60),
        )]));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire(ApiCategory::Request, 1).await;
                Instant::now()
            }));
        }

        let start = Instant::now();
        let mut finished = Vec::new();
        for h in handles {
            finished.push(h.await.unwrap());
        }
        let late = finished
            .iter()
            .filter(|t| t.duration_since(start) >= Duration::from_secs(60))
            .count();
        // Only four fit into the first window; the rest must have waited.
        assert_eq!(late, 4);
    }
}
