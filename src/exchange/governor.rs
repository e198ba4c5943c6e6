//! Request-cost governor
//!
//! Tracks the request cost spent against the exchange inside a fixed window.
//! Every outbound call acquires its cost here first; when the budget is
//! exhausted the caller is suspended until the window rolls over. The window
//! resets hard (consumed back to zero), it never decays.

use crate::config::RateLimitConfig;
use crate::telemetry::{self, GaugeMetric, LatencyMetric};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

/// Cost spent in the current window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CostBudget {
    pub window_start: Instant,
    pub consumed: u32,
}

/// Single owner of the request-cost budget.
///
/// Accounting is serialized through one async mutex. A caller that has to
/// wait keeps the lock while sleeping, so later callers queue behind it in
/// FIFO order and the budget can never be overspent.
pub struct RateGovernor {
    max_cost: u32,
    window: Duration,
    budget: Mutex<CostBudget>,
}

impl RateGovernor {
    pub fn new(max_cost: u32, window: Duration) -> Self {
        Self {
            max_cost,
            window,
            budget: Mutex::new(CostBudget {
                window_start: Instant::now(),
                consumed: 0,
            }),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.max_cost, config.window())
    }

    /// Wait until `cost` fits in the current window, record it, and return
    /// the grant time. A cost larger than the whole budget is clamped.
    pub async fn acquire(&self, cost: u32) -> Instant {
        let cost = cost.min(self.max_cost);
        let requested_at = Instant::now();
        let mut budget = self.budget.lock().await;

        loop {
            let now = Instant::now();
            if now.duration_since(budget.window_start) >= self.window {
                budget.window_start = now;
                budget.consumed = 0;
            }

            if budget.consumed + cost <= self.max_cost {
                budget.consumed += cost;
                telemetry::set_gauge(GaugeMetric::ConsumedCost, budget.consumed as f64);
                telemetry::record_latency(LatencyMetric::GovernorWait, now - requested_at);
                return now;
            }

            let resume_at = budget.window_start + self.window;
            tracing::warn!(
                consumed = budget.consumed,
                requested = cost,
                max_cost = self.max_cost,
                wait_ms = resume_at.saturating_duration_since(now).as_millis() as u64,
                "Request budget exhausted, waiting for window reset"
            );
            sleep_until(resume_at).await;
        }
    }

    /// Consistent copy of the current budget
    pub async fn snapshot(&self) -> CostBudget {
        *self.budget.lock().await
    }
}
