//! Bounded retry with exponential backoff
//!
//! Shared by every outbound REST call. HTTP responses are mapped onto
//! [`ExchangeError`]; transient failures are retried,
//! anything else is returned to the caller on the first attempt.

use super::ExchangeError;
use crate::config::RateLimitConfig;
use crate::telemetry;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Retry schedule for transient request failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub initial_backoff: Duration,
    /// Upper bound for the doubling backoff
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Backoff after the given failed attempt (1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1 << exp)
            .min(self.max_backoff)
    }

    /// Wait before the next attempt; a server hint wins over the schedule
    pub fn delay_for(&self, err: &ExchangeError, attempt: u32) -> Duration {
        err.retry_after()
            .unwrap_or_else(|| self.backoff_for(attempt))
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// `op` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, endpoint: &'static str, mut op: F) -> Result<T, ExchangeError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ExchangeError>>,
    {
        let mut attempt = 1;
        loop {
            telemetry::record_request(endpoint, attempt > 1);

            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_for(&e, attempt);
                    tracing::warn!(
                        endpoint,
                        error = %e,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Request failed, retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_retryable() {
                        tracing::warn!(endpoint, error = %e, attempt, "Retries exhausted");
                    }
                    return Err(e);
                }
            }
        }
    }
}

/// Map a response onto the error taxonomy and decode the body
pub(crate) async fn decode_response<T: DeserializeOwned>(response: Response) -> Result<T, ExchangeError> {
    let status = response.status();

    // 418 is the IP ban that follows ignored 429s
    if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::IM_A_TEAPOT {
        return Err(ExchangeError::RateLimited {
            retry_after: parse_retry_after(response.headers()),
        });
    }
    if status.is_server_error() {
        return Err(ExchangeError::Server {
            status: status.as_u16(),
        });
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ExchangeError::Client {
            status: status.as_u16(),
            body,
        });
    }

    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| ExchangeError::Decode(e.to_string()))
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
