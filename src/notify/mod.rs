//! Alert delivery
//!
//! The scanner hands a structured [`Alert`] to a [`Notifier`]; presentation
//! belongs to the transport.

mod format;
mod log;
mod telegram;

pub use format::{format_age, format_alert, format_update, format_usd, startup_summary};
pub use log::LogNotifier;
pub use telegram::{TelegramNotifier, TELEGRAM_API_URL};

use crate::config::Timeframe;
use crate::exchange::{ExchangeError, Instrument};
use crate::signal::{ConditionTag, SignalMetrics};
use crate::tracker::PerformanceUpdate;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Everything known about one fire
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: Uuid,
    pub instrument: Instrument,
    pub timeframe: Timeframe,
    pub triggered_at: DateTime<Utc>,
    /// Satisfied conditions, in evaluation order
    pub reasons: Vec<ConditionTag>,
    pub metrics: SignalMetrics,
    pub breakout_enabled: bool,
    pub open_interest_enabled: bool,
    /// `None` when the asset is missing from the capitalization dataset
    pub market_cap: Option<Decimal>,
    pub mark_price: Option<Decimal>,
    pub btc_price: Option<Decimal>,
    pub cooldown_minutes: u64,
}

/// Result of handing an alert to the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// Transient failure that survived the transport's own retries
    RetryableFailure,
    /// The transport refused the message
    FatalFailure,
}

impl DeliveryOutcome {
    /// Whether the fire should be recorded in the cooldown ledger
    pub fn is_fatal(&self) -> bool {
        matches!(self, DeliveryOutcome::FatalFailure)
    }

    pub(crate) fn from_result<T>(result: &Result<T, ExchangeError>) -> Self {
        match result {
            Ok(_) => DeliveryOutcome::Delivered,
            Err(e) if e.is_retryable() => DeliveryOutcome::RetryableFailure,
            Err(_) => DeliveryOutcome::FatalFailure,
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notifier request failed: {0}")]
    Request(#[from] ExchangeError),

    #[error("invalid notifier settings: {0}")]
    Invalid(String),
}

/// Alert transport
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, alert: &Alert) -> DeliveryOutcome;

    /// Follow-up on a tracked signal
    async fn deliver_update(&self, update: &PerformanceUpdate) -> DeliveryOutcome;

    /// Announce that scanning has started
    async fn send_startup(&self, summary: &str) -> DeliveryOutcome;
}
