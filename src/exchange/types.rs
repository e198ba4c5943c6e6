//! Exchange data types

use crate::config::VolumeBasis;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// A tradable contract from the exchange universe
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Instrument {
    /// Exchange symbol (e.g. "1000PEPEUSDT")
    pub symbol: String,
    /// Base asset as named by the exchange (e.g. "1000PEPE")
    pub base_asset: String,
}

impl Instrument {
    pub fn new(symbol: impl Into<String>, base_asset: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            base_asset: base_asset.into(),
        }
    }
}

/// One OHLCV candle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    /// Base-asset volume
    pub volume: Decimal,
    /// Quote-asset volume
    pub quote_volume: Decimal,
    pub trades: u64,
    /// False while the candle is still forming
    pub closed: bool,
}

impl Candle {
    /// Volume in the requested basis
    pub fn volume_in(&self, basis: VolumeBasis) -> Decimal {
        match basis {
            VolumeBasis::Quote => self.quote_volume,
            VolumeBasis::Base => self.volume,
        }
    }

    /// Close strictly above open
    pub fn is_green(&self) -> bool {
        self.close > self.open
    }

    pub fn range(&self) -> Decimal {
        self.high - self.low
    }
}

/// One point of the open interest history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenInterestPoint {
    pub timestamp: DateTime<Utc>,
    /// Open interest in contracts
    pub open_interest: Decimal,
    /// Open interest in quote asset
    pub open_interest_value: Decimal,
}

/// Open interest history for one instrument.
///
/// `Unavailable` is a distinct outcome from an empty series: the upstream
/// publishes no history for this instrument.
#[derive(Debug, Clone, PartialEq)]
pub enum OpenInterest {
    Available(Vec<OpenInterestPoint>),
    Unavailable,
}

/// Errors from the exchange REST API
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExchangeError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("server error: HTTP {status}")]
    Server { status: u16 },

    #[error("request rejected: HTTP {status} - {body}")]
    Client { status: u16, body: String },

    #[error("malformed response: {0}")]
    Decode(String),
}

impl ExchangeError {
    /// Timeouts, connection drops, rate-limit rejections and 5xx are transient
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExchangeError::Timeout(_)
                | ExchangeError::Connection(_)
                | ExchangeError::RateLimited { .. }
                | ExchangeError::Server { .. }
        )
    }

    /// Server supplied wait hint, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ExchangeError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(e: reqwest::Error) -> Self {
        // request URLs can carry credentials (the Telegram bot token)
        let e = e.without_url();
        if e.is_timeout() {
            ExchangeError::Timeout(e.to_string())
        } else if e.is_decode() {
            ExchangeError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            if status.is_server_error() {
                ExchangeError::Server {
                    status: status.as_u16(),
                }
            } else {
                ExchangeError::Client {
                    status: status.as_u16(),
                    body: e.to_string(),
                }
            }
        } else {
            ExchangeError::Connection(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn candle(open: Decimal, close: Decimal) -> Candle {
        Candle {
            open_time: Utc::now(),
            close_time: Utc::now(),
            open,
            high: dec!(110),
            low: dec!(90),
            close,
            volume: dec!(5),
            quote_volume: dec!(500),
            trades: 10,
            closed: true,
        }
    }

    #[test]
    fn test_volume_basis() {
        let c = candle(dec!(100), dec!(105));
        assert_eq!(c.volume_in(VolumeBasis::Quote), dec!(500));
        assert_eq!(c.volume_in(VolumeBasis::Base), dec!(5));
    }

    #[test]
    fn test_green_is_strict() {
        assert!(candle(dec!(100), dec!(105)).is_green());
        assert!(!candle(dec!(100), dec!(100)).is_green());
        assert!(!candle(dec!(100), dec!(95)).is_green());
    }

    #[test]
    fn test_error_classification() {
        assert!(ExchangeError::Timeout("t".into()).is_retryable());
        assert!(ExchangeError::Connection("c".into()).is_retryable());
        assert!(ExchangeError::Server { status: 503 }.is_retryable());
        assert!(ExchangeError::RateLimited { retry_after: None }.is_retryable());
        assert!(!ExchangeError::Decode("bad".into()).is_retryable());
        assert!(!ExchangeError::Client {
            status: 400,
            body: "Invalid symbol".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_retry_after_hint() {
        let err = ExchangeError::RateLimited {
            retry_after: Some(Duration::from_secs(7)),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
        assert_eq!(ExchangeError::Server { status: 500 }.retry_after(), None);
    }
}
