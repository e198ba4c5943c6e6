//! Exchange access
//!
//! Rate-governed, retrying REST client for the futures venue

mod binance;
mod governor;
mod retry;
mod types;

pub use binance::{
    klines_weight, BinanceClient, BINANCE_FAPI_URL, EXCHANGE_INFO_WEIGHT, MARK_PRICES_WEIGHT,
    OPEN_INTEREST_WEIGHT,
};
pub use governor::{CostBudget, RateGovernor};
pub use retry::RetryPolicy;
pub(crate) use retry::decode_response;
pub use types::{Candle, ExchangeError, Instrument, OpenInterest, OpenInterestPoint};

use crate::config::Timeframe;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Read operations the scanner needs from the exchange
#[async_trait]
pub trait ExchangeApi: Send + Sync {
    /// Tradable instruments for the configured quote asset and contract type
    async fn list_universe(&self) -> Result<Vec<Instrument>, ExchangeError>;

    /// Current mark price of every instrument, in one call
    async fn fetch_mark_prices(&self) -> Result<HashMap<String, Decimal>, ExchangeError>;

    /// The newest `count` closed candles, oldest first
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<Candle>, ExchangeError>;

    /// Up to `limit` open interest points, oldest first
    async fn fetch_open_interest_history(
        &self,
        symbol: &str,
        period: Timeframe,
        limit: usize,
    ) -> Result<OpenInterest, ExchangeError>;
}
