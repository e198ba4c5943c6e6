//! Binance USDT-M futures REST client
//!
//! Four read-only endpoints, each routed through the shared [`RateGovernor`]
//! and the [`RetryPolicy`]. The universe listing is cached for a short TTL so
//! repeated calls inside one cycle do not spend budget.

use super::retry::decode_response;
use super::{
    Candle, ExchangeApi, ExchangeError, Instrument, OpenInterest, OpenInterestPoint, RateGovernor,
    RetryPolicy,
};
use crate::config::{ExchangeConfig, Timeframe};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Binance USDT-M futures base URL
pub const BINANCE_FAPI_URL: &str = "https://fapi.binance.com";

const EXCHANGE_INFO_PATH: &str = "/fapi/v1/exchangeInfo";
const PREMIUM_INDEX_PATH: &str = "/fapi/v1/premiumIndex";
const KLINES_PATH: &str = "/fapi/v1/klines";
const OPEN_INTEREST_HIST_PATH: &str = "/futures/data/openInterestHist";

/// Request weight of the exchange info endpoint
pub const EXCHANGE_INFO_WEIGHT: u32 = 1;
/// Request weight of the all-symbol mark price endpoint
pub const MARK_PRICES_WEIGHT: u32 = 10;
/// Request weight of the open interest history endpoint
pub const OPEN_INTEREST_WEIGHT: u32 = 1;

/// Request weight of a klines call, tiered by `limit`
pub fn klines_weight(limit: usize) -> u32 {
    match limit {
        0..=99 => 1,
        100..=499 => 2,
        500..=1000 => 5,
        _ => 10,
    }
}

/// Universe listing with the instant it was fetched
struct UniverseSnapshot {
    fetched_at: Instant,
    instruments: Vec<Instrument>,
}

/// Client for the Binance futures public market-data API
pub struct BinanceClient {
    config: ExchangeConfig,
    client: Client,
    governor: Arc<RateGovernor>,
    retry: RetryPolicy,
    universe: Mutex<Option<UniverseSnapshot>>,
}

impl BinanceClient {
    /// Create a new client sharing the given governor
    pub fn new(
        config: ExchangeConfig,
        governor: Arc<RateGovernor>,
        retry: RetryPolicy,
    ) -> Result<Self, ExchangeError> {
        let mut headers = HeaderMap::new();
        if let Some(key) = config.api_key.as_deref().filter(|k| !k.is_empty()) {
            let value = HeaderValue::from_str(key)
                .map_err(|e| ExchangeError::Connection(format!("invalid API key header: {e}")))?;
            headers.insert("X-MBX-APIKEY", value);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("perp-scanner/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            config,
            client,
            governor,
            retry,
            universe: Mutex::new(None),
        })
    }

    fn universe_ttl(&self) -> Duration {
        Duration::from_secs(self.config.universe_ttl_secs)
    }

    /// GET `path`, spending `weight` from the governor on every attempt
    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        path: &str,
        query: &[(&str, String)],
        weight: u32,
    ) -> Result<T, ExchangeError> {
        let url = format!("{}{}", self.config.base_url, path);

        self.retry
            .run(endpoint, |_attempt| {
                let url = &url;
                async move {
                    self.governor.acquire(weight).await;
                    let response = self.client.get(url).query(query).send().await?;
                    decode_response(response).await
                }
            })
            .await
    }
}

#[async_trait]
impl ExchangeApi for BinanceClient {
    async fn list_universe(&self) -> Result<Vec<Instrument>, ExchangeError> {
        let mut cache = self.universe.lock().await;
        if let Some(snapshot) = cache.as_ref() {
            if snapshot.fetched_at.elapsed() < self.universe_ttl() {
                return Ok(snapshot.instruments.clone());
            }
        }

        let info: RawExchangeInfo = self
            .get_json("exchange_info", EXCHANGE_INFO_PATH, &[], EXCHANGE_INFO_WEIGHT)
            .await?;
        let instruments = filter_universe(info, &self.config.quote_asset, &self.config.contract_type);

        tracing::info!(
            count = instruments.len(),
            quote_asset = %self.config.quote_asset,
            contract_type = %self.config.contract_type,
            "Loaded trading universe"
        );

        *cache = Some(UniverseSnapshot {
            fetched_at: Instant::now(),
            instruments: instruments.clone(),
        });
        Ok(instruments)
    }

    async fn fetch_mark_prices(&self) -> Result<HashMap<String, Decimal>, ExchangeError> {
        let raw: Vec<RawPremiumIndex> = self
            .get_json("mark_prices", PREMIUM_INDEX_PATH, &[], MARK_PRICES_WEIGHT)
            .await?;

        Ok(raw
            .into_iter()
            .filter_map(|p| {
                let price = Decimal::from_str(&p.mark_price).ok()?;
                (price > Decimal::ZERO).then_some((p.symbol, price))
            })
            .collect())
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        // two extra rows so dropping the forming candle still leaves `count`
        let limit = count + 2;
        let query = [
            ("symbol", symbol.to_string()),
            ("interval", timeframe.as_str().to_string()),
            ("limit", limit.to_string()),
        ];
        let raw: Vec<RawKline> = self
            .get_json("klines", KLINES_PATH, &query, klines_weight(limit))
            .await?;

        let now = Utc::now();
        let mut candles = raw
            .into_iter()
            .map(|k| k.into_candle(now))
            .collect::<Result<Vec<_>, _>>()?;
        candles.retain(|c| c.closed);

        let excess = candles.len().saturating_sub(count);
        candles.drain(..excess);
        Ok(candles)
    }

    async fn fetch_open_interest_history(
        &self,
        symbol: &str,
        period: Timeframe,
        limit: usize,
    ) -> Result<OpenInterest, ExchangeError> {
        let query = [
            ("symbol", symbol.to_string()),
            ("period", period.as_str().to_string()),
            ("limit", limit.to_string()),
        ];
        let raw: Vec<RawOpenInterest> = self
            .get_json(
                "open_interest_hist",
                OPEN_INTEREST_HIST_PATH,
                &query,
                OPEN_INTEREST_WEIGHT,
            )
            .await?;

        if raw.is_empty() {
            return Ok(OpenInterest::Unavailable);
        }

        let mut points = raw
            .into_iter()
            .map(RawOpenInterest::into_point)
            .collect::<Result<Vec<_>, _>>()?;
        points.sort_by_key(|p| p.timestamp);
        Ok(OpenInterest::Available(points))
    }
}

fn filter_universe(info: RawExchangeInfo, quote_asset: &str, contract_type: &str) -> Vec<Instrument> {
    let mut instruments: Vec<Instrument> = info
        .symbols
        .into_iter()
        .filter(|s| {
            s.quote_asset == quote_asset && s.contract_type == contract_type && s.status == "TRADING"
        })
        .map(|s| Instrument::new(s.symbol, s.base_asset))
        .collect();
    instruments.sort();
    instruments.dedup();
    instruments
}

fn parse_decimal(field: &'static str, value: &str) -> Result<Decimal, ExchangeError> {
    Decimal::from_str(value)
        .map_err(|e| ExchangeError::Decode(format!("{field} {value:?}: {e}")))
}

fn parse_millis(field: &'static str, millis: i64) -> Result<DateTime<Utc>, ExchangeError> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| ExchangeError::Decode(format!("{field} out of range: {millis}")))
}

/// Exchange info response (only the fields we filter on)
#[derive(Debug, Deserialize)]
struct RawExchangeInfo {
    symbols: Vec<RawSymbol>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSymbol {
    symbol: String,
    base_asset: String,
    quote_asset: String,
    #[serde(default)]
    contract_type: String,
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPremiumIndex {
    symbol: String,
    mark_price: String,
}

/// Kline row: `[openTime, open, high, low, close, volume, closeTime,
/// quoteVolume, trades, takerBuyBase, takerBuyQuote, ignore]`
#[derive(Debug, Deserialize)]
struct RawKline(
    i64,
    String,
    String,
    String,
    String,
    String,
    i64,
    String,
    u64,
    IgnoredAny,
    IgnoredAny,
    IgnoredAny,
);

impl RawKline {
    fn into_candle(self, now: DateTime<Utc>) -> Result<Candle, ExchangeError> {
        let close_time = parse_millis("close_time", self.6)?;
        Ok(Candle {
            open_time: parse_millis("open_time", self.0)?,
            close_time,
            open: parse_decimal("open", &self.1)?,
            high: parse_decimal("high", &self.2)?,
            low: parse_decimal("low", &self.3)?,
            close: parse_decimal("close", &self.4)?,
            volume: parse_decimal("volume", &self.5)?,
            quote_volume: parse_decimal("quote_volume", &self.7)?,
            trades: self.8,
            closed: close_time <= now,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOpenInterest {
    sum_open_interest: String,
    sum_open_interest_value: String,
    timestamp: i64,
}

impl RawOpenInterest {
    fn into_point(self) -> Result<OpenInterestPoint, ExchangeError> {
        Ok(OpenInterestPoint {
            timestamp: parse_millis("timestamp", self.timestamp)?,
            open_interest: parse_decimal("sumOpenInterest", &self.sum_open_interest)?,
            open_interest_value: parse_decimal(
                "sumOpenInterestValue",
                &self.sum_open_interest_value,
            )?,
        })
    }
}
