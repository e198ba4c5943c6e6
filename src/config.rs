//! Configuration types for perp-scanner
//!
//! The whole file is read once at startup into an immutable [`Config`]
//! snapshot which is shared behind an `Arc` with every component.

use crate::exchange::{klines_weight, BINANCE_FAPI_URL, MARK_PRICES_WEIGHT};
use crate::market_cap::COINGECKO_API_URL;
use crate::notify::TELEGRAM_API_URL;
use crate::telemetry::LogFormat;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Longest accepted cooldown (one year)
pub const MAX_COOLDOWN_MINUTES: u64 = 365 * 24 * 60;

/// Longest accepted scan interval or rate window (one week)
pub const MAX_INTERVAL_SECS: u64 = 7 * 24 * 60 * 60;

/// Configuration errors that must stop the scanner from starting
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting [{section}] {key}")]
    MissingCredential {
        section: &'static str,
        key: &'static str,
    },

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("unknown timeframe: {0}")]
    UnknownTimeframe(String),

    #[error("open interest history is not published for timeframe {0}")]
    UnsupportedOpenInterestPeriod(Timeframe),

    #[error("rate_limit.max_cost {max_cost} is below the cost of a single request ({required})")]
    BudgetTooSmall { max_cost: u32, required: u32 },
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub breakout: BreakoutConfig,
    #[serde(default)]
    pub open_interest: OpenInterestConfig,
    #[serde(default)]
    pub candle: CandleConfig,
    #[serde(default)]
    pub market_cap: MarketCapConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Exchange REST endpoint configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub base_url: String,
    /// Optional API key, sent as `X-MBX-APIKEY`
    pub api_key: Option<String>,
    /// Quote asset of the scanned contracts (e.g. "USDT")
    pub quote_asset: String,
    /// Contract type of the scanned contracts (e.g. "PERPETUAL")
    pub contract_type: String,
    pub request_timeout_secs: u64,
    /// How long a universe listing is reused without touching the API
    pub universe_ttl_secs: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            base_url: BINANCE_FAPI_URL.to_string(),
            api_key: None,
            quote_asset: "USDT".to_string(),
            contract_type: "PERPETUAL".to_string(),
            request_timeout_secs: 30,
            universe_ttl_secs: 300,
        }
    }
}

/// Request-cost budget and retry schedule
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Maximum request cost spent per window
    pub max_cost: u32,
    pub window_secs: u64,
    /// Total attempts per request, including the first one
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            // 2400/min is the documented limit, keep headroom
            max_cost: 2000,
            window_secs: 60,
            max_attempts: 3,
            initial_backoff_ms: 2_000,
            max_backoff_ms: 30_000,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs.min(MAX_INTERVAL_SECS))
    }
}

/// Which volume column the averages are computed on
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VolumeBasis {
    /// Quote-asset volume (USDT traded)
    #[default]
    Quote,
    /// Base-asset volume (contracts traded)
    Base,
}

/// Core scan configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub timeframe: Timeframe,
    pub scan_interval_secs: u64,
    pub volume_recent_candles: usize,
    pub volume_baseline_candles: usize,
    pub volume_multiplier: Decimal,
    pub volume_basis: VolumeBasis,
    pub cooldown_minutes: u64,
    pub excluded_symbols: HashSet<String>,
    /// Instruments evaluated concurrently within one cycle
    pub workers: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            timeframe: Timeframe::M15,
            scan_interval_secs: 300,
            volume_recent_candles: 1,
            volume_baseline_candles: 20,
            volume_multiplier: dec!(3.0),
            volume_basis: VolumeBasis::Quote,
            cooldown_minutes: 12 * 60,
            excluded_symbols: HashSet::new(),
            workers: 4,
        }
    }
}

impl ScannerConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs.min(MAX_INTERVAL_SECS))
    }

    /// Cooldown as a signed duration, clamped to [`MAX_COOLDOWN_MINUTES`]
    pub fn cooldown(&self) -> chrono::Duration {
        let minutes = self.cooldown_minutes.min(MAX_COOLDOWN_MINUTES) as i64;
        chrono::Duration::try_minutes(minutes).unwrap_or_else(|| chrono::Duration::days(365))
    }
}

/// Breakout confirmation
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakoutConfig {
    pub enabled: bool,
    pub lookback: usize,
}

impl Default for BreakoutConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            lookback: 20,
        }
    }
}

/// Open interest surge filter
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OpenInterestConfig {
    pub enabled: bool,
    /// Baseline periods preceding the current value
    pub periods: usize,
    pub min_increase_pct: Decimal,
}

impl Default for OpenInterestConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            periods: 10,
            min_increase_pct: dec!(5),
        }
    }
}

/// Candle quality filters and trend context
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CandleConfig {
    pub bullish_required: bool,
    /// Maximum upper wick as % of the candle range (0 = off)
    pub max_upper_wick_pct: Decimal,
    /// Minimum body as % of the candle range (0 = off)
    pub min_body_pct: Decimal,
    /// Candles summarised in the trend context of an alert
    pub trend_candles: usize,
}

impl Default for CandleConfig {
    fn default() -> Self {
        Self {
            bullish_required: false,
            max_upper_wick_pct: Decimal::ZERO,
            min_body_pct: Decimal::ZERO,
            trend_candles: 5,
        }
    }
}

/// Market capitalization filter backed by CoinGecko
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MarketCapConfig {
    pub enabled: bool,
    /// Instruments above this capitalization are skipped
    pub max_usd: Decimal,
    /// Whether instruments missing from the dataset are scanned
    pub include_unknown: bool,
    pub cache_minutes: u64,
    /// Minimum pause before retrying a failed refresh
    pub failure_retry_minutes: u64,
    pub base_url: String,
    pub per_page: u32,
    pub max_pages: u32,
    pub page_delay_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for MarketCapConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_usd: dec!(100000000),
            include_unknown: true,
            cache_minutes: 60,
            failure_retry_minutes: 5,
            base_url: COINGECKO_API_URL.to_string(),
            per_page: 250,
            max_pages: 12,
            page_delay_ms: 6_000,
            request_timeout_secs: 30,
        }
    }
}

impl MarketCapConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.cache_minutes.saturating_mul(60))
    }

    pub fn failure_retry(&self) -> Duration {
        Duration::from_secs(self.failure_retry_minutes.saturating_mul(60))
    }
}

/// Follow-up tracking of fired signals
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub enabled: bool,
    /// Signals older than this are dropped with a final summary
    pub max_age_hours: u64,
    /// Gains over the entry price (%) that each trigger one update
    pub take_profit_targets: Vec<Decimal>,
    pub reversal_enabled: bool,
    /// Peak gain (%) a signal must reach before reversals are watched
    pub min_reversal_peak_pct: Decimal,
    /// Retracement from the peak (percentage points) that triggers a warning
    pub reversal_drop_pct: Decimal,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_age_hours: 72,
            take_profit_targets: vec![dec!(3), dec!(5), dec!(10), dec!(15), dec!(20)],
            reversal_enabled: true,
            min_reversal_peak_pct: dec!(3),
            reversal_drop_pct: dec!(5),
        }
    }
}

impl TrackerConfig {
    pub fn max_age(&self) -> chrono::Duration {
        let hours = self.max_age_hours.min(MAX_COOLDOWN_MINUTES / 60) as i64;
        chrono::Duration::try_hours(hours).unwrap_or_else(|| chrono::Duration::days(365))
    }
}

/// Telegram bot credentials
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
    pub base_url: String,
    pub max_attempts: u32,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            chat_id: String::new(),
            base_url: TELEGRAM_API_URL.to_string(),
            max_attempts: 3,
        }
    }
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub log_format: LogFormat,
    pub metrics_port: Option<u16>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_port: None,
        }
    }
}

/// Candle interval supported by the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub enum Timeframe {
    M1,
    M3,
    M5,
    #[default]
    M15,
    M30,
    H1,
    H2,
    H4,
    H6,
    H8,
    H12,
    D1,
    D3,
    W1,
    Mo1,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M3 => "3m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H2 => "2h",
            Timeframe::H4 => "4h",
            Timeframe::H6 => "6h",
            Timeframe::H8 => "8h",
            Timeframe::H12 => "12h",
            Timeframe::D1 => "1d",
            Timeframe::D3 => "3d",
            Timeframe::W1 => "1w",
            Timeframe::Mo1 => "1M",
        }
    }

    /// Whether the open interest history endpoint accepts this period
    pub fn is_open_interest_period(&self) -> bool {
        matches!(
            self,
            Timeframe::M5
                | Timeframe::M15
                | Timeframe::M30
                | Timeframe::H1
                | Timeframe::H2
                | Timeframe::H4
                | Timeframe::H6
                | Timeframe::H12
                | Timeframe::D1
        )
    }
}

impl FromStr for Timeframe {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tf = match s {
            "1m" => Timeframe::M1,
            "3m" => Timeframe::M3,
            "5m" => Timeframe::M5,
            "15m" => Timeframe::M15,
            "30m" => Timeframe::M30,
            "1h" => Timeframe::H1,
            "2h" => Timeframe::H2,
            "4h" => Timeframe::H4,
            "6h" => Timeframe::H6,
            "8h" => Timeframe::H8,
            "12h" => Timeframe::H12,
            "1d" => Timeframe::D1,
            "3d" => Timeframe::D3,
            "1w" => Timeframe::W1,
            "1M" => Timeframe::Mo1,
            other => return Err(ConfigError::UnknownTimeframe(other.to_string())),
        };
        Ok(tf)
    }
}

impl TryFrom<String> for Timeframe {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Timeframe> for String {
    fn from(tf: Timeframe) -> Self {
        tf.as_str().to_string()
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Closed candles needed per instrument to run every enabled condition
    pub fn candles_needed(&self) -> usize {
        let volume = self.scanner.volume_recent_candles + self.scanner.volume_baseline_candles;
        let breakout = if self.breakout.enabled {
            self.breakout.lookback + 1
        } else {
            0
        };
        volume.max(breakout).max(self.candle.trend_candles)
    }

    /// Reject settings the scanner cannot run with.
    ///
    /// Telegram credentials are only required when alerts are actually sent.
    pub fn validate(&self, dry_run: bool) -> Result<(), ConfigError> {
        if !dry_run {
            if is_placeholder(&self.telegram.bot_token) {
                return Err(ConfigError::MissingCredential {
                    section: "telegram",
                    key: "bot_token",
                });
            }
            if is_placeholder(&self.telegram.chat_id) {
                return Err(ConfigError::MissingCredential {
                    section: "telegram",
                    key: "chat_id",
                });
            }
        }

        let sc = &self.scanner;
        if sc.volume_recent_candles == 0 {
            return Err(invalid("scanner.volume_recent_candles", "must be at least 1"));
        }
        if sc.volume_baseline_candles == 0 {
            return Err(invalid("scanner.volume_baseline_candles", "must be at least 1"));
        }
        if sc.volume_multiplier <= Decimal::ZERO {
            return Err(invalid("scanner.volume_multiplier", "must be positive"));
        }
        if sc.scan_interval_secs == 0 || sc.scan_interval_secs > MAX_INTERVAL_SECS {
            return Err(invalid(
                "scanner.scan_interval_secs",
                "must be between 1 second and one week",
            ));
        }
        if sc.cooldown_minutes > MAX_COOLDOWN_MINUTES {
            return Err(invalid("scanner.cooldown_minutes", "must be at most one year"));
        }
        if sc.workers == 0 {
            return Err(invalid("scanner.workers", "must be at least 1"));
        }
        if self.breakout.enabled && self.breakout.lookback == 0 {
            return Err(invalid("breakout.lookback", "must be at least 1"));
        }
        if self.open_interest.enabled {
            if self.open_interest.periods == 0 {
                return Err(invalid("open_interest.periods", "must be at least 1"));
            }
            if !sc.timeframe.is_open_interest_period() {
                return Err(ConfigError::UnsupportedOpenInterestPeriod(sc.timeframe));
            }
        }
        if self.rate_limit.window_secs == 0 || self.rate_limit.window_secs > MAX_INTERVAL_SECS {
            return Err(invalid(
                "rate_limit.window_secs",
                "must be between 1 second and one week",
            ));
        }
        if self.rate_limit.max_attempts == 0 {
            return Err(invalid("rate_limit.max_attempts", "must be at least 1"));
        }
        let tr = &self.tracker;
        if tr.enabled {
            if tr.max_age_hours == 0 || tr.max_age_hours > MAX_COOLDOWN_MINUTES / 60 {
                return Err(invalid(
                    "tracker.max_age_hours",
                    "must be between 1 hour and one year",
                ));
            }
            if tr.take_profit_targets.iter().any(|t| *t <= Decimal::ZERO) {
                return Err(invalid("tracker.take_profit_targets", "must all be positive"));
            }
            if tr.reversal_enabled && tr.reversal_drop_pct <= Decimal::ZERO {
                return Err(invalid("tracker.reversal_drop_pct", "must be positive"));
            }
        }
        if self.market_cap.enabled && self.market_cap.max_pages == 0 {
            return Err(invalid("market_cap.max_pages", "must be at least 1"));
        }

        let required = klines_weight(self.candles_needed() + 2).max(MARK_PRICES_WEIGHT);
        if self.rate_limit.max_cost < required {
            return Err(ConfigError::BudgetTooSmall {
                max_cost: self.rate_limit.max_cost,
                required,
            });
        }

        Ok(())
    }

    /// Effective configuration as TOML with credentials masked
    pub fn redacted_toml(&self) -> anyhow::Result<String> {
        let mut shown = self.clone();
        if !shown.telegram.bot_token.is_empty() {
            shown.telegram.bot_token = "***".to_string();
        }
        if let Some(key) = shown.exchange.api_key.as_mut() {
            *key = "***".to_string();
        }
        Ok(toml::to_string_pretty(&shown)?)
    }
}

fn is_placeholder(value: &str) -> bool {
    value.trim().is_empty() || value.starts_with("YOUR_")
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}
