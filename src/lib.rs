//! perp-scanner: volume-spike scanner for Binance USDT-M perpetual futures
//!
//! This library provides the core components for:
//! - Rate-governed, retrying access to the futures REST API
//! - Market capitalization filtering with a cached reference dataset
//! - Candle and open interest based spike detection
//! - Per-instrument alert cooldowns
//! - Telegram alert delivery
//! - Follow-up tracking of fired signals
//! - The periodic scan loop tying them together
//! - Full observability stack

pub mod cli;
pub mod config;
pub mod cooldown;
pub mod exchange;
pub mod market_cap;
pub mod notify;
pub mod scanner;
pub mod signal;
pub mod telemetry;
pub mod tracker;
