//! CoinGecko `/coins/markets` source

use super::{CapRecord, CapSource, MarketCapError};
use crate::config::MarketCapConfig;
use crate::exchange::{decode_response, ExchangeError, RetryPolicy};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;

/// CoinGecko public API base URL
pub const COINGECKO_API_URL: &str = "https://api.coingecko.com/api/v3";

/// Fetches coins ranked by capitalization, descending
pub struct CoinGeckoSource {
    base_url: String,
    client: Client,
    retry: RetryPolicy,
}

impl CoinGeckoSource {
    pub fn new(config: &MarketCapConfig, retry: RetryPolicy) -> Result<Self, ExchangeError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("perp-scanner/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
            retry,
        })
    }
}

#[async_trait]
impl CapSource for CoinGeckoSource {
    async fn fetch_page(&self, page: u32, per_page: u32) -> Result<Vec<CapRecord>, MarketCapError> {
        let url = format!("{}/coins/markets", self.base_url);
        let query = [
            ("vs_currency", "usd".to_string()),
            ("order", "market_cap_desc".to_string()),
            ("per_page", per_page.to_string()),
            ("page", page.to_string()),
            ("sparkline", "false".to_string()),
        ];

        tracing::debug!(page, per_page, "Fetching market cap page");

        let coins: Vec<RawCoin> = self
            .retry
            .run("coingecko_markets", |_attempt| {
                let url = &url;
                let query = &query;
                async move {
                    let response = self.client.get(url).query(query).send().await?;
                    decode_response(response).await
                }
            })
            .await
            .map_err(|source| MarketCapError::Request { page, source })?;

        let fetched_at = Utc::now();
        Ok(coins
            .into_iter()
            .filter_map(|coin| {
                let market_cap = coin.market_cap?;
                if coin.symbol.is_empty() {
                    return None;
                }
                Some(CapRecord {
                    key: coin.symbol.to_uppercase(),
                    market_cap,
                    as_of: coin.last_updated.unwrap_or(fetched_at),
                })
            })
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct RawCoin {
    #[serde(default)]
    symbol: String,
    #[serde(default)]
    market_cap: Option<Decimal>,
    #[serde(default)]
    last_updated: Option<DateTime<Utc>>,
}
