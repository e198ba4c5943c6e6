//! Market capitalization filter
//!
//! Caches a ranked capitalization dataset and decides which instruments are
//! small enough to be worth scanning.

mod coingecko;
mod filter;

pub use coingecko::{CoinGeckoSource, COINGECKO_API_URL};
pub use filter::MarketCapFilter;

use crate::exchange::ExchangeError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Capitalization of one asset in the reference dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapRecord {
    /// Normalized asset key (upper-case ticker)
    pub key: String,
    pub market_cap: Decimal,
    pub as_of: DateTime<Utc>,
}

/// Outcome of the capitalization check for one instrument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    /// Scan it; `None` when the asset is absent from the dataset
    Included { market_cap: Option<Decimal> },
    /// Skip it
    Excluded { market_cap: Option<Decimal> },
}

impl Eligibility {
    pub fn is_included(&self) -> bool {
        matches!(self, Eligibility::Included { .. })
    }

    pub fn market_cap(&self) -> Option<Decimal> {
        match self {
            Eligibility::Included { market_cap } | Eligibility::Excluded { market_cap } => {
                *market_cap
            }
        }
    }
}

/// Errors while refreshing the dataset
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MarketCapError {
    #[error("market cap request failed on page {page}: {source}")]
    Request {
        page: u32,
        #[source]
        source: ExchangeError,
    },

    #[error("market cap source returned no records")]
    EmptyDataset,
}

/// Paginated, ranked capitalization dataset
#[async_trait]
pub trait CapSource: Send + Sync {
    /// One page (1-based). An empty page marks the end of the dataset.
    async fn fetch_page(&self, page: u32, per_page: u32) -> Result<Vec<CapRecord>, MarketCapError>;
}

/// Map an exchange base asset onto the dataset key.
///
/// The exchange lists low-priced tokens in multiplied units (`1000PEPE`,
/// `1MBABYDOGE`); the dataset names the underlying token. The longest
/// matching prefix is stripped as long as something remains.
pub fn normalize_asset(base_asset: &str) -> String {
    const PREFIXES: [&str; 5] = ["1000000", "100000", "10000", "1000", "1M"];

    let upper = base_asset.trim().to_uppercase();
    for prefix in PREFIXES {
        if let Some(rest) = upper.strip_prefix(prefix) {
            if !rest.is_empty() {
                return rest.to_string();
            }
        }
    }
    upper
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_normalize_multiplier_prefixes() {
        assert_eq!(normalize_asset("1000PEPE"), "PEPE");
        assert_eq!(normalize_asset("10000LADYS"), "LADYS");
        assert_eq!(normalize_asset("1000000MOG"), "MOG");
        assert_eq!(normalize_asset("1MBABYDOGE"), "BABYDOGE");
    }

    #[test]
    fn test_normalize_plain_assets() {
        assert_eq!(normalize_asset("eth"), "ETH");
        assert_eq!(normalize_asset("BTC"), "BTC");
        // nothing left after the prefix, keep as is
        assert_eq!(normalize_asset("1000"), "1000");
        assert_eq!(normalize_asset("1INCH"), "1INCH");
    }

    #[test]
    fn test_normalize_is_deterministic() {
        for asset in ["1000PEPE", "SOL", "1MBABYDOGE", ""] {
            assert_eq!(normalize_asset(asset), normalize_asset(asset));
        }
    }

    #[test]
    fn test_eligibility_accessors() {
        let included = Eligibility::Included {
            market_cap: Some(dec!(5)),
        };
        let excluded = Eligibility::Excluded { market_cap: None };
        assert!(included.is_included());
        assert!(!excluded.is_included());
        assert_eq!(included.market_cap(), Some(dec!(5)));
        assert_eq!(excluded.market_cap(), None);
    }
}
