//! TTL-cached capitalization filter

use super::{normalize_asset, CapRecord, CapSource, Eligibility, MarketCapError};
use crate::config::MarketCapConfig;
use crate::exchange::Instrument;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::{sleep, Instant};

struct CapSnapshot {
    caps: HashMap<String, CapRecord>,
    fetched_at: Instant,
    /// False when the page walk broke off; such a snapshot is refreshed
    /// again once the failure back-off has passed
    complete: bool,
}

/// Records gathered by one page walk, and the error that cut it short
struct PageWalk {
    caps: HashMap<String, CapRecord>,
    error: Option<MarketCapError>,
}

#[derive(Default)]
struct FilterState {
    snapshot: Option<CapSnapshot>,
    last_failure: Option<Instant>,
}

/// Decides which instruments are small enough to scan.
///
/// Lookups are served from the cached snapshot. A failed refresh keeps the
/// previous snapshot, merged with any pages that did load before the
/// failure; with no snapshot at all every instrument falls under the
/// unknown-asset policy.
pub struct MarketCapFilter {
    config: MarketCapConfig,
    source: Box<dyn CapSource>,
    state: RwLock<FilterState>,
}

impl MarketCapFilter {
    pub fn new(config: MarketCapConfig, source: Box<dyn CapSource>) -> Self {
        Self {
            config,
            source,
            state: RwLock::new(FilterState::default()),
        }
    }

    /// Refresh when the snapshot is missing or older than the TTL, unless a
    /// refresh failed within the failure back-off.
    pub async fn ensure_fresh(&self) {
        if !self.config.enabled || !self.needs_refresh().await {
            return;
        }
        // failures are logged inside refresh
        let _ = self.refresh().await;
    }

    async fn needs_refresh(&self) -> bool {
        let state = self.state.read().await;
        if let Some(snapshot) = &state.snapshot {
            if snapshot.complete && snapshot.fetched_at.elapsed() < self.config.ttl() {
                return false;
            }
        }
        match state.last_failure {
            Some(failed_at) => failed_at.elapsed() >= self.config.failure_retry(),
            None => true,
        }
    }

    /// Fetch the dataset and replace the snapshot. Returns the record count.
    ///
    /// When the walk breaks off after some pages loaded, those records are
    /// merged over the previous snapshot and the error is still returned.
    pub async fn refresh(&self) -> Result<usize, MarketCapError> {
        tracing::info!("Refreshing market cap cache");
        let started = Instant::now();

        let walk = self.fetch_all().await;

        let mut state = self.state.write().await;
        match walk.error {
            None if walk.caps.is_empty() => {
                self.refresh_failed(&mut state, MarketCapError::EmptyDataset)
            }
            None => {
                let count = walk.caps.len();
                state.snapshot = Some(CapSnapshot {
                    caps: walk.caps,
                    fetched_at: Instant::now(),
                    complete: true,
                });
                state.last_failure = None;
                tracing::info!(
                    coins = count,
                    elapsed_secs = started.elapsed().as_secs(),
                    "Market cap cache updated"
                );
                Ok(count)
            }
            Some(e) if walk.caps.is_empty() => self.refresh_failed(&mut state, e),
            Some(e) => {
                let loaded = walk.caps.len();
                let mut caps = state.snapshot.take().map(|s| s.caps).unwrap_or_default();
                caps.extend(walk.caps);
                tracing::warn!(
                    error = %e,
                    loaded,
                    coins = caps.len(),
                    "Market cap refresh incomplete, keeping the pages that loaded"
                );
                state.snapshot = Some(CapSnapshot {
                    caps,
                    fetched_at: Instant::now(),
                    complete: false,
                });
                state.last_failure = Some(Instant::now());
                Err(e)
            }
        }
    }

    fn refresh_failed(
        &self,
        state: &mut FilterState,
        e: MarketCapError,
    ) -> Result<usize, MarketCapError> {
        state.last_failure = Some(Instant::now());
        match &state.snapshot {
            Some(snapshot) => tracing::warn!(
                error = %e,
                coins = snapshot.caps.len(),
                age_mins = snapshot.fetched_at.elapsed().as_secs() / 60,
                "Market cap refresh failed, keeping previous cache"
            ),
            None => tracing::error!(
                error = %e,
                include_unknown = self.config.include_unknown,
                "Market cap refresh failed with no previous cache, treating all assets as unknown"
            ),
        }
        Err(e)
    }

    /// Walk the ranked pages.
    ///
    /// Stops on an empty page, at `max_pages`, or early once the
    /// ceiling has been crossed. The early stop only happens when every
    /// record seen so far was in descending order and unknown assets are
    /// included anyway; otherwise a mid-ranked asset could be missed.
    async fn fetch_all(&self) -> PageWalk {
        let per_page = self.config.per_page.max(1);
        let page_delay = Duration::from_millis(self.config.page_delay_ms);

        let mut caps: HashMap<String, CapRecord> = HashMap::new();
        let mut previous: Option<Decimal> = None;
        let mut descending = true;

        for page in 1..=self.config.max_pages {
            if page > 1 && !page_delay.is_zero() {
                sleep(page_delay).await;
            }

            let records = match self.source.fetch_page(page, per_page).await {
                Ok(records) => records,
                Err(e) => {
                    return PageWalk {
                        caps,
                        error: Some(e),
                    }
                }
            };
            if records.is_empty() {
                break;
            }

            let mut page_min: Option<Decimal> = None;
            for record in records {
                if previous.is_some_and(|prev| record.market_cap > prev) {
                    descending = false;
                }
                previous = Some(record.market_cap);
                page_min = Some(page_min.map_or(record.market_cap, |m| m.min(record.market_cap)));

                // tickers collide; keep the largest
                match caps.get(&record.key) {
                    Some(existing) if existing.market_cap >= record.market_cap => {}
                    _ => {
                        caps.insert(record.key.clone(), record);
                    }
                }
            }

            tracing::debug!(page, coins = caps.len(), "Market cap page loaded");

            let below_ceiling = page_min.is_some_and(|m| m <= self.config.max_usd);
            if self.config.include_unknown && descending && below_ceiling {
                tracing::debug!(page, "Ceiling crossed, remaining pages skipped");
                break;
            }
        }

        if !descending {
            tracing::warn!("Market cap dataset was not sorted by capitalization");
        }

        PageWalk { caps, error: None }
    }

    /// Capitalization check for one instrument
    pub async fn eligibility(&self, instrument: &Instrument) -> Eligibility {
        if !self.config.enabled {
            return Eligibility::Included { market_cap: None };
        }

        let key = normalize_asset(&instrument.base_asset);
        let state = self.state.read().await;
        let cap = state
            .snapshot
            .as_ref()
            .and_then(|s| s.caps.get(&key))
            .map(|r| r.market_cap);

        match cap {
            Some(market_cap) if market_cap > self.config.max_usd => Eligibility::Excluded {
                market_cap: Some(market_cap),
            },
            Some(market_cap) => Eligibility::Included {
                market_cap: Some(market_cap),
            },
            None if self.config.include_unknown => Eligibility::Included { market_cap: None },
            None => Eligibility::Excluded { market_cap: None },
        }
    }

    /// Number of assets in the current snapshot
    pub async fn cached_count(&self) -> usize {
        self.state
            .read()
            .await
            .snapshot
            .as_ref()
            .map_or(0, |s| s.caps.len())
    }
}
