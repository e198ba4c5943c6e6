//! Cooldown ledger
//!
//! Remembers when each instrument last fired so it cannot fire again until
//! the cooldown has passed. Expiry is computed from the stored timestamp;
//! nothing is scheduled.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

/// Backing map of last fire times
pub trait CooldownStore: Send + Sync {
    fn fired_at(&self, symbol: &str) -> Option<DateTime<Utc>>;

    /// Create or overwrite the entry
    fn set_fired(&self, symbol: &str, at: DateTime<Utc>);

    /// Drop entries fired before `cutoff`, returning how many went
    fn prune(&self, cutoff: DateTime<Utc>) -> usize;

    /// Snapshot of every entry
    fn entries(&self) -> Vec<(String, DateTime<Utc>)>;
}

/// Process-local store, cleared on restart
#[derive(Debug, Default)]
pub struct InMemoryCooldownStore {
    entries: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl InMemoryCooldownStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, DateTime<Utc>>> {
        // entries are plain timestamps, a poisoned map is still consistent
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl CooldownStore for InMemoryCooldownStore {
    fn fired_at(&self, symbol: &str) -> Option<DateTime<Utc>> {
        self.lock().get(symbol).copied()
    }

    fn set_fired(&self, symbol: &str, at: DateTime<Utc>) {
        self.lock().insert(symbol.to_string(), at);
    }

    fn prune(&self, cutoff: DateTime<Utc>) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, fired| *fired >= cutoff);
        before - entries.len()
    }

    fn entries(&self) -> Vec<(String, DateTime<Utc>)> {
        self.lock()
            .iter()
            .map(|(symbol, at)| (symbol.clone(), *at))
            .collect()
    }
}

/// Per-instrument alert suppression
pub struct CooldownLedger {
    cooldown: Duration,
    store: Box<dyn CooldownStore>,
    /// Instruments with an evaluation in flight
    pending: Mutex<HashSet<String>>,
}

impl CooldownLedger {
    pub fn new(cooldown: Duration, store: Box<dyn CooldownStore>) -> Self {
        Self {
            cooldown,
            store,
            pending: Mutex::new(HashSet::new()),
        }
    }

    /// Ledger backed by the in-memory store
    pub fn in_memory(cooldown: Duration) -> Self {
        Self::new(cooldown, Box::new(InMemoryCooldownStore::new()))
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// True iff the instrument fired less than one cooldown ago
    pub fn is_suppressed(&self, symbol: &str, now: DateTime<Utc>) -> bool {
        self.store
            .fired_at(symbol)
            .is_some_and(|fired| now - fired < self.cooldown)
    }

    pub fn record_fire(&self, symbol: &str, now: DateTime<Utc>) {
        self.store.set_fired(symbol, now);
    }

    /// Reserve the instrument for one evaluation.
    ///
    /// Returns `None` when it is suppressed or another evaluation already
    /// holds it. The reservation ends when the claim is dropped; a fire is
    /// only recorded through [`CooldownClaim::commit`].
    pub fn claim(&self, symbol: &str, now: DateTime<Utc>) -> Option<CooldownClaim<'_>> {
        let mut pending = self.lock_pending();
        if pending.contains(symbol) || self.is_suppressed(symbol, now) {
            return None;
        }
        pending.insert(symbol.to_string());

        Some(CooldownClaim {
            ledger: self,
            symbol: symbol.to_string(),
        })
    }

    /// Forget entries whose cooldown has expired
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        self.store.prune(now - self.cooldown)
    }

    /// Instruments currently suppressed
    pub fn active_count(&self, now: DateTime<Utc>) -> usize {
        self.store
            .entries()
            .iter()
            .filter(|(_, fired)| now - *fired < self.cooldown)
            .count()
    }

    fn lock_pending(&self) -> MutexGuard<'_, HashSet<String>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Exclusive right to evaluate and fire one instrument
#[must_use]
pub struct CooldownClaim<'a> {
    ledger: &'a CooldownLedger,
    symbol: String,
}

impl CooldownClaim<'_> {
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Record the fire and release the instrument
    pub fn commit(self, fired_at: DateTime<Utc>) {
        self.ledger.record_fire(&self.symbol, fired_at);
    }
}

impl Drop for CooldownClaim<'_> {
    fn drop(&mut self) {
        self.ledger.lock_pending().remove(&self.symbol);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_never_fired_not_suppressed() {
        let ledger = CooldownLedger::in_memory(Duration::hours(12));
        assert!(!ledger.is_suppressed("BTCUSDT", t0()));
    }

    #[test]
    fn test_suppressed_until_exact_expiry() {
        let cooldown = Duration::hours(12);
        let ledger = CooldownLedger::in_memory(cooldown);
        ledger.record_fire("PEPEUSDT", t0());

        assert!(ledger.is_suppressed("PEPEUSDT", t0()));
        assert!(ledger.is_suppressed("PEPEUSDT", t0() + cooldown - Duration::milliseconds(1)));
        assert!(!ledger.is_suppressed("PEPEUSDT", t0() + cooldown));
    }

    #[test]
    fn test_record_overwrites() {
        let ledger = CooldownLedger::in_memory(Duration::hours(1));
        ledger.record_fire("SOLUSDT", t0());
        ledger.record_fire("SOLUSDT", t0() + Duration::minutes(50));

        assert!(ledger.is_suppressed("SOLUSDT", t0() + Duration::minutes(90)));
    }

    #[test]
    fn test_claim_is_exclusive() {
        let ledger = CooldownLedger::in_memory(Duration::hours(1));
        let first = ledger.claim("WIFUSDT", t0());
        assert!(first.is_some());
        assert!(ledger.claim("WIFUSDT", t0()).is_none());

        drop(first);
        assert!(ledger.claim("WIFUSDT", t0()).is_some());
    }

    #[test]
    fn test_dropped_claim_records_nothing() {
        let ledger = CooldownLedger::in_memory(Duration::hours(1));
        let claim = ledger.claim("WIFUSDT", t0()).unwrap();
        drop(claim);

        assert!(!ledger.is_suppressed("WIFUSDT", t0()));
    }

    #[test]
    fn test_committed_claim_suppresses() {
        let ledger = CooldownLedger::in_memory(Duration::hours(1));
        let claim = ledger.claim("WIFUSDT", t0()).unwrap();
        assert_eq!(claim.symbol(), "WIFUSDT");
        claim.commit(t0());

        assert!(ledger.is_suppressed("WIFUSDT", t0() + Duration::minutes(59)));
        assert!(ledger.claim("WIFUSDT", t0() + Duration::minutes(1)).is_none());
    }

    #[test]
    fn test_concurrent_claims_single_winner() {
        let ledger = Arc::new(CooldownLedger::in_memory(Duration::hours(1)));
        let winners: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let ledger = Arc::clone(&ledger);
                    s.spawn(move || match ledger.claim("ORDIUSDT", t0()) {
                        Some(claim) => {
                            claim.commit(t0());
                            1
                        }
                        None => 0,
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(winners, 1);
    }

    #[test]
    fn test_prune_and_active_count() {
        let cooldown = Duration::hours(1);
        let ledger = CooldownLedger::in_memory(cooldown);
        ledger.record_fire("OLDUSDT", t0());
        ledger.record_fire("NEWUSDT", t0() + Duration::minutes(45));

        let now = t0() + Duration::minutes(70);
        assert_eq!(ledger.active_count(now), 1);
        assert_eq!(ledger.prune(now), 1);
        assert!(ledger.is_suppressed("NEWUSDT", now));
        assert_eq!(ledger.active_count(now), 1);
    }
}
