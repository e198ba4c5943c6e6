//! Signal performance tracker
//!
//! Follows every fired instrument from its alert price for a fixed window.
//! Each cycle the latest mark prices are applied; crossing a take-profit
//! target or retracing far enough from the peak produces one
//! [`PerformanceUpdate`] for the notifier. State lives in memory only.

use crate::config::{Timeframe, TrackerConfig};
use crate::notify::Alert;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// One fired signal being followed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackedSignal {
    pub alert_id: Uuid,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub entry_price: Decimal,
    pub highest_price: Decimal,
    pub current_price: Decimal,
    pub alerted_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Take-profit targets already reported
    pub targets_hit: Vec<Decimal>,
    pub reversal_warned: bool,
}

impl TrackedSignal {
    /// Best gain over the entry price, in percent
    pub fn peak_pct(&self) -> Decimal {
        pct_change(self.entry_price, self.highest_price)
    }

    /// Gain over the entry price at the latest price, in percent
    pub fn current_pct(&self) -> Decimal {
        pct_change(self.entry_price, self.current_price)
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.alerted_at
    }
}

fn pct_change(from: Decimal, to: Decimal) -> Decimal {
    if from <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    ((to - from) / from * dec!(100)).round_dp(2)
}

/// What a performance update reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum UpdateKind {
    /// The peak crossed a take-profit target
    TakeProfit { target_pct: Decimal },
    /// The price fell back from its peak
    Reversal { drop_pct: Decimal },
}

/// Follow-up message about a tracked signal
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceUpdate {
    pub kind: UpdateKind,
    pub symbol: String,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub highest_price: Decimal,
    pub peak_pct: Decimal,
    pub current_pct: Decimal,
    /// Time since the original alert
    #[serde(skip)]
    pub age: Duration,
}

impl PerformanceUpdate {
    fn of(signal: &TrackedSignal, kind: UpdateKind, now: DateTime<Utc>) -> Self {
        Self {
            kind,
            symbol: signal.symbol.clone(),
            entry_price: signal.entry_price,
            current_price: signal.current_price,
            highest_price: signal.highest_price,
            peak_pct: signal.peak_pct(),
            current_pct: signal.current_pct(),
            age: signal.age(now),
        }
    }
}

/// In-memory follow-up of fired signals
pub struct SignalTracker {
    config: TrackerConfig,
    /// Ascending, deduplicated
    targets: Vec<Decimal>,
    signals: Mutex<Vec<TrackedSignal>>,
}

impl SignalTracker {
    pub fn new(config: TrackerConfig) -> Self {
        let mut targets = config.take_profit_targets.clone();
        targets.sort();
        targets.dedup();
        Self {
            config,
            targets,
            signals: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<TrackedSignal>> {
        self.signals.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start following a delivered alert. Alerts without a usable mark
    /// price cannot be measured and are not tracked.
    pub fn record(&self, alert: &Alert) -> bool {
        let entry_price = match alert.mark_price {
            Some(price) if price > Decimal::ZERO => price,
            _ => {
                tracing::debug!(
                    symbol = %alert.instrument.symbol,
                    "No mark price, signal not tracked"
                );
                return false;
            }
        };

        self.lock().push(TrackedSignal {
            alert_id: alert.id,
            symbol: alert.instrument.symbol.clone(),
            timeframe: alert.timeframe,
            entry_price,
            highest_price: entry_price,
            current_price: entry_price,
            alerted_at: alert.triggered_at,
            updated_at: None,
            targets_hit: Vec::new(),
            reversal_warned: false,
        });
        tracing::info!(
            symbol = %alert.instrument.symbol,
            entry_price = %entry_price,
            "Tracking signal"
        );
        true
    }

    /// Apply the latest prices, returning how many signals moved
    pub fn apply_prices(&self, prices: &HashMap<String, Decimal>, now: DateTime<Utc>) -> usize {
        let mut updated = 0;
        for signal in self.lock().iter_mut() {
            let Some(&price) = prices.get(&signal.symbol) else {
                continue;
            };
            signal.current_price = price;
            signal.highest_price = signal.highest_price.max(price);
            signal.updated_at = Some(now);
            updated += 1;
        }
        updated
    }

    /// Take-profit hits and reversals not reported yet.
    ///
    /// Each target and each reversal is reported once per signal; it is
    /// marked as reported before the caller delivers it.
    pub fn check(&self, now: DateTime<Utc>) -> Vec<PerformanceUpdate> {
        let mut updates = Vec::new();

        for signal in self.lock().iter_mut() {
            let peak = signal.peak_pct();

            for &target in &self.targets {
                if peak >= target && !signal.targets_hit.contains(&target) {
                    signal.targets_hit.push(target);
                    tracing::info!(
                        symbol = %signal.symbol,
                        target = %target,
                        peak_pct = %peak,
                        current_pct = %signal.current_pct(),
                        "Take-profit target hit"
                    );
                    updates.push(PerformanceUpdate::of(
                        signal,
                        UpdateKind::TakeProfit { target_pct: target },
                        now,
                    ));
                }
            }

            if self.config.reversal_enabled
                && !signal.reversal_warned
                && peak >= self.config.min_reversal_peak_pct
            {
                let drop_pct = peak - signal.current_pct();
                if drop_pct >= self.config.reversal_drop_pct {
                    signal.reversal_warned = true;
                    tracing::info!(
                        symbol = %signal.symbol,
                        peak_pct = %peak,
                        drop_pct = %drop_pct,
                        "Reversal from peak"
                    );
                    updates.push(PerformanceUpdate::of(
                        signal,
                        UpdateKind::Reversal { drop_pct },
                        now,
                    ));
                }
            }
        }

        updates
    }

    /// Stop following signals older than the tracking window
    pub fn expire(&self, now: DateTime<Utc>) -> Vec<TrackedSignal> {
        let max_age = self.config.max_age();
        let mut signals = self.lock();
        let (expired, active): (Vec<_>, Vec<_>) = signals
            .drain(..)
            .partition(|s| s.age(now) >= max_age);
        *signals = active;

        for signal in &expired {
            tracing::info!(
                symbol = %signal.symbol,
                tracked_hours = signal.age(now).num_hours(),
                peak_pct = %signal.peak_pct(),
                exit_pct = %signal.current_pct(),
                "Signal tracking finished"
            );
        }
        expired
    }

    /// Snapshot of the signals still being followed
    pub fn active(&self) -> Vec<TrackedSignal> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::Instrument;
    use crate::signal::{CandleColor, CandleShapeMetrics, SignalMetrics, TrendContext, VolumeMetrics};
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn alert(symbol: &str, price: Option<Decimal>) -> Alert {
        Alert {
            id: Uuid::new_v4(),
            instrument: Instrument::new(symbol, symbol.trim_end_matches("USDT")),
            timeframe: Timeframe::M15,
            triggered_at: t0(),
            reasons: Vec::new(),
            metrics: SignalMetrics {
                candle_open_time: t0(),
                last_close: dec!(1),
                volume: VolumeMetrics {
                    recent_avg: dec!(12000),
                    baseline_avg: dec!(3000),
                    ratio: Some(dec!(4)),
                    threshold: dec!(3),
                },
                candle: CandleShapeMetrics {
                    color: CandleColor::Green,
                    body_pct: dec!(50),
                    upper_wick_pct: dec!(25),
                    lower_wick_pct: dec!(25),
                },
                breakout: None,
                open_interest: None,
                trend: TrendContext::default(),
            },
            breakout_enabled: false,
            open_interest_enabled: false,
            market_cap: None,
            mark_price: price,
            btc_price: None,
            cooldown_minutes: 60,
        }
    }

    fn prices(symbol: &str, price: Decimal) -> HashMap<String, Decimal> {
        HashMap::from([(symbol.to_string(), price)])
    }

    fn tracker() -> SignalTracker {
        SignalTracker::new(TrackerConfig::default())
    }

    #[test]
    fn test_record_requires_mark_price() {
        let tracker = tracker();
        assert!(!tracker.record(&alert("XUSDT", None)));
        assert!(!tracker.record(&alert("XUSDT", Some(Decimal::ZERO))));
        assert!(tracker.is_empty());

        assert!(tracker.record(&alert("XUSDT", Some(dec!(2)))));
        let signal = &tracker.active()[0];
        assert_eq!(signal.entry_price, dec!(2));
        assert_eq!(signal.highest_price, dec!(2));
    }

    #[test]
    fn test_peak_follows_highest_price() {
        let tracker = tracker();
        tracker.record(&alert("XUSDT", Some(dec!(100))));

        tracker.apply_prices(&prices("XUSDT", dec!(104)), t0());
        tracker.apply_prices(&prices("XUSDT", dec!(101)), t0());
        assert_eq!(tracker.apply_prices(&prices("OTHERUSDT", dec!(9)), t0()), 0);

        let signal = &tracker.active()[0];
        assert_eq!(signal.highest_price, dec!(104));
        assert_eq!(signal.current_price, dec!(101));
        assert_eq!(signal.peak_pct(), dec!(4));
        assert_eq!(signal.current_pct(), dec!(1));
    }

    #[test]
    fn test_each_target_reported_once() {
        let tracker = tracker();
        tracker.record(&alert("XUSDT", Some(dec!(100))));

        tracker.apply_prices(&prices("XUSDT", dec!(105.5)), t0());
        let first = tracker.check(t0());
        let targets: Vec<_> = first.iter().map(|u| u.kind).collect();
        assert_eq!(
            targets,
            vec![
                UpdateKind::TakeProfit { target_pct: dec!(3) },
                UpdateKind::TakeProfit { target_pct: dec!(5) },
            ]
        );

        assert!(tracker.check(t0()).is_empty());

        tracker.apply_prices(&prices("XUSDT", dec!(110)), t0());
        let second = tracker.check(t0());
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].kind, UpdateKind::TakeProfit { target_pct: dec!(10) });
        assert_eq!(second[0].peak_pct, dec!(10));
    }

    #[test]
    fn test_reversal_after_peak() {
        let tracker = tracker();
        tracker.record(&alert("XUSDT", Some(dec!(100))));
        tracker.apply_prices(&prices("XUSDT", dec!(108)), t0());
        tracker.check(t0());

        // 8% peak, now +4%: 4 points off the peak, below the 5 point trigger
        tracker.apply_prices(&prices("XUSDT", dec!(104)), t0());
        assert!(tracker.check(t0()).is_empty());

        tracker.apply_prices(&prices("XUSDT", dec!(102)), t0());
        let updates = tracker.check(t0());
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].kind, UpdateKind::Reversal { drop_pct: dec!(6) });
        assert_eq!(updates[0].current_pct, dec!(2));

        tracker.apply_prices(&prices("XUSDT", dec!(90)), t0());
        assert!(tracker.check(t0()).is_empty());
    }

    #[test]
    fn test_no_reversal_below_minimum_peak() {
        let tracker = tracker();
        tracker.record(&alert("XUSDT", Some(dec!(100))));
        tracker.apply_prices(&prices("XUSDT", dec!(102)), t0());
        tracker.apply_prices(&prices("XUSDT", dec!(80)), t0());

        assert!(tracker.check(t0()).is_empty());
    }

    #[test]
    fn test_reversal_disabled() {
        let tracker = SignalTracker::new(TrackerConfig {
            reversal_enabled: false,
            take_profit_targets: Vec::new(),
            ..TrackerConfig::default()
        });
        tracker.record(&alert("XUSDT", Some(dec!(100))));
        tracker.apply_prices(&prices("XUSDT", dec!(120)), t0());
        tracker.apply_prices(&prices("XUSDT", dec!(100)), t0());

        assert!(tracker.check(t0()).is_empty());
    }

    #[test]
    fn test_expire_after_max_age() {
        let tracker = tracker();
        tracker.record(&alert("XUSDT", Some(dec!(100))));
        tracker.record(&alert("YUSDT", Some(dec!(5))));

        assert!(tracker.expire(t0() + Duration::hours(71)).is_empty());
        assert_eq!(tracker.len(), 2);

        let expired = tracker.expire(t0() + Duration::hours(72));
        assert_eq!(expired.len(), 2);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_update_carries_age() {
        let tracker = tracker();
        tracker.record(&alert("XUSDT", Some(dec!(100))));
        tracker.apply_prices(&prices("XUSDT", dec!(103)), t0());

        let updates = tracker.check(t0() + Duration::minutes(95));
        assert_eq!(updates[0].age, Duration::minutes(95));
        assert_eq!(updates[0].symbol, "XUSDT");
    }
}
