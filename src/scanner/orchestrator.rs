//! Scan loop

use super::{CycleReport, InstrumentOutcome, ScannerState};
use crate::config::Config;
use crate::cooldown::CooldownLedger;
use crate::exchange::{ExchangeApi, Instrument, RateGovernor};
use crate::market_cap::MarketCapFilter;
use crate::notify::{Alert, DeliveryOutcome, Notifier};
use crate::signal::{DecisionPipeline, EvaluationError};
use crate::telemetry::{self, CounterMetric, GaugeMetric, LatencyMetric};
use crate::tracker::SignalTracker;
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use uuid::Uuid;

/// An instrument that passed the name, cap and cooldown filters
struct Candidate {
    instrument: Instrument,
    market_cap: Option<Decimal>,
}

/// Periodically scans the universe and alerts on volume spikes
pub struct Scanner {
    config: Arc<Config>,
    exchange: Arc<dyn ExchangeApi>,
    market_cap: Arc<MarketCapFilter>,
    notifier: Arc<dyn Notifier>,
    pipeline: DecisionPipeline,
    cooldowns: CooldownLedger,
    tracker: Option<SignalTracker>,
    governor: Option<Arc<RateGovernor>>,
    state: watch::Sender<ScannerState>,
    cycles: AtomicU64,
}

impl Scanner {
    pub fn new(
        config: Arc<Config>,
        exchange: Arc<dyn ExchangeApi>,
        market_cap: Arc<MarketCapFilter>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let pipeline = DecisionPipeline::from_config(&config);
        let cooldowns = CooldownLedger::in_memory(config.scanner.cooldown());
        let tracker = config
            .tracker
            .enabled
            .then(|| SignalTracker::new(config.tracker.clone()));
        let (state, _) = watch::channel(ScannerState::Idle);

        Self {
            config,
            exchange,
            market_cap,
            notifier,
            pipeline,
            cooldowns,
            tracker,
            governor: None,
            state,
            cycles: AtomicU64::new(0),
        }
    }

    /// Report the governor's spend as a gauge after each cycle
    pub fn with_governor(mut self, governor: Arc<RateGovernor>) -> Self {
        self.governor = Some(governor);
        self
    }

    /// Follow-up tracker, when enabled
    pub fn tracker(&self) -> Option<&SignalTracker> {
        self.tracker.as_ref()
    }

    pub fn state(&self) -> ScannerState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<ScannerState> {
        self.state.subscribe()
    }

    pub fn cooldowns(&self) -> &CooldownLedger {
        &self.cooldowns
    }

    fn set_state(&self, next: ScannerState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            tracing::debug!(from = %prev, to = %next, "Scanner state");
        }
    }

    /// Scan until `shutdown` turns true or its sender goes away
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let interval = self.config.scanner.scan_interval();
        tracing::info!(
            interval_secs = interval.as_secs(),
            candles = self.pipeline.required_candles(),
            cooldown_mins = self.config.scanner.cooldown_minutes,
            "Scanner loop started"
        );

        while !*shutdown.borrow() {
            let started = Instant::now();
            self.run_cycle_until(&shutdown).await;

            self.set_state(ScannerState::Sleeping);
            tokio::select! {
                _ = sleep_until(started + interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            self.set_state(ScannerState::Idle);
        }

        self.set_state(ScannerState::Idle);
        tracing::info!("Scanner stopped");
    }

    /// One full cycle with no shutdown signal
    pub async fn run_cycle(&self) -> CycleReport {
        let (_tx, rx) = watch::channel(false);
        self.run_cycle_until(&rx).await
    }

    async fn run_cycle_until(&self, shutdown: &watch::Receiver<bool>) -> CycleReport {
        let started = Instant::now();
        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        let mut report = CycleReport {
            cycle,
            ..CycleReport::default()
        };

        self.set_state(ScannerState::RefreshingUniverse);
        let universe = match self.exchange.list_universe().await {
            Ok(universe) => universe,
            Err(e) => {
                tracing::error!(cycle, error = %e, "Failed to list universe, skipping cycle");
                report.universe_error = true;
                return self.finish_cycle(report, started).await;
            }
        };
        report.universe = universe.len();

        self.market_cap.ensure_fresh().await;

        let prices = match self.exchange.fetch_mark_prices().await {
            Ok(prices) => prices,
            Err(e) => {
                tracing::warn!(error = %e, "Mark prices unavailable this cycle");
                HashMap::new()
            }
        };

        let candidates = self.select_candidates(universe, &mut report).await;
        telemetry::set_gauge(GaugeMetric::EligibleInstruments, candidates.len() as f64);

        self.set_state(ScannerState::Scanning);
        tracing::info!(
            cycle,
            universe = report.universe,
            candidates = candidates.len(),
            "Scanning"
        );

        let prices = &prices;
        let outcomes: Vec<InstrumentOutcome> = stream::iter(candidates)
            .map(|candidate| self.scan_instrument(candidate, prices, shutdown))
            .buffer_unordered(self.config.scanner.workers.max(1))
            .collect()
            .await;
        for outcome in outcomes {
            report.tally(outcome);
        }

        if !*shutdown.borrow() {
            self.follow_up(prices, &mut report).await;
        }

        self.finish_cycle(report, started).await
    }

    /// Drop excluded, oversized and cooling-down instruments
    async fn select_candidates(
        &self,
        universe: Vec<Instrument>,
        report: &mut CycleReport,
    ) -> Vec<Candidate> {
        let now = Utc::now();
        let mut candidates = Vec::with_capacity(universe.len());

        for instrument in universe {
            if self.config.scanner.excluded_symbols.contains(&instrument.symbol) {
                report.excluded_by_name += 1;
                continue;
            }
            let eligibility = self.market_cap.eligibility(&instrument).await;
            if !eligibility.is_included() {
                report.excluded_by_cap += 1;
                continue;
            }
            if self.cooldowns.is_suppressed(&instrument.symbol, now) {
                report.suppressed += 1;
                continue;
            }
            candidates.push(Candidate {
                instrument,
                market_cap: eligibility.market_cap(),
            });
        }

        candidates
    }

    async fn scan_instrument(
        &self,
        candidate: Candidate,
        prices: &HashMap<String, Decimal>,
        shutdown: &watch::Receiver<bool>,
    ) -> InstrumentOutcome {
        let symbol = candidate.instrument.symbol.as_str();
        let stopping = || *shutdown.borrow();

        if stopping() {
            return InstrumentOutcome::Abandoned;
        }
        // holds the instrument until this scan ends
        let Some(claim) = self.cooldowns.claim(symbol, Utc::now()) else {
            return InstrumentOutcome::Suppressed;
        };

        let timeframe = self.config.scanner.timeframe;
        let candles = match self
            .exchange
            .fetch_candles(symbol, timeframe, self.pipeline.required_candles())
            .await
        {
            Ok(candles) => candles,
            Err(e) => {
                tracing::warn!(symbol, error = %e, "Candle fetch failed, skipping");
                telemetry::increment(CounterMetric::InstrumentErrors);
                return InstrumentOutcome::Skipped;
            }
        };
        if stopping() {
            return InstrumentOutcome::Abandoned;
        }

        match self.pipeline.prescreen(&candles) {
            Ok(pre) if !pre.fire => {
                tracing::debug!(
                    symbol,
                    ratio = ?pre.metrics.volume.ratio,
                    failed = ?pre.failed,
                    "Rejected"
                );
                return InstrumentOutcome::Rejected;
            }
            Ok(_) => {}
            Err(EvaluationError::InsufficientCandles { needed, got }) => {
                tracing::debug!(symbol, needed, got, "Not enough history, skipping");
                return InstrumentOutcome::Skipped;
            }
        }

        let open_interest = if self.pipeline.needs_open_interest() {
            let limit = self.config.open_interest.periods + 1;
            match self
                .exchange
                .fetch_open_interest_history(symbol, timeframe, limit)
                .await
            {
                Ok(oi) => Some(oi),
                Err(e) => {
                    tracing::warn!(symbol, error = %e, "Open interest fetch failed, skipping");
                    telemetry::increment(CounterMetric::InstrumentErrors);
                    return InstrumentOutcome::Skipped;
                }
            }
        } else {
            None
        };
        if stopping() {
            return InstrumentOutcome::Abandoned;
        }

        let evaluation = match self.pipeline.evaluate(&candles, open_interest.as_ref()) {
            Ok(evaluation) => evaluation,
            Err(e) => {
                tracing::debug!(symbol, error = %e, "Evaluation failed, skipping");
                return InstrumentOutcome::Skipped;
            }
        };
        if !evaluation.fire {
            tracing::debug!(symbol, failed = ?evaluation.failed, "Rejected");
            return InstrumentOutcome::Rejected;
        }

        let quote = &self.config.exchange.quote_asset;
        let alert = Alert {
            id: Uuid::new_v4(),
            timeframe,
            triggered_at: Utc::now(),
            reasons: evaluation.reasons,
            metrics: evaluation.metrics,
            breakout_enabled: self.config.breakout.enabled,
            open_interest_enabled: self.config.open_interest.enabled,
            market_cap: candidate.market_cap,
            mark_price: prices.get(symbol).copied(),
            btc_price: prices.get(&format!("BTC{quote}")).copied(),
            cooldown_minutes: self.config.scanner.cooldown_minutes,
            instrument: candidate.instrument.clone(),
        };

        let reasons: Vec<&str> = alert.reasons.iter().map(|r| r.as_str()).collect();
        tracing::info!(
            symbol,
            alert_id = %alert.id,
            reasons = ?reasons,
            ratio = ?alert.metrics.volume.ratio,
            recent_avg = %alert.metrics.volume.recent_avg,
            baseline_avg = %alert.metrics.volume.baseline_avg,
            market_cap = ?alert.market_cap,
            trend = %alert.metrics.trend.pattern,
            "ALERT"
        );

        match self.notifier.deliver(&alert).await {
            DeliveryOutcome::FatalFailure => {
                tracing::error!(symbol, alert_id = %alert.id, "Alert delivery failed, cooldown not recorded");
                telemetry::increment(CounterMetric::DeliveryFailures);
                InstrumentOutcome::DeliveryFailed
            }
            outcome => {
                if outcome == DeliveryOutcome::RetryableFailure {
                    tracing::warn!(symbol, alert_id = %alert.id, "Alert delivery retries exhausted, recording as sent");
                    telemetry::increment(CounterMetric::DeliveryFailures);
                }
                claim.commit(alert.triggered_at);
                if let Some(tracker) = &self.tracker {
                    tracker.record(&alert);
                }
                telemetry::increment(CounterMetric::Alerts);
                InstrumentOutcome::Alerted
            }
        }
    }

    /// Move tracked signals to this cycle's prices and report what changed
    async fn follow_up(&self, prices: &HashMap<String, Decimal>, report: &mut CycleReport) {
        let Some(tracker) = &self.tracker else {
            return;
        };
        let now = Utc::now();
        tracker.apply_prices(prices, now);

        // reported once even if delivery fails
        for update in tracker.check(now) {
            if self.notifier.deliver_update(&update).await.is_fatal() {
                tracing::error!(
                    symbol = %update.symbol,
                    kind = ?update.kind,
                    "Tracker update delivery failed"
                );
                telemetry::increment(CounterMetric::DeliveryFailures);
            }
            telemetry::increment(CounterMetric::TrackerUpdates);
            report.tracker_updates += 1;
        }

        tracker.expire(now);
        report.tracked = tracker.len();
        telemetry::set_gauge(GaugeMetric::TrackedSignals, report.tracked as f64);
    }

    async fn finish_cycle(&self, mut report: CycleReport, started: Instant) -> CycleReport {
        let now = Utc::now();
        let pruned = self.cooldowns.prune(now);
        let active = self.cooldowns.active_count(now);
        report.duration = started.elapsed();

        telemetry::increment(CounterMetric::Cycles);
        telemetry::set_gauge(GaugeMetric::CooldownActive, active as f64);
        telemetry::record_latency(LatencyMetric::Cycle, report.duration);
        if let Some(governor) = &self.governor {
            let budget = governor.snapshot().await;
            telemetry::set_gauge(GaugeMetric::ConsumedCost, f64::from(budget.consumed));
        }

        tracing::info!(
            cycle = report.cycle,
            universe = report.universe,
            excluded_by_name = report.excluded_by_name,
            excluded_by_cap = report.excluded_by_cap,
            suppressed = report.suppressed,
            evaluated = report.evaluated,
            alerts = report.alerts,
            delivery_failures = report.delivery_failures,
            skipped = report.skipped,
            abandoned = report.abandoned,
            tracker_updates = report.tracker_updates,
            tracked = report.tracked,
            cooldown_active = active,
            cooldown_pruned = pruned,
            elapsed_ms = report.duration.as_millis() as u64,
            "Cycle complete"
        );

        report
    }
}
