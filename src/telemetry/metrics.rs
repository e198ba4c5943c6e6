//! Prometheus metrics

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Counter metric types
#[derive(Debug, Clone, Copy)]
pub enum CounterMetric {
    /// Completed scan cycles
    Cycles,
    /// Alerts delivered
    Alerts,
    /// Instruments skipped because of a fetch or evaluation error
    InstrumentErrors,
    /// Alerts the transport refused
    DeliveryFailures,
    /// Tracker follow-ups sent
    TrackerUpdates,
}

/// Gauge metric types
#[derive(Debug, Clone, Copy)]
pub enum GaugeMetric {
    /// Instruments evaluated in the last cycle
    EligibleInstruments,
    /// Instruments currently on cooldown
    CooldownActive,
    /// Request cost consumed in the current rate window
    ConsumedCost,
    /// Signals followed by the tracker
    TrackedSignals,
}

/// Latency metric types
#[derive(Debug, Clone, Copy)]
pub enum LatencyMetric {
    /// Time spent waiting for request budget
    GovernorWait,
    /// Full cycle wall time
    Cycle,
}

/// Install the Prometheus scrape endpoint on `0.0.0.0:port`
pub fn install_exporter(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install metrics exporter: {}", e))?;
    tracing::info!(%addr, "Prometheus exporter listening");
    Ok(())
}

/// Increment a counter
pub fn increment(metric: CounterMetric) {
    let name = match metric {
        CounterMetric::Cycles => "scanner_cycles_total",
        CounterMetric::Alerts => "scanner_alerts_total",
        CounterMetric::InstrumentErrors => "scanner_instrument_errors_total",
        CounterMetric::DeliveryFailures => "scanner_delivery_failures_total",
        CounterMetric::TrackerUpdates => "tracker_updates_total",
    };
    metrics::counter!(name).increment(1);
}

/// Count one outbound request against an endpoint
pub fn record_request(endpoint: &'static str, retry: bool) {
    metrics::counter!("exchange_requests_total", "endpoint" => endpoint).increment(1);
    if retry {
        metrics::counter!("exchange_retries_total", "endpoint" => endpoint).increment(1);
    }
}

/// Set a gauge value
pub fn set_gauge(metric: GaugeMetric, value: f64) {
    let name = match metric {
        GaugeMetric::EligibleInstruments => "scanner_eligible_instruments",
        GaugeMetric::CooldownActive => "scanner_cooldown_active",
        GaugeMetric::ConsumedCost => "rate_governor_consumed_cost",
        GaugeMetric::TrackedSignals => "tracker_active_signals",
    };
    metrics::gauge!(name).set(value);
}

/// Record a latency measurement
pub fn record_latency(metric: LatencyMetric, duration: Duration) {
    let name = match metric {
        LatencyMetric::GovernorWait => "rate_governor_wait_seconds",
        LatencyMetric::Cycle => "scanner_cycle_duration_seconds",
    };
    metrics::histogram!(name).record(duration.as_secs_f64());
}
