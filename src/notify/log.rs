//! Log-only transport for dry runs

use super::{format_alert, Alert, DeliveryOutcome, Notifier};
use crate::tracker::PerformanceUpdate;
use async_trait::async_trait;

/// Writes alerts to the log instead of sending them
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, alert: &Alert) -> DeliveryOutcome {
        let reasons: Vec<&str> = alert.reasons.iter().map(|r| r.as_str()).collect();
        tracing::info!(
            alert_id = %alert.id,
            symbol = %alert.instrument.symbol,
            reasons = ?reasons,
            ratio = ?alert.metrics.volume.ratio,
            market_cap = ?alert.market_cap,
            "[dry-run] alert"
        );
        tracing::debug!(text = %format_alert(alert), "[dry-run] rendered alert");
        DeliveryOutcome::Delivered
    }

    async fn deliver_update(&self, update: &PerformanceUpdate) -> DeliveryOutcome {
        tracing::info!(
            symbol = %update.symbol,
            kind = ?update.kind,
            peak_pct = %update.peak_pct,
            current_pct = %update.current_pct,
            "[dry-run] tracker update"
        );
        DeliveryOutcome::Delivered
    }

    async fn send_startup(&self, summary: &str) -> DeliveryOutcome {
        tracing::info!(%summary, "[dry-run] startup summary");
        DeliveryOutcome::Delivered
    }
}
