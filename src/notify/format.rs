//! HTML rendering for chat transports

use super::Alert;
use crate::config::Config;
use crate::signal::CandleColor;
use crate::tracker::{PerformanceUpdate, UpdateKind};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::fmt::Write;

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━";

/// Compact dollar amount: `$1.2B`, `$340.5M`, `$12.0K`, `$950`
pub fn format_usd(value: Decimal) -> String {
    let abs = value.abs();
    if abs >= dec!(1000000000) {
        format!("${:.1}B", value / dec!(1000000000))
    } else if abs >= dec!(1000000) {
        format!("${:.1}M", value / dec!(1000000))
    } else if abs >= dec!(1000) {
        format!("${:.1}K", value / dec!(1000))
    } else {
        format!("${:.0}", value)
    }
}

fn format_price(price: Decimal) -> String {
    if price >= Decimal::ONE {
        format!("${:.4}", price)
    } else {
        format!("${:.8}", price)
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Render an alert as Telegram HTML
pub fn format_alert(alert: &Alert) -> String {
    let m = &alert.metrics;
    let mut out = String::new();

    let _ = writeln!(out, "🚨 <b>VOLUME SPIKE ALERT</b>");
    let _ = writeln!(out, "{RULE}\n");
    let _ = writeln!(
        out,
        "📌 <b>Symbol:</b>    {}",
        escape_html(&alert.instrument.symbol)
    );
    let _ = writeln!(out, "⏱  <b>Timeframe:</b> {}", alert.timeframe);
    let _ = writeln!(
        out,
        "💰 <b>Market Cap:</b> {}",
        alert
            .market_cap
            .map(format_usd)
            .unwrap_or_else(|| "Unknown".to_string())
    );
    let _ = writeln!(
        out,
        "💵 <b>Price:</b>     {}",
        alert
            .mark_price
            .map(format_price)
            .unwrap_or_else(|| "N/A".to_string())
    );
    out.push('\n');

    let ratio = m
        .volume
        .ratio
        .map(|r| format!("{:.2}x", r))
        .unwrap_or_else(|| "N/A".to_string());
    let _ = writeln!(
        out,
        "📊 <b>Volume:</b>  {} ({} vs {} avg)",
        ratio,
        format_usd(m.volume.recent_avg),
        format_usd(m.volume.baseline_avg)
    );

    let icon = match m.candle.color {
        CandleColor::Green => "🟢",
        CandleColor::Red => "🔴",
        CandleColor::Doji => "⚪",
    };
    let _ = writeln!(
        out,
        "🕯  <b>Candle:</b>   {} {}  |  Body: {:.0}%  |  Wick: {:.0}%",
        icon, m.candle.color, m.candle.body_pct, m.candle.upper_wick_pct
    );

    let breakout = match (&m.breakout, alert.breakout_enabled) {
        (_, false) => "⚫ Disabled".to_string(),
        (Some(b), true) if b.confirmed => match b.margin_pct {
            Some(margin) => format!("✅ +{:.2}% above {}", margin, format_price(b.level)),
            None => "✅ Yes".to_string(),
        },
        (_, true) => "❌ No".to_string(),
    };
    let _ = writeln!(out, "🔺 <b>Breakout:</b>  {}", breakout);

    let open_interest = match (&m.open_interest, alert.open_interest_enabled) {
        (_, false) => "⚫ Disabled".to_string(),
        (Some(oi), true) => match oi.change_pct {
            Some(pct) if pct >= Decimal::ZERO => format!("📈 +{:.2}%", pct),
            Some(pct) => format!("📉 {:.2}%", pct),
            None => "⚠️ Data N/A".to_string(),
        },
        (None, true) => "⚠️ Data N/A".to_string(),
    };
    let _ = writeln!(out, "📈 <b>OI Change:</b> {}", open_interest);

    if !m.trend.pattern.is_empty() {
        let dots: String = m
            .trend
            .pattern
            .chars()
            .map(|c| if c == 'G' { "🟢" } else { "🔴" })
            .collect();
        let _ = writeln!(
            out,
            "📊 <b>Trend:</b>    {}/{} green  {}",
            m.trend.green, m.trend.total, dots
        );
    }

    if let Some(btc) = alert.btc_price {
        let _ = writeln!(out, "₿  <b>BTC:</b>       {}", format_price(btc));
    }

    out.push('\n');
    let _ = writeln!(
        out,
        "🗓 <b>Candle time:</b> {}",
        m.candle_open_time.format("%Y-%m-%d %H:%M UTC")
    );
    let _ = write!(
        out,
        "🕐 <b>Sent:</b>     {}",
        alert.triggered_at.format("%Y-%m-%d %H:%M:%S UTC")
    );

    out
}

/// `45m` below an hour, `3h 20m` above
pub fn format_age(age: chrono::Duration) -> String {
    let minutes = age.num_minutes().max(0);
    if minutes < 60 {
        format!("{}m", minutes)
    } else {
        format!("{}h {}m", minutes / 60, minutes % 60)
    }
}

fn signed_pct(pct: Decimal) -> String {
    if pct >= Decimal::ZERO {
        format!("+{:.2}%", pct)
    } else {
        format!("{:.2}%", pct)
    }
}

/// Render a tracker follow-up as Telegram HTML
pub fn format_update(update: &PerformanceUpdate) -> String {
    let mut out = String::new();

    match update.kind {
        UpdateKind::TakeProfit { target_pct } => {
            let _ = writeln!(out, "🎯 <b>TAKE PROFIT +{}% HIT</b>", target_pct.normalize());
        }
        UpdateKind::Reversal { .. } => {
            let _ = writeln!(out, "⚠️ <b>REVERSAL WARNING</b>");
        }
    }
    let _ = writeln!(out, "{RULE}
");
    let _ = writeln!(out, "📌 <b>Symbol:</b>  {}", escape_html(&update.symbol));
    let _ = writeln!(out, "💵 <b>Entry:</b>   {}", format_price(update.entry_price));
    let _ = writeln!(
        out,
        "📈 <b>Peak:</b>    {} ({})",
        format_price(update.highest_price),
        signed_pct(update.peak_pct)
    );
    let _ = writeln!(
        out,
        "💰 <b>Now:</b>     {} ({})",
        format_price(update.current_price),
        signed_pct(update.current_pct)
    );
    if let UpdateKind::Reversal { drop_pct } = update.kind {
        let _ = writeln!(out, "📉 <b>Off peak:</b> {:.2} pts", drop_pct);
    }
    let _ = write!(out, "⏳ <b>Since alert:</b> {}", format_age(update.age));

    out
}

/// Summary of the active filters, sent once at startup
pub fn startup_summary(config: &Config) -> String {
    let sc = &config.scanner;
    let mut lines = vec![
        "⚙️ <b>Configuration</b>".to_string(),
        format!("• Timeframe: {}", sc.timeframe),
    ];

    if config.market_cap.enabled {
        lines.push(format!(
            "• Market-cap filter: ≤ {}",
            format_usd(config.market_cap.max_usd)
        ));
    } else {
        lines.push("• Market-cap filter: <b>OFF</b>".to_string());
    }
    lines.push(format!(
        "• Volume: last {} vs prev {} (≥{}x)",
        sc.volume_recent_candles, sc.volume_baseline_candles, sc.volume_multiplier
    ));

    let candle = &config.candle;
    if candle.bullish_required {
        lines.push("• Bullish candle: <b>ON</b>".to_string());
    }
    if candle.max_upper_wick_pct > Decimal::ZERO {
        lines.push(format!(
            "• Max upper wick: <b>{}%</b>",
            candle.max_upper_wick_pct
        ));
    }
    if candle.min_body_pct > Decimal::ZERO {
        lines.push(format!("• Min body size: <b>{}%</b>", candle.min_body_pct));
    }

    if config.breakout.enabled {
        lines.push(format!(
            "• Breakout: <b>ON</b>  (lookback {})",
            config.breakout.lookback
        ));
    } else {
        lines.push("• Breakout: <b>OFF</b>".to_string());
    }

    let oi = &config.open_interest;
    if oi.enabled {
        lines.push(format!(
            "• OI filter: <b>ON</b>  (≥{}%, periods {})",
            oi.min_increase_pct, oi.periods
        ));
    } else {
        lines.push("• OI filter: <b>OFF</b>".to_string());
    }

    lines.push(format!(
        "• Cooldown: <b>{}m</b> per symbol",
        sc.cooldown_minutes
    ));
    lines.push(format!("• Scan interval: {}s", sc.scan_interval_secs));
    if config.tracker.enabled {
        lines.push(format!(
            "• Tracker: <b>ON</b>  ({}h window)",
            config.tracker.max_age_hours
        ));
    } else {
        lines.push("• Tracker: <b>OFF</b>".to_string());
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Timeframe;
    use crate::exchange::Instrument;
    use crate::notify::Alert;
    use crate::signal::{
        BreakoutMetrics, CandleShapeMetrics, ConditionTag, SignalMetrics, TrendContext,
        VolumeMetrics,
    };
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn alert() -> Alert {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 12, 15, 0).unwrap();
        Alert {
            id: Uuid::new_v4(),
            instrument: Instrument::new("1000PEPEUSDT", "1000PEPE"),
            timeframe: Timeframe::M15,
            triggered_at: t,
            reasons: vec![ConditionTag::VolumeSpike, ConditionTag::Breakout],
            metrics: SignalMetrics {
                candle_open_time: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
                last_close: dec!(0.0123),
                volume: VolumeMetrics {
                    recent_avg: dec!(12000),
                    baseline_avg: dec!(3000),
                    ratio: Some(dec!(4)),
                    threshold: dec!(3),
                },
                candle: CandleShapeMetrics {
                    color: CandleColor::Green,
                    body_pct: dec!(70.4),
                    upper_wick_pct: dec!(10),
                    lower_wick_pct: dec!(19.6),
                },
                breakout: Some(BreakoutMetrics {
                    level: dec!(0.012),
                    close: dec!(0.0123),
                    confirmed: true,
                    margin_pct: Some(dec!(2.5)),
                }),
                open_interest: None,
                trend: TrendContext {
                    green: 2,
                    total: 3,
                    pattern: "GRG".to_string(),
                },
            },
            breakout_enabled: true,
            open_interest_enabled: false,
            market_cap: Some(dec!(45000000)),
            mark_price: Some(dec!(0.0123)),
            btc_price: None,
            cooldown_minutes: 720,
        }
    }

    #[test]
    fn test_format_usd_units() {
        assert_eq!(format_usd(dec!(2500000000)), "$2.5B");
        assert_eq!(format_usd(dec!(45000000)), "$45.0M");
        assert_eq!(format_usd(dec!(12000)), "$12.0K");
        assert_eq!(format_usd(dec!(950)), "$950");
    }

    #[test]
    fn test_alert_contains_key_lines() {
        let text = format_alert(&alert());
        assert!(text.contains("1000PEPEUSDT"));
        assert!(text.contains("4.00x"));
        assert!(text.contains("$45.0M"));
        assert!(text.contains("✅ +2.50% above $0.01200000"));
        assert!(text.contains("OI Change:</b> ⚫ Disabled"));
        assert!(text.contains("2/3 green"));
        assert!(text.contains("2024-03-01 12:00 UTC"));
    }

    #[test]
    fn test_unknown_market_cap() {
        let mut a = alert();
        a.market_cap = None;
        a.mark_price = None;
        let text = format_alert(&a);
        assert!(text.contains("Market Cap:</b> Unknown"));
        assert!(text.contains("Price:</b>     N/A"));
    }

    fn update(kind: UpdateKind) -> PerformanceUpdate {
        PerformanceUpdate {
            kind,
            symbol: "XUSDT".to_string(),
            entry_price: dec!(2),
            current_price: dec!(2.04),
            highest_price: dec!(2.2),
            peak_pct: dec!(10),
            current_pct: dec!(2),
            age: chrono::Duration::minutes(200),
        }
    }

    #[test]
    fn test_format_age() {
        assert_eq!(format_age(chrono::Duration::minutes(45)), "45m");
        assert_eq!(format_age(chrono::Duration::minutes(200)), "3h 20m");
    }

    #[test]
    fn test_take_profit_update() {
        let text = format_update(&update(UpdateKind::TakeProfit {
            target_pct: dec!(10),
        }));
        assert!(text.contains("TAKE PROFIT +10% HIT"));
        assert!(text.contains("$2.2000 (+10.00%)"));
        assert!(text.contains("Since alert:</b> 3h 20m"));
        assert!(!text.contains("Off peak"));
    }

    #[test]
    fn test_reversal_update() {
        let text = format_update(&update(UpdateKind::Reversal { drop_pct: dec!(8) }));
        assert!(text.contains("REVERSAL WARNING"));
        assert!(text.contains("Off peak:</b> 8.00 pts"));
        assert!(text.contains("$2.0400 (+2.00%)"));
    }

    #[test]
    fn test_startup_summary_lists_filters() {
        let mut config = Config::default();
        config.breakout.enabled = true;
        config.breakout.lookback = 12;
        let summary = startup_summary(&config);

        assert!(summary.contains("Timeframe: 15m"));
        assert!(summary.contains("Breakout: <b>ON</b>  (lookback 12)"));
        assert!(summary.contains("OI filter: <b>OFF</b>"));
        assert!(summary.contains("≤ $100.0M"));
        assert!(summary.contains("Tracker: <b>ON</b>  (72h window)"));
    }
}
