//! End-to-end scan cycles against a mocked exchange

use async_trait::async_trait;
use mockito::{Matcher, Mock, Server, ServerGuard};
use perp_scanner::config::{Config, MarketCapConfig};
use perp_scanner::exchange::{BinanceClient, RateGovernor, RetryPolicy};
use perp_scanner::market_cap::{CapRecord, CapSource, MarketCapError, MarketCapFilter};
use perp_scanner::notify::{Alert, DeliveryOutcome, Notifier};
use perp_scanner::scanner::Scanner;
use perp_scanner::signal::ConditionTag;
use perp_scanner::tracker::PerformanceUpdate;
use rust_decimal_macros::dec;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const EXCHANGE_INFO: &str = r#"{
    "symbols": [
        {"symbol": "XUSDT", "baseAsset": "X", "quoteAsset": "USDT", "contractType": "PERPETUAL", "status": "TRADING"},
        {"symbol": "YUSDT", "baseAsset": "Y", "quoteAsset": "USDT", "contractType": "PERPETUAL", "status": "TRADING"}
    ]
}"#;

const MARK_PRICES: &str = r#"[
    {"symbol": "XUSDT", "markPrice": "0.5120"},
    {"symbol": "BTCUSDT", "markPrice": "64000.10"}
]"#;

/// 15m kline rows, all closed: `baseline_len` at `baseline` quote volume,
/// then one at `recent`
fn klines(baseline: u64, recent: u64, baseline_len: usize) -> String {
    let start: i64 = 1_700_000_000_000;
    let step: i64 = 900_000;
    let rows: Vec<String> = (0..=baseline_len)
        .map(|i| {
            let open = start + step * i as i64;
            let volume = if i == baseline_len { recent } else { baseline };
            format!(
                r#"[{open}, "0.50", "0.52", "0.49", "0.51", "{volume}", {close}, "{volume}", 42, "0", "0", "0"]"#,
                close = open + step - 1
            )
        })
        .collect();
    format!("[{}]", rows.join(","))
}

struct NoCaps;

#[async_trait]
impl CapSource for NoCaps {
    async fn fetch_page(&self, _page: u32, _per_page: u32) -> Result<Vec<CapRecord>, MarketCapError> {
        Ok(Vec::new())
    }
}

#[derive(Default)]
struct Inbox {
    alerts: Mutex<Vec<Alert>>,
    updates: Mutex<Vec<PerformanceUpdate>>,
}

#[async_trait]
impl Notifier for Inbox {
    async fn deliver(&self, alert: &Alert) -> DeliveryOutcome {
        self.alerts.lock().unwrap().push(alert.clone());
        DeliveryOutcome::Delivered
    }

    async fn deliver_update(&self, update: &PerformanceUpdate) -> DeliveryOutcome {
        self.updates.lock().unwrap().push(update.clone());
        DeliveryOutcome::Delivered
    }

    async fn send_startup(&self, _summary: &str) -> DeliveryOutcome {
        DeliveryOutcome::Delivered
    }
}

async fn klines_mock(server: &mut ServerGuard, symbol: &str, body: String, hits: usize) -> Mock {
    server
        .mock("GET", "/fapi/v1/klines")
        .match_query(Matcher::UrlEncoded("symbol".into(), symbol.into()))
        .with_status(200)
        .with_body(body)
        .expect(hits)
        .create_async()
        .await
}

fn scanner_for(server: &ServerGuard, inbox: Arc<Inbox>) -> (Scanner, Arc<RateGovernor>) {
    let mut config = Config::default();
    config.exchange.base_url = server.url();
    config.scanner.cooldown_minutes = 720;
    let config = Arc::new(config);

    let governor = Arc::new(RateGovernor::from_config(&config.rate_limit));
    let retry = RetryPolicy {
        max_attempts: 2,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(2),
    };
    let exchange =
        BinanceClient::new(config.exchange.clone(), Arc::clone(&governor), retry).unwrap();
    let market_cap = MarketCapFilter::new(
        MarketCapConfig {
            enabled: false,
            ..MarketCapConfig::default()
        },
        Box::new(NoCaps),
    );

    let scanner = Scanner::new(
        config,
        Arc::new(exchange),
        Arc::new(market_cap),
        inbox,
    )
    .with_governor(Arc::clone(&governor));
    (scanner, governor)
}

#[tokio::test]
async fn test_spike_alerts_once_within_cooldown() {
    let mut server = Server::new_async().await;
    let info = server
        .mock("GET", "/fapi/v1/exchangeInfo")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(EXCHANGE_INFO)
        .expect(1)
        .create_async()
        .await;
    let _prices = server
        .mock("GET", "/fapi/v1/premiumIndex")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(MARK_PRICES)
        .create_async()
        .await;
    // X: 12000 against a 3000 baseline, only fetched on the first cycle
    let x = klines_mock(&mut server, "XUSDT", klines(3000, 12000, 20), 1).await;
    let y = klines_mock(&mut server, "YUSDT", klines(3000, 3000, 20), 2).await;

    let inbox = Arc::new(Inbox::default());
    let (scanner, governor) = scanner_for(&server, Arc::clone(&inbox));

    let first = scanner.run_cycle().await;
    assert_eq!(first.universe, 2);
    assert_eq!(first.alerts, 1);
    {
        let alerts = inbox.alerts.lock().unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].instrument.symbol, "XUSDT");
        assert_eq!(alerts[0].reasons, vec![ConditionTag::VolumeSpike]);
        assert_eq!(alerts[0].metrics.volume.ratio, Some(dec!(4)));
        assert_eq!(alerts[0].mark_price, Some(dec!(0.5120)));
        assert_eq!(alerts[0].btc_price, Some(dec!(64000.10)));
        assert_eq!(alerts[0].market_cap, None);
    }

    let second = scanner.run_cycle().await;
    assert_eq!(second.alerts, 0);
    assert_eq!(second.suppressed, 1);
    assert_eq!(inbox.alerts.lock().unwrap().len(), 1);
    // tracked from its mark price; unchanged price, no follow-ups
    assert_eq!(second.tracked, 1);
    assert!(inbox.updates.lock().unwrap().is_empty());

    // exchange info once, mark prices twice, three kline calls
    assert_eq!(governor.snapshot().await.consumed, 1 + 2 * 10 + 3);

    info.assert_async().await;
    x.assert_async().await;
    y.assert_async().await;
}

#[tokio::test]
async fn test_rejected_symbol_does_not_stop_cycle() {
    let mut server = Server::new_async().await;
    let _info = server
        .mock("GET", "/fapi/v1/exchangeInfo")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(EXCHANGE_INFO)
        .create_async()
        .await;
    let _prices = server
        .mock("GET", "/fapi/v1/premiumIndex")
        .match_query(Matcher::Any)
        .with_status(500)
        .create_async()
        .await;
    let x = server
        .mock("GET", "/fapi/v1/klines")
        .match_query(Matcher::UrlEncoded("symbol".into(), "XUSDT".into()))
        .with_status(400)
        .with_body(r#"{"code":-1121,"msg":"Invalid symbol."}"#)
        .expect(1)
        .create_async()
        .await;
    let _y = klines_mock(&mut server, "YUSDT", klines(1000, 5000, 20), 1).await;

    let inbox = Arc::new(Inbox::default());
    let (scanner, _) = scanner_for(&server, Arc::clone(&inbox));

    let report = scanner.run_cycle().await;
    assert_eq!(report.skipped, 1);
    assert_eq!(report.alerts, 1);

    let alerts = inbox.alerts.lock().unwrap();
    assert_eq!(alerts[0].instrument.symbol, "YUSDT");
    // mark prices failed, the alert still goes out without them
    assert_eq!(alerts[0].mark_price, None);
    assert_eq!(report.tracked, 0);
    x.assert_async().await;
}
