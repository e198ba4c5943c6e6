//! Integration tests for the market cap filter against a mocked CoinGecko

use mockito::{Matcher, Server};
use perp_scanner::config::MarketCapConfig;
use perp_scanner::exchange::{Instrument, RetryPolicy};
use perp_scanner::market_cap::{CoinGeckoSource, Eligibility, MarketCapFilter};
use rust_decimal_macros::dec;
use std::time::Duration;

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(2),
    }
}

#[tokio::test]
async fn test_coingecko_pages_feed_filter() {
    let mut server = Server::new_async().await;
    let page1 = server
        .mock("GET", "/coins/markets")
        .match_query(Matcher::UrlEncoded("page".into(), "1".into()))
        .with_status(200)
        .with_body(
            r#"[
                {"id": "bitcoin", "symbol": "btc", "market_cap": 1300000000000, "last_updated": "2024-03-01T12:00:00.000Z"},
                {"id": "solana", "symbol": "sol", "market_cap": 80000000000, "last_updated": "2024-03-01T12:00:00.000Z"}
            ]"#,
        )
        .expect(1)
        .create_async()
        .await;
    let page2 = server
        .mock("GET", "/coins/markets")
        .match_query(Matcher::UrlEncoded("page".into(), "2".into()))
        .with_status(200)
        .with_body(
            r#"[
                {"id": "pepe", "symbol": "pepe", "market_cap": 45000000, "last_updated": null},
                {"id": "ghost", "symbol": "ghost", "market_cap": null, "last_updated": null}
            ]"#,
        )
        .expect(1)
        .create_async()
        .await;

    let config = MarketCapConfig {
        base_url: server.url(),
        per_page: 2,
        page_delay_ms: 0,
        ..MarketCapConfig::default()
    };
    let source = CoinGeckoSource::new(&config, fast_retry()).unwrap();
    let filter = MarketCapFilter::new(config, Box::new(source));

    // page 2 dips under the ceiling, so page 3 is never requested
    assert_eq!(filter.refresh().await.unwrap(), 3);

    let pepe = filter
        .eligibility(&Instrument::new("1000PEPEUSDT", "1000PEPE"))
        .await;
    assert_eq!(
        pepe,
        Eligibility::Included {
            market_cap: Some(dec!(45000000))
        }
    );

    let sol = filter.eligibility(&Instrument::new("SOLUSDT", "SOL")).await;
    assert!(!sol.is_included());

    let ghost = filter.eligibility(&Instrument::new("GHOSTUSDT", "GHOST")).await;
    assert_eq!(ghost, Eligibility::Included { market_cap: None });

    page1.assert_async().await;
    page2.assert_async().await;
}

#[tokio::test]
async fn test_unreachable_source_fails_open() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", "/coins/markets")
        .match_query(Matcher::Any)
        .with_status(503)
        .create_async()
        .await;

    let config = MarketCapConfig {
        base_url: server.url(),
        page_delay_ms: 0,
        ..MarketCapConfig::default()
    };
    let source = CoinGeckoSource::new(&config, fast_retry()).unwrap();
    let filter = MarketCapFilter::new(config, Box::new(source));

    filter.ensure_fresh().await;

    let any = filter.eligibility(&Instrument::new("SOLUSDT", "SOL")).await;
    assert_eq!(any, Eligibility::Included { market_cap: None });
}

#[tokio::test]
async fn test_rate_limited_second_page_keeps_first_page() {
    let mut server = Server::new_async().await;
    let _page1 = server
        .mock("GET", "/coins/markets")
        .match_query(Matcher::UrlEncoded("page".into(), "1".into()))
        .with_status(200)
        .with_body(
            r#"[
                {"id": "bitcoin", "symbol": "btc", "market_cap": 1300000000000, "last_updated": null},
                {"id": "ethereum", "symbol": "eth", "market_cap": 400000000000, "last_updated": null}
            ]"#,
        )
        .create_async()
        .await;
    let page2 = server
        .mock("GET", "/coins/markets")
        .match_query(Matcher::UrlEncoded("page".into(), "2".into()))
        .with_status(429)
        .expect(2)
        .create_async()
        .await;

    let config = MarketCapConfig {
        base_url: server.url(),
        per_page: 2,
        page_delay_ms: 0,
        ..MarketCapConfig::default()
    };
    let source = CoinGeckoSource::new(&config, fast_retry()).unwrap();
    let filter = MarketCapFilter::new(config, Box::new(source));

    filter.ensure_fresh().await;

    let btc = filter.eligibility(&Instrument::new("BTCUSDT", "BTC")).await;
    assert_eq!(
        btc,
        Eligibility::Excluded {
            market_cap: Some(dec!(1300000000000))
        }
    );
    page2.assert_async().await;
}
