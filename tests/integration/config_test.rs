//! Integration tests for configuration loading

use perp_scanner::config::{Config, ConfigError, Timeframe};
use rust_decimal_macros::dec;

fn example_path() -> std::path::PathBuf {
    std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("config.toml.example")
}

#[test]
fn test_config_example_loads() {
    let config = Config::load(example_path()).unwrap();

    assert_eq!(config.scanner.timeframe, Timeframe::M15);
    assert_eq!(config.scanner.volume_multiplier, dec!(3.0));
    assert_eq!(config.open_interest.min_increase_pct, dec!(5));
    assert!(config.scanner.excluded_symbols.contains("BTCUSDT"));
    assert_eq!(config.candles_needed(), 21);
    assert_eq!(config.tracker.max_age_hours, 72);
    assert!(config.tracker.reversal_enabled);
}

#[test]
fn test_config_example_needs_real_credentials() {
    let config = Config::load(example_path()).unwrap();

    assert!(matches!(
        config.validate(false),
        Err(ConfigError::MissingCredential { section: "telegram", .. })
    ));
    tokio_test::assert_ok!(config.validate(true));
}

#[test]
fn test_invalid_toml_fails_to_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[scanner\ntimeframe = 15").unwrap();

    assert!(Config::load(&path).is_err());
}
