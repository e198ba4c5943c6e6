//! Integration tests

mod config_test;
mod market_cap_test;
mod scanner_test;
