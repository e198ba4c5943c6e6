//! CLI interface for perp-scanner
//!
//! Provides subcommands for:
//! - `run`: Start the scan loop
//! - `config`: Show the effective configuration

mod run;

pub use run::RunArgs;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "perp-scanner")]
#[command(about = "Volume-spike scanner for Binance USDT-M perpetual futures")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", global = true)]
    pub config: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start scanning
    Run(RunArgs),
    /// Print the effective configuration with secrets masked
    Config,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_flags() {
        let cli = Cli::parse_from(["perp-scanner", "--config", "alt.toml", "run", "--once", "--dry-run"]);
        assert_eq!(cli.config, PathBuf::from("alt.toml"));
        match cli.command {
            Commands::Run(args) => {
                assert!(args.once);
                assert!(args.dry_run);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_default_config_path() {
        let cli = Cli::parse_from(["perp-scanner", "config"]);
        assert_eq!(cli.config, PathBuf::from("config.toml"));
        assert!(matches!(cli.command, Commands::Config));
    }
}
