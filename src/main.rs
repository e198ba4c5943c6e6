use anyhow::Context;
use clap::Parser;
use perp_scanner::cli::{Cli, Commands};
use perp_scanner::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config)
        .with_context(|| format!("Could not load config from {}", cli.config.display()))?;

    match cli.command {
        Commands::Run(args) => {
            let _telemetry = perp_scanner::telemetry::init_telemetry(&config.telemetry)?;
            tracing::info!(
                version = env!("CARGO_PKG_VERSION"),
                config = %cli.config.display(),
                "Starting perp-scanner"
            );
            args.execute(config).await?;
        }
        Commands::Config => {
            println!("{}", config.redacted_toml()?);
        }
    }

    Ok(())
}
