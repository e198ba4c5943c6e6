//! Run command implementation

use crate::config::Config;
use crate::exchange::{BinanceClient, RateGovernor, RetryPolicy};
use crate::market_cap::{CoinGeckoSource, MarketCapFilter};
use crate::notify::{startup_summary, DeliveryOutcome, LogNotifier, Notifier, TelegramNotifier};
use crate::scanner::Scanner;
use anyhow::Context;
use clap::Args;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Run a single cycle and exit
    #[arg(long)]
    pub once: bool,

    /// Log alerts instead of sending them
    #[arg(long)]
    pub dry_run: bool,
}

impl RunArgs {
    pub async fn execute(&self, config: Config) -> anyhow::Result<()> {
        if let Err(e) = config.validate(self.dry_run) {
            tracing::error!(error = %e, "Invalid configuration, refusing to start");
            return Err(e.into());
        }
        let config = Arc::new(config);

        let governor = Arc::new(RateGovernor::from_config(&config.rate_limit));
        let retry = RetryPolicy::from_config(&config.rate_limit);
        let exchange = BinanceClient::new(config.exchange.clone(), Arc::clone(&governor), retry.clone())
            .context("Failed to build exchange client")?;

        let source = CoinGeckoSource::new(&config.market_cap, retry)
            .context("Failed to build market cap client")?;
        let market_cap = MarketCapFilter::new(config.market_cap.clone(), Box::new(source));

        let notifier = self.build_notifier(&config).await?;

        let scanner = Scanner::new(
            Arc::clone(&config),
            Arc::new(exchange),
            Arc::new(market_cap),
            Arc::clone(&notifier),
        )
        .with_governor(governor);

        if self.once {
            tracing::info!("Running a single cycle");
            scanner.run_cycle().await;
            return Ok(());
        }

        if notifier.send_startup(&startup_summary(&config)).await != DeliveryOutcome::Delivered {
            tracing::warn!("Startup message was not delivered");
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            wait_for_shutdown_signal().await;
            tracing::info!("Initiating graceful shutdown...");
            let _ = shutdown_tx.send(true);
        });

        scanner.run(shutdown_rx).await;
        Ok(())
    }

    async fn build_notifier(&self, config: &Config) -> anyhow::Result<Arc<dyn Notifier>> {
        if self.dry_run {
            tracing::info!("Dry run: alerts are logged, not sent");
            return Ok(Arc::new(LogNotifier));
        }

        let retry = RetryPolicy {
            max_attempts: config.telegram.max_attempts.max(1),
            ..RetryPolicy::default()
        };
        let telegram = TelegramNotifier::new(&config.telegram, retry)?;
        telegram
            .validate()
            .await
            .context("Telegram validation failed")?;
        Ok(Arc::new(telegram))
    }
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
                    _ = sigint.recv() => tracing::info!("Received SIGINT"),
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(error = %e, "Signal handlers unavailable, falling back to Ctrl+C");
            }
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Received Ctrl+C");
}
