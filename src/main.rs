use anyhow::Context;
use clap::Parser;
use rsi_screener::analysis::{self, RefreshContext};
use rsi_screener::comfy_table::print_snapshot;
use rsi_screener::klines::{PriceProvider, YahooProvider};
use rsi_screener::snapshot::SnapshotStore;
use rsi_screener::storage_utils::{AppConfig, AsyncStorageManager};
use rsi_screener::tui;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "rsi-screener", about = "Rank an equity universe by RSI")]
struct Cli {
    /// RSI smoothing period, overrides the config file
    #[arg(long)]
    period: Option<usize>,

    /// Print the table once and exit
    #[arg(long, conflicts_with = "watch")]
    once: bool,

    /// Reprint the table every refresh interval
    #[arg(long)]
    watch: bool,

    /// Directory holding config.json (defaults to storage/ next to the binary)
    #[arg(long)]
    storage: Option<PathBuf>,
}

fn init_logging(level: &str, log_file: Option<PathBuf>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match log_file {
        // The TUI owns the terminal, so logs go to a file instead.
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("opening log file {:?}", path))?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

async fn watch<F>(
    ctx: &RefreshContext,
    provider: &dyn PriceProvider,
    store: &SnapshotStore,
    every: Duration,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()>,
{
    // One listener for the whole loop so a signal during a refresh is not lost.
    tokio::pin!(shutdown);
    let mut interval = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = &mut shutdown => return Ok(()),
        }

        let outcome = tokio::select! {
            outcome = analysis::refresh_and_publish(ctx, provider, store) => outcome,
            _ = &mut shutdown => return Ok(()),
        };

        match outcome {
            Ok(Some(report)) => {
                if let Err(e) = clearscreen::clear() {
                    tracing::debug!(error = %e, "could not clear screen");
                }
                print_snapshot(&report.snapshot, report.skipped.len());
            }
            Ok(None) => {}
            // Keep the previous table on screen.
            Err(e) => eprintln!("Refresh failed: {}", e),
        }
    }
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "could not listen for ctrl-c");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let storage = match &cli.storage {
        Some(dir) => AsyncStorageManager::new(dir).await?,
        None => AsyncStorageManager::new_relative("storage").await?,
    };
    let mut config: AppConfig = storage.load_or_init("config").await?;
    if let Some(period) = cli.period {
        config.rsi_period = period;
    }

    let interactive = !cli.once && !cli.watch;
    init_logging(
        &config.log_level,
        interactive.then(|| storage.path_for("rsi-screener.log")),
    )?;
    config.validate().context("invalid configuration")?;

    tracing::info!(
        symbols = config.symbols.len(),
        period = config.rsi_period,
        lookback_months = config.lookback_months,
        "starting rsi-screener"
    );

    let provider: Arc<dyn PriceProvider> = Arc::new(YahooProvider::new(&config.provider)?);
    let store = Arc::new(SnapshotStore::new());
    let ctx = RefreshContext::from_config(&config);
    let every = Duration::from_secs(config.refresh_interval_secs.max(1));

    if cli.once {
        let report = analysis::refresh(&ctx, provider.as_ref()).await?;
        print_snapshot(&report.snapshot, report.skipped.len());
        for s in &report.skipped {
            eprintln!("skipped {}: {}", s.symbol, s.reason);
        }
        return Ok(());
    }

    if cli.watch {
        return watch(&ctx, provider.as_ref(), &store, every, ctrl_c()).await;
    }

    tui::run_tui(ctx, config.periods(), config.page_size, every, provider, store).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rsi_screener::error::FetchError;
    use rsi_screener::klines::{Lookback, PriceHistory};

    /// Never answers, so a refresh cycle hangs until cancelled.
    struct StalledProvider;

    #[async_trait]
    impl PriceProvider for StalledProvider {
        async fn fetch_daily(
            &self,
            _symbol: &str,
            _lookback: Lookback,
        ) -> Result<PriceHistory, FetchError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn shutdown_during_refresh_stops_watch() {
        let ctx = RefreshContext::from_config(&AppConfig::default());
        let store = SnapshotStore::new();
        let shutdown = tokio::time::sleep(Duration::from_millis(50));

        let finished = tokio::time::timeout(
            Duration::from_secs(5),
            watch(&ctx, &StalledProvider, &store, Duration::from_secs(3600), shutdown),
        )
        .await;

        assert!(matches!(finished, Ok(Ok(()))));
        assert!(store.current().is_none());
    }
}
