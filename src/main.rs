use std::sync::Arc;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use account_workers::config::WorkerConfig;
use account_workers::error::Result;
use account_workers::reconciler::{Reconciler, ReconcilerHandle};
use account_workers::store::{AccountStore, LibSqlBackend};
use account_workers::worker::{LogSink, WorkerRegistry};

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // Keep the guard alive so buffered file logs are flushed on exit.
    let _log_guard = init_tracing();

    let config = WorkerConfig::from_env()?;

    eprintln!("Account workers v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", config.db_path.display());
    eprintln!(
        "   Poll interval: {}s, work period: {}s, max workers: {}",
        config.poll_interval.as_secs(),
        config.work_period.as_secs(),
        config.max_workers
    );

    let reconciler = start(&config).await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Ctrl+C received, shutting down...");

    let stopped = reconciler.shutdown().await;
    tracing::info!(stopped, "Shutdown complete");

    Ok(())
}

/// Open the store and launch the reconciliation loop.
async fn start(config: &WorkerConfig) -> Result<ReconcilerHandle> {
    // ── Database ─────────────────────────────────────────────────────────
    let store: Arc<dyn AccountStore> = Arc::new(LibSqlBackend::new_local(&config.db_path).await?);

    // ── Workers ──────────────────────────────────────────────────────────
    let registry = Arc::new(WorkerRegistry::new(config, Arc::new(LogSink)));
    Ok(Reconciler::new(store, registry, config.poll_interval).spawn())
}

/// Console logging, plus a daily rolling file when `ACCOUNT_WORKERS_LOG_DIR` is set.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = fmt::layer().with_target(false);

    match std::env::var("ACCOUNT_WORKERS_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "account-workers.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        Err(_) => {
            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .init();
            None
        }
    }
}
