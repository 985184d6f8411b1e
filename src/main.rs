use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use byteset_pipeline::config::Config;
use byteset_pipeline::services::pipeline;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&config.logging.level)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let timeout = config.pipeline.timeout();
    let cancel = CancellationToken::new();

    let watchdog = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => warn!("Pipe timed out after {:?}", timeout),
                _ = tokio::signal::ctrl_c() => warn!("Interrupted"),
            }
            cancel.cancel();
        }
    });

    let result = pipeline::run(&config, cancel).await;
    watchdog.abort();

    let report = result
        .map_err(|e| {
            error!("Pipe failed: {}", e);
            e
        })
        .context("Pipe failed")?;

    info!(
        "Done: {} statements executed, {} skipped in {:?}",
        report.stats.executed, report.stats.skipped, report.cost
    );
    Ok(())
}
