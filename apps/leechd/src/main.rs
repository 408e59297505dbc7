//! leechd entry point.

mod app;
mod commands;
mod config;
mod mirror;
mod notifier;
mod sink;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting leechd");

    let config = config::Config::load()?;
    tracing::info!(
        work_dir = %config.work_dir.display(),
        outbox = %config.outbox_dir.display(),
        "configuration loaded"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config))?;

    tracing::info!("leechd shut down cleanly");
    Ok(())
}
