//! TallySync - offline-first transaction sync daemon
//!
//! Loads configuration, starts every background component and runs until
//! Ctrl-C, then shuts down and flushes the cache.

use anyhow::Context;
use tallysync_app::{init_tracing, AppContext};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional; a missing file is not an error
    let dotenv = dotenvy::dotenv();

    let config = tallysync_infra::config::load().context("failed to load configuration")?;
    init_tracing(&config.logging).context("failed to initialise logging")?;

    match dotenv {
        Ok(path) => info!(path = %path.display(), "Loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => warn!(error = %e, "Could not read .env file"),
    }

    info!(
        db_path = %config.database.path.display(),
        remote = %config.remote.base_url,
        realtime = config.realtime.enabled,
        "TallySync starting"
    );

    let ctx = AppContext::new(config).await.context("failed to build application context")?;
    ctx.start().await.context("failed to start application context")?;

    tokio::signal::ctrl_c().await.context("failed to listen for Ctrl-C")?;
    info!("Shutdown signal received");

    ctx.shutdown().await.context("shutdown did not complete cleanly")?;
    info!("TallySync stopped");
    Ok(())
}
