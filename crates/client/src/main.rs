use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use color_eyre::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use skiff_client::{Config, FileSync, events, sync};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::parse();
    info!(
        groups = config.groups.join(", "),
        http = config.http_server,
        rpc = config.rpc_server,
        "starting"
    );

    let file_sync = Arc::new(FileSync::new(&config.cache_path, &config.http_server)?);
    let (scan_tx, scan_rx) = tokio::sync::mpsc::channel(4);

    // First sync before settling into the loops; a failure here is
    // retried by the poll loop, not fatal.
    if let Err(err) = file_sync.check(&config.rpc_server, &config.groups).await {
        warn!(%err, "initial check failed");
    }

    let check_interval = Duration::from_secs(config.check_interval_secs);
    tokio::try_join!(
        sync::run_poll_loop(
            &file_sync,
            &config.rpc_server,
            &config.groups,
            check_interval,
            scan_rx,
        ),
        events::run_event_stream(&config, &file_sync, scan_tx),
    )?;

    Ok(())
}
