use std::sync::Arc;

use clap::Parser;
use color_eyre::Result;
use color_eyre::eyre::WrapErr;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use skiff_server::http::{self, AppState};
use skiff_server::{Config, FileSetService, NotifyRegistry, rpc};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::parse();

    let files = {
        let definition_path = config.definition_path.clone();
        let cache_path = config.cache_path.clone();
        let workers = config.workers;
        tokio::task::spawn_blocking(move || {
            FileSetService::open(&definition_path, &cache_path, workers)
        })
        .await?
        .wrap_err("initial scan failed")?
    };
    let files = Arc::new(files);
    let registry = Arc::new(NotifyRegistry::new());

    let http_listener = TcpListener::bind(&config.http_listen_addr)
        .await
        .wrap_err_with(|| format!("binding http listener on {}", config.http_listen_addr))?;
    let rpc_listener = TcpListener::bind(&config.rpc_listen_addr)
        .await
        .wrap_err_with(|| format!("binding rpc listener on {}", config.rpc_listen_addr))?;

    info!(
        http = %config.http_listen_addr,
        rpc = %config.rpc_listen_addr,
        definition = %config.definition_path.display(),
        "serving"
    );

    let router = http::router(AppState {
        files: files.clone(),
        registry: registry.clone(),
    });

    tokio::try_join!(
        async { axum::serve(http_listener, router).await.map_err(Into::into) },
        rpc::serve(rpc_listener, files, registry),
    )?;

    Ok(())
}
