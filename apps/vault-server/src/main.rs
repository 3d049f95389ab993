//! chunkvault store server entry point.

mod config;

use std::sync::Arc;

use chunkvault_rpc::RpcServer;
use chunkvault_store::StoreService;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting chunkvault server"
    );

    let config = config::Config::load()?;
    tracing::info!(root = %config.store.root.display(), "configuration loaded");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(config))?;

    tracing::info!("server shut down cleanly");
    Ok(())
}

async fn run(config: config::Config) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let addr = config.listen_addr();
    let store = Arc::new(StoreService::new(config.store)?);

    let listener = RpcServer::bind(addr).await?;
    let server = RpcServer::new(store, cancel.clone());
    let serving = tokio::spawn(async move { server.serve(listener).await });

    tokio::signal::ctrl_c().await?;
    tracing::info!("SIGINT received, shutting down");
    cancel.cancel();

    serving.await??;
    Ok(())
}
