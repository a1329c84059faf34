//! Bundle simulation stage entry point.

use anyhow::{anyhow, Result};
use avaxarb_bot::{BundleSimulator, CacheClient, ChainClient, PipelineConfig};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{timeout, Duration};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = Arc::new(PipelineConfig::from_env()?);
    info!(
        "Bundle simulator starting | network={:?} | fast={} | base_port={}",
        config.network, config.mev.fast_simulation, config.sandbox.base_port
    );

    let chain = ChainClient::connect(&config.rpc_url, &config.ws_url).await?;
    let cache = CacheClient::connect(&config.redis_url, &config.mev.cache_key_prefix);

    // Sandbox startup failure is fatal to this stage.
    let mut simulator = BundleSimulator::start(config, chain)
        .await
        .map_err(|e| anyhow!("simulator startup: {}", e))?;
    info!("Sandbox running at {}", simulator.sandbox_endpoint());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        simulator.run(&cache, shutdown_rx).await;
    });

    tokio::signal::ctrl_c().await?;
    info!("Termination signal received");
    let _ = shutdown_tx.send(true);
    // The simulator waits up to 5 s for the subprocess on its own.
    let _ = timeout(Duration::from_secs(10), handle).await;
    Ok(())
}
