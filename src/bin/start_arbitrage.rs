//! Arbitrage detection stage entry point: reserve view + detector.

use anyhow::Result;
use avaxarb_bot::{ArbDetector, CacheClient, ChainClient, PipelineConfig, ReserveView};
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
        "Arbitrage detector starting | network={:?} | pairs={} | venues={}",
        config.network,
        config.pairs.len(),
        config.venues.len()
    );

    let chain = ChainClient::connect(&config.rpc_url, &config.ws_url).await?;
    let cache = CacheClient::connect(&config.redis_url, &config.mev.cache_key_prefix);

    let mut view = ReserveView::new(config.clone(), chain, cache.clone());
    view.discover().await?;
    let reserves = view.reserves_handle();
    let view = Arc::new(view);

    let detector = ArbDetector::new(config, cache, reserves);

    let (shutdown_tx, _) = watch::channel(false);

    let view_handle = {
        let view = view.clone();
        let shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move { view.run(shutdown).await })
    };
    let detector_handle = {
        let shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move { detector.run(shutdown).await })
    };

    tokio::signal::ctrl_c().await?;
    info!("Termination signal received");
    let _ = shutdown_tx.send(true);
    let _ = timeout(Duration::from_secs(5), async {
        let _ = view_handle.await;
        let _ = detector_handle.await;
    })
    .await;
    Ok(())
}
