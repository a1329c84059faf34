//! Mempool ingestion stage entry point.

use anyhow::Result;
use avaxarb_bot::{CacheClient, ChainClient, MempoolIngestor, PipelineConfig};
use std::sync::Arc;
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
        "Mempool ingestor starting | network={:?} | chain_id={} | routers={}",
        config.network,
        config.chain_id,
        config.venues.len()
    );

    let chain = ChainClient::connect(&config.rpc_url, &config.ws_url).await?;
    let cache = CacheClient::connect(&config.redis_url, &config.mev.cache_key_prefix);

    let mut ingestor = MempoolIngestor::new(config, chain, cache);
    ingestor.start();

    tokio::signal::ctrl_c().await?;
    info!("Termination signal received");
    ingestor.stop().await;
    Ok(())
}
