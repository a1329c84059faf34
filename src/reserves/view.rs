//! Reserve View
//!
//! Purpose:
//!     Maintain a live, cached view of {venue, tokenA, tokenB} ->
//!     reserves. Pairs are discovered once at startup through each
//!     venue's factory; reserves refresh every 5 s in parallel and are
//!     best-effort mirrored to the cache.
//!
//! Dependencies:
//!     - alloy (factory/pair view calls)
//!     - dashmap (atomic per-key replacement; readers may see a mix of
//!       old and new records across keys during a refresh, never a
//!       half-updated record for one key)
//!     - futures (join_all parallel refresh)

use alloy::primitives::{Address, U256};
use alloy::providers::Provider;
use anyhow::Result;
use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

use crate::cache::CacheClient;
use crate::chain::ChainClient;
use crate::config::PipelineConfig;
use crate::contracts::{IUniswapV2Factory, IUniswapV2Pair};
use crate::types::{max_trade_amount, PairDescriptor, PoolReserves};

/// Refresh cadence for the whole descriptor set.
const REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// TTL on the cache mirror of each reserves record.
const MIRROR_TTL_SECS: u64 = 60;

pub type ReserveKey = (String, Address, Address);
pub type ReserveMap = Arc<DashMap<ReserveKey, PoolReserves>>;

/// Decimal-adjusted mid-price of `token_in` in `token_out` for one pool
/// record, using configured token decimals.
pub fn pool_mid_price(
    config: &PipelineConfig,
    reserves: &PoolReserves,
    token_in: Address,
    token_out: Address,
) -> Option<f64> {
    let decimals_in = config.token(token_in)?.decimals;
    let decimals_out = config.token(token_out)?.decimals;
    reserves.mid_price(token_in, token_out, decimals_in, decimals_out)
}

/// Depth-binned max trade size for `token` on this pool, in human
/// units. None when the token is unknown or not in the pool; 0.0
/// disables the pair.
pub fn pool_max_trade(
    config: &PipelineConfig,
    reserves: &PoolReserves,
    token: Address,
) -> Option<f64> {
    let decimals = config.token(token)?.decimals;
    let raw = reserves.reserve_of(token)?;
    let human = raw.to::<u128>() as f64 / 10_f64.powi(decimals as i32);
    Some(max_trade_amount(human, config.is_wrapped_native(token)))
}

/// Live reserves across all discovered venue pools. Exclusively owns
/// the descriptor set; the detector reads the map through a shared
/// handle without locking.
pub struct ReserveView {
    config: Arc<PipelineConfig>,
    chain: ChainClient,
    cache: CacheClient,
    descriptors: Vec<PairDescriptor>,
    reserves: ReserveMap,
}

impl ReserveView {
    pub fn new(config: Arc<PipelineConfig>, chain: ChainClient, cache: CacheClient) -> Self {
        Self {
            config,
            chain,
            cache,
            descriptors: Vec::new(),
            reserves: Arc::new(DashMap::new()),
        }
    }

    /// Shared handle for snapshot readers (the detector).
    pub fn reserves_handle(&self) -> ReserveMap {
        self.reserves.clone()
    }

    pub fn descriptors(&self) -> &[PairDescriptor] {
        &self.descriptors
    }

    /// Startup discovery: for each configured pair on each venue, ask
    /// the factory for the pool and record the on-chain token order.
    /// Zero-address responses and RPC failures log and skip; discovery
    /// is idempotent given unchanged factories.
    pub async fn discover(&mut self) -> Result<()> {
        let provider = self.chain.provider();
        let mut discovered = Vec::new();

        for &(token_a, token_b) in &self.config.pairs {
            for venue in &self.config.venues {
                let factory = IUniswapV2Factory::new(venue.factory, provider.clone());
                let pair_address = match factory.getPair(token_a, token_b).call().await {
                    Ok(addr) => addr,
                    Err(e) => {
                        warn!(
                            "getPair failed on {} for {}/{}: {}",
                            venue.name,
                            self.config.symbol_of(token_a),
                            self.config.symbol_of(token_b),
                            e
                        );
                        continue;
                    }
                };
                if pair_address == Address::ZERO {
                    debug!(
                        "No {} pool for {}/{}",
                        venue.name,
                        self.config.symbol_of(token_a),
                        self.config.symbol_of(token_b)
                    );
                    continue;
                }

                let pair = IUniswapV2Pair::new(pair_address, provider.clone());
                let (token0, token1) = match (pair.token0().call().await, pair.token1().call().await)
                {
                    (Ok(t0), Ok(t1)) => (t0, t1),
                    (Err(e), _) | (_, Err(e)) => {
                        warn!("Token order lookup failed for {:?}: {}", pair_address, e);
                        continue;
                    }
                };

                let descriptor = PairDescriptor {
                    venue: venue.name.clone(),
                    token_a,
                    token_b,
                    token0,
                    token1,
                    pair_address,
                };
                info!(
                    "Discovered {} {}/{} pool at {:?}",
                    venue.name,
                    self.config.symbol_of(token_a),
                    self.config.symbol_of(token_b),
                    pair_address
                );
                discovered.push(descriptor);
            }
        }

        self.descriptors = discovered;
        info!("Pair discovery complete: {} pools", self.descriptors.len());

        // Seed the map so the detector has data before the first tick.
        self.refresh_all().await;
        Ok(())
    }

    /// Refresh every discovered pool concurrently. A failed fetch keeps
    /// the previous record for that key; a successful one replaces it
    /// atomically.
    pub async fn refresh_all(&self) {
        let provider = self.chain.provider();

        let fetches = self.descriptors.iter().map(|descriptor| {
            let provider = provider.clone();
            let descriptor = descriptor.clone();
            async move {
                let pair = IUniswapV2Pair::new(descriptor.pair_address, provider.clone());
                let reserves = pair.getReserves().call().await;
                let block = provider.get_block_number().await;
                match (reserves, block) {
                    (Ok(r), Ok(block_number)) => Some(PoolReserves {
                        descriptor,
                        reserve0: U256::from(r.reserve0),
                        reserve1: U256::from(r.reserve1),
                        block_number,
                        fetched_at: Utc::now(),
                    }),
                    (Err(e), _) => {
                        warn!("getReserves failed for {:?}: {}", descriptor.pair_address, e);
                        None
                    }
                    (_, Err(e)) => {
                        warn!("Block number fetch failed during refresh: {}", e);
                        None
                    }
                }
            }
        });

        for record in join_all(fetches).await.into_iter().flatten() {
            if !record.is_consistent() {
                warn!(
                    "Inconsistent reserves for {:?} (one side zero) — keeping previous record",
                    record.descriptor.pair_address
                );
                continue;
            }
            self.mirror(&record).await;
            self.reserves.insert(record.descriptor.key(), record);
        }
    }

    /// Best-effort cache mirror under `reserves:<venue>-<tokenA>-<tokenB>`.
    async fn mirror(&self, record: &PoolReserves) {
        let key = format!(
            "reserves:{}-{:?}-{:?}",
            record.descriptor.venue, record.descriptor.token_a, record.descriptor.token_b
        );
        match serde_json::to_string(record) {
            Ok(json) => {
                if self.cache.set_with_ttl(&key, &json, MIRROR_TTL_SECS).await.is_err() {
                    debug!("Reserves mirror write dropped (cache unavailable)");
                }
            }
            Err(e) => warn!("Reserves mirror serialize failed: {}", e),
        }
    }

    /// Periodic refresh loop; runs until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut tick = interval(REFRESH_INTERVAL);
        loop {
            tokio::select! {
                _ = tick.tick() => self.refresh_all().await,
                _ = shutdown.changed() => {
                    info!("Reserve view shutting down");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;

    fn seeded(config: &PipelineConfig, r0: u128, r1: u128) -> PoolReserves {
        let (wavax, usdc) = config.pairs[0];
        PoolReserves {
            descriptor: PairDescriptor {
                venue: "TraderJoe".to_string(),
                token_a: wavax,
                token_b: usdc,
                token0: wavax,
                token1: usdc,
                pair_address: Address::repeat_byte(0x42),
            },
            reserve0: U256::from(r0),
            reserve1: U256::from(r1),
            block_number: 1,
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn test_pool_mid_price_uses_configured_decimals() {
        let config = PipelineConfig::default_mainnet();
        let (wavax, usdc) = config.pairs[0];
        let record = seeded(&config, 1_000_000_000_000_000_000_000_000, 42_000_000_000_000);
        let price = pool_mid_price(&config, &record, wavax, usdc).unwrap();
        assert!((price - 42.0).abs() < 1e-9);
    }

    #[test]
    fn test_pool_mid_price_unknown_token_is_none() {
        let config = PipelineConfig::default_mainnet();
        let record = seeded(&config, 1_000, 2_000);
        let stranger = Address::repeat_byte(0x99);
        assert!(pool_mid_price(&config, &record, stranger, config.pairs[0].1).is_none());
    }

    #[test]
    fn test_pool_max_trade_native_cap() {
        let config = PipelineConfig::default_mainnet();
        let (wavax, _) = config.pairs[0];
        // 10^6 WAVAX reserve -> 2% bin, clamped to the native cap of 10
        let record = seeded(&config, 1_000_000_000_000_000_000_000_000, 42_000_000_000_000);
        let max = pool_max_trade(&config, &record, wavax).unwrap();
        assert!((max - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_pool_max_trade_non_native_bin() {
        let config = PipelineConfig::default_mainnet();
        let (_, usdc) = config.pairs[0];
        // 500 USDC (6 decimals) -> 5% bin = 25
        let record = seeded(&config, 1_000_000_000_000_000_000_000, 500_000_000);
        let max = pool_max_trade(&config, &record, usdc).unwrap();
        assert!((max - 25.0).abs() < 1e-12);
    }
}
