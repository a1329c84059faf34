//! Opportunity Detector
//!
//! Scans the live reserves view every 2 s, pairwise-compares the venues
//! holding each configured pair, and publishes gas-aware opportunities
//! to the cache under stable keys with hysteresis-gated rewrites.
//!
//! The tick reads a snapshot of the reserves map without locking:
//! bounded staleness is preferable to stalling the loop.

use alloy::primitives::Address;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

use crate::cache::CacheClient;
use crate::config::PipelineConfig;
use crate::reserves::{pool_max_trade, pool_mid_price, ReserveMap};
use crate::types::{ArbitrageOpportunity, PoolReserves};

/// Detection cadence.
const TICK_INTERVAL: Duration = Duration::from_secs(2);

/// Fixed gas model for one two-swap bundle.
const ESTIMATED_GAS_UNITS: u64 = 300_000;
const ASSUMED_GAS_PRICE_GWEI: f64 = 25.0;

/// Construction gate: opportunities at or below this profit are noise.
const MIN_PROFIT_PERCENT: f64 = 0.1;

/// Publication gate: only gaps above this reach the cache.
const PUBLISH_PROFIT_PERCENT: f64 = 0.5;

/// Rewrite suppression threshold in percentage points.
const HYSTERESIS_PP: f64 = 0.1;

const OPPORTUNITY_TTL_SECS: u64 = 60;

/// Hysteresis predicate: write only when no prior entry exists or the
/// profit moved by at least the threshold. Dampens rewrite storms when
/// prices oscillate near a gap.
pub fn should_rewrite(previous_profit: Option<f64>, new_profit: f64) -> bool {
    match previous_profit {
        Some(prev) => (new_profit - prev).abs() >= HYSTERESIS_PP,
        None => true,
    }
}

pub struct ArbDetector {
    config: Arc<PipelineConfig>,
    cache: CacheClient,
    reserves: ReserveMap,
}

impl ArbDetector {
    pub fn new(config: Arc<PipelineConfig>, cache: CacheClient, reserves: ReserveMap) -> Self {
        Self {
            config,
            cache,
            reserves,
        }
    }

    /// Detection loop; runs until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut tick = interval(TICK_INTERVAL);
        loop {
            tokio::select! {
                _ = tick.tick() => self.scan_once().await,
                _ = shutdown.changed() => {
                    info!("Arbitrage detector shutting down");
                    return;
                }
            }
        }
    }

    /// One detector tick over every configured pair.
    pub async fn scan_once(&self) {
        for &(token_a, token_b) in &self.config.pairs {
            let records = self.snapshot(token_a, token_b);
            let opportunities = self.detect_for_pair(token_a, token_b, &records);
            for opportunity in opportunities {
                self.publish(&opportunity).await;
            }
        }
    }

    /// Clone the current records for all venues holding this pair. The
    /// refresh loop may replace entries while we iterate; each clone is
    /// internally consistent.
    fn snapshot(&self, token_a: Address, token_b: Address) -> Vec<PoolReserves> {
        self.config
            .venues
            .iter()
            .filter_map(|venue| {
                self.reserves
                    .get(&(venue.name.clone(), token_a, token_b))
                    .map(|entry| entry.value().clone())
            })
            .collect()
    }

    /// Pairwise comparison across the venue records for one token pair.
    pub fn detect_for_pair(
        &self,
        token_a: Address,
        token_b: Address,
        records: &[PoolReserves],
    ) -> Vec<ArbitrageOpportunity> {
        let mut opportunities = Vec::new();
        if records.len() < 2 {
            return opportunities;
        }
        for i in 0..records.len() {
            for j in (i + 1)..records.len() {
                if let Some(opportunity) =
                    self.build_opportunity(token_a, token_b, &records[i], &records[j])
                {
                    info!(
                        "OPPORTUNITY: {}/{} | Buy {} @ {:.6} | Sell {} @ {:.6} | {:.3}% | trade [{:.4}, {:.4}]",
                        self.config.symbol_of(token_a),
                        self.config.symbol_of(token_b),
                        opportunity.buy_venue,
                        opportunity.buy_price,
                        opportunity.sell_venue,
                        opportunity.sell_price,
                        opportunity.profit_percent,
                        opportunity.min_trade,
                        opportunity.max_trade,
                    );
                    opportunities.push(opportunity);
                }
            }
        }
        opportunities
    }

    /// Construct one opportunity from an unordered venue pair, applying
    /// the sizing model and all gates. None when any gate rejects.
    fn build_opportunity(
        &self,
        token_a: Address,
        token_b: Address,
        first: &PoolReserves,
        second: &PoolReserves,
    ) -> Option<ArbitrageOpportunity> {
        let price_first = pool_mid_price(&self.config, first, token_a, token_b)?;
        let price_second = pool_mid_price(&self.config, second, token_a, token_b)?;

        // Lower mid-price is the buy side. Exactly equal prices yield
        // no opportunity (gap and profit are zero, gated below).
        let (buy, buy_price, sell, sell_price) = if price_first <= price_second {
            (first, price_first, second, price_second)
        } else {
            (second, price_second, first, price_first)
        };

        let price_gap = sell_price - buy_price;
        let profit_percent = price_gap / buy_price * 100.0;
        if profit_percent <= MIN_PROFIT_PERCENT {
            return None;
        }

        // Fixed gas model, converted to tokenA units. For non-native
        // tokenA the buy price serves as a rough change of basis.
        let gas_cost_native =
            ESTIMATED_GAS_UNITS as f64 * ASSUMED_GAS_PRICE_GWEI * 1e9 / 1e18;
        let gas_in_token_a = if self.config.is_wrapped_native(token_a) {
            gas_cost_native
        } else {
            gas_cost_native / buy_price
        };

        let max_trade = pool_max_trade(&self.config, buy, token_a)?
            .min(pool_max_trade(&self.config, sell, token_a)?);

        let profit_margin = price_gap / buy_price;
        let min_trade = (gas_in_token_a / profit_margin).max(0.01 * max_trade);

        if max_trade <= 0.0 || min_trade > max_trade {
            debug!(
                "Rejected {}->{} gap {:.3}%: trade bounds [{:.6}, {:.6}] infeasible",
                buy.descriptor.venue, sell.descriptor.venue, profit_percent, min_trade, max_trade
            );
            return None;
        }

        Some(ArbitrageOpportunity {
            token_a,
            token_b,
            buy_venue: buy.descriptor.venue.clone(),
            sell_venue: sell.descriptor.venue.clone(),
            buy_price,
            sell_price,
            price_gap,
            profit_percent,
            estimated_gas: ESTIMATED_GAS_UNITS,
            min_trade,
            max_trade,
            detected_at: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        })
    }

    /// Publication with the >0.5% gate and hysteresis against the prior
    /// record under the stable key. Cache unavailability drops the
    /// write; detection keeps running in-process.
    async fn publish(&self, opportunity: &ArbitrageOpportunity) {
        if opportunity.profit_percent <= PUBLISH_PROFIT_PERCENT {
            return;
        }
        let key = opportunity.stable_key();

        let previous_profit = match self.cache.get(&key).await {
            Ok(Some(json)) => serde_json::from_str::<ArbitrageOpportunity>(&json)
                .map(|prev| prev.profit_percent)
                .ok(),
            Ok(None) => None,
            Err(_) => {
                debug!("Opportunity write dropped (cache unavailable)");
                return;
            }
        };

        if !should_rewrite(previous_profit, opportunity.profit_percent) {
            debug!(
                "Hysteresis suppressed rewrite of {} ({:.3}% vs {:.3}%)",
                key,
                opportunity.profit_percent,
                previous_profit.unwrap_or(f64::NAN)
            );
            return;
        }

        match serde_json::to_string(opportunity) {
            Ok(json) => {
                if self
                    .cache
                    .set_with_ttl(&key, &json, OPPORTUNITY_TTL_SECS)
                    .await
                    .is_err()
                {
                    debug!("Opportunity write dropped (cache unavailable)");
                }
            }
            Err(e) => warn!("Opportunity serialize failed: {}", e),
        }
    }

    /// All currently published opportunities, sorted descending by
    /// profit percent. Cache unavailability yields an empty list.
    pub async fn get_current_opportunities(&self) -> Vec<ArbitrageOpportunity> {
        load_published_opportunities(&self.cache).await
    }
}

/// Enumerate published opportunities from the cache, sorted descending
/// by profit percent. Shared with the simulator stage, which reads the
/// same keys from its own process. Cache unavailability yields an empty
/// list.
pub async fn load_published_opportunities(cache: &CacheClient) -> Vec<ArbitrageOpportunity> {
    let keys = match cache.keys_by_prefix("opportunity:").await {
        Ok(keys) => keys,
        Err(_) => return Vec::new(),
    };

    let mut opportunities = Vec::with_capacity(keys.len());
    for key in keys {
        if let Ok(Some(json)) = cache.get(&key).await {
            match serde_json::from_str::<ArbitrageOpportunity>(&json) {
                Ok(opportunity) => opportunities.push(opportunity),
                Err(e) => debug!("Corrupt opportunity record {}: {}", key, e),
            }
        }
    }
    opportunities.sort_by(|a, b| {
        b.profit_percent
            .partial_cmp(&a.profit_percent)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    opportunities
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PairDescriptor;
    use alloy::primitives::{Address, U256};
    use chrono::Utc;
    use dashmap::DashMap;

    fn detector() -> (ArbDetector, Address, Address) {
        let config = Arc::new(PipelineConfig::default_mainnet());
        let (wavax, usdc) = config.pairs[0];
        let detector = ArbDetector::new(
            config,
            CacheClient::disconnected("mev:"),
            Arc::new(DashMap::new()),
        );
        (detector, wavax, usdc)
    }

    fn record(venue: &str, token_a: Address, token_b: Address, r0: u128, r1: u128) -> PoolReserves {
        PoolReserves {
            descriptor: PairDescriptor {
                venue: venue.to_string(),
                token_a,
                token_b,
                token0: token_a,
                token1: token_b,
                pair_address: Address::repeat_byte(0x42),
            },
            reserve0: U256::from(r0),
            reserve1: U256::from(r1),
            block_number: 1,
            fetched_at: Utc::now(),
        }
    }

    const WAVAX_RESERVE: u128 = 1_000_000_000_000_000_000_000_000; // 10^6 WAVAX

    #[test]
    fn test_detects_cross_venue_gap() {
        let (detector, wavax, usdc) = detector();
        // TraderJoe at 42.0, Pangolin at 42.3 -> buy TraderJoe, ~0.714%
        let records = vec![
            record("TraderJoe", wavax, usdc, WAVAX_RESERVE, 42_000_000_000_000),
            record("Pangolin", wavax, usdc, WAVAX_RESERVE, 42_300_000_000_000),
        ];

        let opportunities = detector.detect_for_pair(wavax, usdc, &records);
        assert_eq!(opportunities.len(), 1);

        let opp = &opportunities[0];
        assert_eq!(opp.buy_venue, "TraderJoe");
        assert_eq!(opp.sell_venue, "Pangolin");
        assert!((opp.profit_percent - 0.714).abs() < 1e-2, "got {}", opp.profit_percent);
        assert!(opp.min_trade < opp.max_trade);
        // Max trade respects the 2% depth bin on a 10^6 WAVAX pool
        assert!(opp.max_trade <= 0.02 * 1_000_000.0);
        assert!(opp.holds_invariants());
    }

    #[test]
    fn test_equal_prices_yield_nothing() {
        let (detector, wavax, usdc) = detector();
        let records = vec![
            record("TraderJoe", wavax, usdc, WAVAX_RESERVE, 42_000_000_000_000),
            record("Pangolin", wavax, usdc, WAVAX_RESERVE, 42_000_000_000_000),
        ];
        assert!(detector.detect_for_pair(wavax, usdc, &records).is_empty());
    }

    #[test]
    fn test_single_venue_yields_nothing() {
        let (detector, wavax, usdc) = detector();
        let records = vec![record(
            "TraderJoe",
            wavax,
            usdc,
            WAVAX_RESERVE,
            42_000_000_000_000,
        )];
        assert!(detector.detect_for_pair(wavax, usdc, &records).is_empty());
    }

    #[test]
    fn test_sub_threshold_gap_rejected() {
        let (detector, wavax, usdc) = detector();
        // 42.00 vs 42.02 is ~0.048%, below the 0.1% construction gate
        let records = vec![
            record("TraderJoe", wavax, usdc, WAVAX_RESERVE, 42_000_000_000_000),
            record("Pangolin", wavax, usdc, WAVAX_RESERVE, 42_020_000_000_000),
        ];
        assert!(detector.detect_for_pair(wavax, usdc, &records).is_empty());
    }

    #[test]
    fn test_gas_floor_rejects_shallow_pools() {
        let (detector, wavax, usdc) = detector();
        // 0.004 WAVAX pools: max trade floors at 0.001 while the gas
        // break-even needs several WAVAX at this margin
        let records = vec![
            record("TraderJoe", wavax, usdc, 4_000_000_000_000_000, 168_000),
            record("Pangolin", wavax, usdc, 4_000_000_000_000_000, 168_500),
        ];
        assert!(detector.detect_for_pair(wavax, usdc, &records).is_empty());
    }

    #[test]
    fn test_hysteresis_predicate() {
        // No prior entry: write
        assert!(should_rewrite(None, 0.71));
        // 0.02 pp move: suppressed
        assert!(!should_rewrite(Some(0.71), 0.73));
        // 0.14 pp move: rewritten
        assert!(should_rewrite(Some(0.71), 0.85));
        // Downward moves count too
        assert!(should_rewrite(Some(0.85), 0.71));
    }

    #[tokio::test]
    async fn test_opportunities_empty_when_cache_down() {
        let (detector, _, _) = detector();
        assert!(detector.get_current_opportunities().await.is_empty());
    }
}
