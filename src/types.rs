// Core data structures shared by the three pipeline stages.

use alloy::primitives::{Address, Bytes, B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Token configuration. Immutable after config load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub address: Address,
    /// Decimal exponent, validated to [0, 36] at config load. Default 18.
    pub decimals: u8,
    pub symbol: Option<String>,
}

impl Token {
    pub fn new(address: Address, decimals: u8, symbol: Option<String>) -> Self {
        Self {
            address,
            decimals,
            symbol,
        }
    }
}

/// Venue protocol families we support.
/// Currently every venue is a Uniswap-V2-style constant-product AMM;
/// the calldata decoder and the reserve reader select their handler by
/// this tag rather than by trait objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VenueKind {
    ConstantProductV2,
}

impl VenueKind {
    /// Single-swap fee for the family. V2 forks all charge 0.30%.
    pub fn fee_percent(&self) -> f64 {
        match self {
            VenueKind::ConstantProductV2 => 0.30,
        }
    }
}

impl fmt::Display for VenueKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            VenueKind::ConstantProductV2 => write!(f, "ConstantProductV2"),
        }
    }
}

/// Liquidity venue configuration. Immutable after config load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Venue {
    pub name: String,
    pub factory: Address,
    pub router: Address,
    pub kind: VenueKind,
}

/// A discovered pool on one venue for one configured token pair.
///
/// `token_a`/`token_b` keep the configured order; `token0`/`token1`
/// record the on-chain ordering reported by the pair contract, which is
/// what reserve0/reserve1 refer to. Created once at discovery, never
/// mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairDescriptor {
    pub venue: String,
    pub token_a: Address,
    pub token_b: Address,
    pub token0: Address,
    pub token1: Address,
    pub pair_address: Address,
}

impl PairDescriptor {
    /// Map key used by the reserves view and the detector.
    pub fn key(&self) -> (String, Address, Address) {
        (self.venue.clone(), self.token_a, self.token_b)
    }
}

/// Snapshot of a pool's reserves at one fetch.
/// Replaced atomically by the refresh loop; never partially updated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolReserves {
    pub descriptor: PairDescriptor,
    pub reserve0: U256,
    pub reserve1: U256,
    pub block_number: u64,
    pub fetched_at: DateTime<Utc>,
}

impl PoolReserves {
    /// Reserve invariant: both sides zero (empty pool, skipped) or both
    /// positive. A half-zero pool indicates a broken fetch.
    pub fn is_consistent(&self) -> bool {
        self.reserve0.is_zero() == self.reserve1.is_zero()
    }

    /// Decimal-adjusted mid-price of `token_in` expressed in `token_out`.
    ///
    /// Orients the reserves by the recorded on-chain token order and
    /// returns None when the direction does not match this pool or when
    /// either reserve is zero.
    ///
    /// Formula: (reserve_out / reserve_in) * 10^(decimals_in - decimals_out)
    ///
    /// Example: WAVAX(18)/USDC(6) pool with 10^24 / 42*10^12 raw:
    ///   raw ratio: 4.2e-11
    ///   * 10^(18-6) = * 10^12
    ///   = 42 USDC per WAVAX
    pub fn mid_price(
        &self,
        token_in: Address,
        token_out: Address,
        decimals_in: u8,
        decimals_out: u8,
    ) -> Option<f64> {
        let (r_in, r_out) = if self.descriptor.token0 == token_in
            && self.descriptor.token1 == token_out
        {
            (self.reserve0, self.reserve1)
        } else if self.descriptor.token0 == token_out && self.descriptor.token1 == token_in {
            (self.reserve1, self.reserve0)
        } else {
            return None;
        };

        if r_in.is_zero() || r_out.is_zero() {
            return None;
        }

        // V2 reserves are uint112 on chain, so u128 cannot overflow here.
        let r_in_f = r_in.to::<u128>() as f64;
        let r_out_f = r_out.to::<u128>() as f64;

        let adjustment = 10_f64.powi(decimals_in as i32 - decimals_out as i32);
        Some(r_out_f / r_in_f * adjustment)
    }

    /// Reserve of `token` on this pool in raw units, oriented by the
    /// recorded on-chain order. None when the token is not in the pool.
    pub fn reserve_of(&self, token: Address) -> Option<U256> {
        if self.descriptor.token0 == token {
            Some(self.reserve0)
        } else if self.descriptor.token1 == token {
            Some(self.reserve1)
        } else {
            None
        }
    }
}

/// Depth-binned maximum trade size in human units of the input token.
///
/// Deep pools allow a smaller fraction (less price impact headroom is
/// needed); shallow pools allow a larger one but on a small base:
///   reserve >= 1000 units -> 2%
///   reserve in [100, 1000) -> 5%
///   reserve < 100 -> 10%
/// The result is clamped to [0.001, 10] for the wrapped native token and
/// [0.001, 1000] otherwise. A non-positive reserve disables the pair (0.0).
pub fn max_trade_amount(reserve_human: f64, is_wrapped_native: bool) -> f64 {
    if reserve_human <= 0.0 {
        return 0.0;
    }
    let fraction = if reserve_human >= 1000.0 {
        0.02
    } else if reserve_human >= 100.0 {
        0.05
    } else {
        0.10
    };
    let cap = if is_wrapped_native { 10.0 } else { 1000.0 };
    (reserve_human * fraction).clamp(0.001, cap)
}

/// Decoded swap call extracted from pending-transaction calldata.
/// Present only when the recipient matched a known router and the
/// calldata parsed against that router's family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecodedSwap {
    pub router: Address,
    pub function_name: String,
    /// Ordered argument values, display-rendered for the cache record.
    pub args: Vec<String>,
    pub is_swap: bool,
    pub token_in: Option<Address>,
    pub token_out: Option<Address>,
    /// Input amount when the selector carries it (exact-in variants).
    pub amount_in: Option<U256>,
    /// Output amount or minimum-output, depending on the selector.
    pub amount_out_min: Option<U256>,
    /// Full swap path as an ordered token sequence.
    pub path: Vec<Address>,
}

/// A pending transaction enriched with decoded swap metadata.
/// Written once to the cache under `tx:<hash>`, never mutated, expires
/// by TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedTransaction {
    pub hash: B256,
    pub from: Address,
    /// Absent for contract-creation transactions.
    pub to: Option<Address>,
    pub value: U256,
    pub gas_limit: u64,
    /// Legacy gas price, when present.
    pub gas_price: Option<u128>,
    pub max_fee_per_gas: Option<u128>,
    pub max_priority_fee_per_gas: Option<u128>,
    pub nonce: u64,
    pub input: Bytes,
    pub seen_at: DateTime<Utc>,
    /// Set only if the transaction was already mined at lookup time.
    pub block_number: Option<u64>,
    pub decoded_swap: Option<DecodedSwap>,
}

impl EnrichedTransaction {
    pub fn is_swap(&self) -> bool {
        self.decoded_swap.as_ref().map_or(false, |d| d.is_swap)
    }
}

/// Cross-venue arbitrage opportunity.
///
/// Prices are decimal-adjusted mid-prices in token_b per token_a.
/// Invariants: buy_price <= sell_price, 0 < min_trade <= max_trade,
/// profit_percent > 0.1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitrageOpportunity {
    pub token_a: Address,
    pub token_b: Address,
    pub buy_venue: String,
    pub sell_venue: String,
    pub buy_price: f64,
    pub sell_price: f64,
    pub price_gap: f64,
    pub profit_percent: f64,
    /// Fixed swap-pair gas estimate in units.
    pub estimated_gas: u64,
    /// Trade bounds in human units of token_a.
    pub min_trade: f64,
    pub max_trade: f64,
    /// Unix seconds at detection.
    pub detected_at: u64,
}

impl ArbitrageOpportunity {
    /// Stable cache key (before the configured prefix): later writes for
    /// the same route overwrite this key, gated by hysteresis.
    pub fn stable_key(&self) -> String {
        format!(
            "opportunity:{:?}-{:?}-{}-{}",
            self.token_a, self.token_b, self.buy_venue, self.sell_venue
        )
    }

    pub fn holds_invariants(&self) -> bool {
        self.buy_price <= self.sell_price
            && self.min_trade > 0.0
            && self.min_trade <= self.max_trade
            && self.profit_percent > 0.1
    }
}

/// One transaction request inside a bundle.
#[derive(Debug, Clone)]
pub struct BundleTx {
    pub to: Address,
    pub value: U256,
    pub input: Bytes,
    pub gas_limit: u64,
}

/// Ordered transaction sequence replayed against the sandbox.
/// Constructed per simulation; not persisted.
#[derive(Debug, Clone)]
pub struct TransactionBundle {
    pub transactions: Vec<BundleTx>,
    /// Expected profit in native-token wei, used by fast-mode accounting.
    pub expected_profit_wei: i128,
    pub description: String,
}

/// Outcome of replaying one bundle in the sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationResult {
    pub success: bool,
    pub gas_used: u64,
    /// Realized profit in native-token wei; negative on a losing bundle.
    pub profit_wei: i128,
    pub error: Option<String>,
    pub execution_time_ms: u64,
}

impl SimulationResult {
    pub fn failed(error: impl Into<String>, gas_used: u64, execution_time_ms: u64) -> Self {
        Self {
            success: false,
            gas_used,
            profit_wei: 0,
            error: Some(error.into()),
            execution_time_ms,
        }
    }
}

/// Error taxonomy for the pipeline. Only `Config` and `SandboxStartup`
/// terminate a stage; everything else is logged and routed to the next
/// cycle.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("transient chain error: {0}")]
    TransientChain(String),
    #[error("record missing: {0}")]
    MissingRecord(String),
    #[error("calldata decode failed: {0}")]
    DecodeFailure(String),
    #[error("cache unavailable")]
    CacheUnavailable,
    #[error("sandbox startup failed: {0}")]
    SandboxStartup(String),
    #[error("bundle execution failed: {0}")]
    BundleExecution(String),
    #[error("configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(token0: Address, token1: Address) -> PairDescriptor {
        PairDescriptor {
            venue: "TraderJoe".to_string(),
            token_a: token0,
            token_b: token1,
            token0,
            token1,
            pair_address: Address::ZERO,
        }
    }

    fn wavax_usdc_reserves(r0: u128, r1: u128) -> (PoolReserves, Address, Address) {
        let wavax = Address::repeat_byte(0xaa);
        let usdc = Address::repeat_byte(0xbb);
        let reserves = PoolReserves {
            descriptor: descriptor(wavax, usdc),
            reserve0: U256::from(r0),
            reserve1: U256::from(r1),
            block_number: 100,
            fetched_at: Utc::now(),
        };
        (reserves, wavax, usdc)
    }

    #[test]
    fn test_mid_price_decimal_adjusted() {
        // 10^24 raw WAVAX (18 dec) vs 42*10^12 raw USDC (6 dec) => 42 USDC per WAVAX
        let (reserves, wavax, usdc) =
            wavax_usdc_reserves(1_000_000_000_000_000_000_000_000, 42_000_000_000_000);
        let price = reserves.mid_price(wavax, usdc, 18, 6).unwrap();
        assert!((price - 42.0).abs() < 1e-9, "expected 42, got {}", price);
    }

    #[test]
    fn test_mid_price_symmetry() {
        let (reserves, wavax, usdc) =
            wavax_usdc_reserves(1_000_000_000_000_000_000_000_000, 42_000_000_000_000);
        let forward = reserves.mid_price(wavax, usdc, 18, 6).unwrap();
        let backward = reserves.mid_price(usdc, wavax, 6, 18).unwrap();
        let product = forward * backward;
        assert!((product - 1.0).abs() < f64::EPSILON * 4.0, "product {}", product);
    }

    #[test]
    fn test_mid_price_rejects_zero_reserve() {
        let (reserves, wavax, usdc) = wavax_usdc_reserves(0, 42_000_000_000_000);
        assert!(reserves.mid_price(wavax, usdc, 18, 6).is_none());
    }

    #[test]
    fn test_mid_price_rejects_direction_mismatch() {
        let (reserves, _, usdc) = wavax_usdc_reserves(1_000, 2_000);
        let stranger = Address::repeat_byte(0xcc);
        assert!(reserves.mid_price(stranger, usdc, 18, 6).is_none());
    }

    #[test]
    fn test_reserve_invariant() {
        let (both_set, _, _) = wavax_usdc_reserves(1, 1);
        assert!(both_set.is_consistent());
        let (both_zero, _, _) = wavax_usdc_reserves(0, 0);
        assert!(both_zero.is_consistent());
        let (half_zero, _, _) = wavax_usdc_reserves(1, 0);
        assert!(!half_zero.is_consistent());
    }

    #[test]
    fn test_max_trade_binning() {
        // Deep pool: 2% of reserve
        assert!((max_trade_amount(5_000.0, false) - 100.0).abs() < 1e-12);
        // Mid pool: 5%
        assert!((max_trade_amount(500.0, false) - 25.0).abs() < 1e-12);
        // Shallow pool: 10%
        assert!((max_trade_amount(50.0, false) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_max_trade_clamps() {
        // Native cap is 10 units even on a very deep pool
        assert!((max_trade_amount(1_000_000.0, true) - 10.0).abs() < 1e-12);
        // Non-native cap is 1000
        assert!((max_trade_amount(1_000_000.0, false) - 1000.0).abs() < 1e-12);
        // Tiny pools still floor at 0.001
        assert!((max_trade_amount(0.005, false) - 0.001).abs() < 1e-12);
        // Empty pool disables the pair
        assert_eq!(max_trade_amount(0.0, false), 0.0);
    }

    #[test]
    fn test_opportunity_invariants() {
        let opp = ArbitrageOpportunity {
            token_a: Address::repeat_byte(0xaa),
            token_b: Address::repeat_byte(0xbb),
            buy_venue: "TraderJoe".to_string(),
            sell_venue: "Pangolin".to_string(),
            buy_price: 42.0,
            sell_price: 42.3,
            price_gap: 0.3,
            profit_percent: 0.714,
            estimated_gas: 300_000,
            min_trade: 1.05,
            max_trade: 10.0,
            detected_at: 0,
        };
        assert!(opp.holds_invariants());
        assert!(opp.stable_key().starts_with("opportunity:"));
        assert!(opp.stable_key().ends_with("TraderJoe-Pangolin"));
    }
}
