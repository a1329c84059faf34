//! Configuration management
//!
//! Loads pipeline settings from the environment (.env supported).
//! Built-in defaults cover Avalanche C-Chain mainnet with the TraderJoe
//! and Pangolin venue set; every table can be overridden with env vars.
//!
//! Configuration errors refuse startup. Token/venue lookups that fail
//! lazily at runtime reject the specific opportunity instead.

use crate::types::{PipelineError, Token, Venue, VenueKind};
use alloy::primitives::Address;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ── Avalanche C-Chain defaults ──────────────────────────────────────

const MAINNET_RPC: &str = "https://api.avax.network/ext/bc/C/rpc";
const MAINNET_WS: &str = "wss://api.avax.network/ext/bc/C/ws";
const MAINNET_CHAIN_ID: u64 = 43114;

const TESTNET_RPC: &str = "https://api.avax-test.network/ext/bc/C/rpc";
const TESTNET_WS: &str = "wss://api.avax-test.network/ext/bc/C/ws";
const TESTNET_CHAIN_ID: u64 = 43113;

const MAINNET_WAVAX: &str = "0xb31f66aa3c1e785363f0875a1b74e27b85fd66c7";
const MAINNET_USDC: &str = "0xb97ef9ef8734c71904d8002f8b6bc66dd9c48a6e";
const MAINNET_USDT: &str = "0x9702230a8ea53601f5cd2dc00fdbc13d4df4a8c7";
const TESTNET_WAVAX: &str = "0xd00ae08403b9bbb9124bb305c09058e32c39a48c";

const TRADERJOE_FACTORY: &str = "0x9ad6c38be94206ca50bb0d90783181662f0cfa10";
const TRADERJOE_ROUTER: &str = "0x60ae616a2155ee3d9a68541ba4544862310933d4";
const PANGOLIN_FACTORY: &str = "0xefa94de7a4656d787667c749f7e1223d71e9fd88";
const PANGOLIN_ROUTER: &str = "0xe54ca86531e17ef3616d22ca28b0d458b6c89106";

/// Network selection. Venue defaults are mainnet-only; testnet runs set
/// the VENUES/TOKENS/TRADING_PAIRS variables explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    fn from_env_value(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" | "fuji" => Ok(Network::Testnet),
            other => bail!("unknown NETWORK value: {}", other),
        }
    }
}

/// MEV/pipeline tuning parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MevParams {
    /// Minimum profit threshold in native token units.
    pub min_profit_native: f64,
    pub max_slippage_percent: f64,
    /// Gas limit attached to each bundle transaction.
    pub default_gas_limit: u64,
    pub priority_fee_multiplier: f64,
    /// Prefix applied to every cache key.
    pub cache_key_prefix: String,
    /// TTL for enriched pending transactions.
    pub mempool_ttl_secs: u64,
    /// Soft latency budget for one bundle replay.
    pub simulation_timeout_ms: u64,
    /// Fast profit accounting (skip the post-bundle balance read).
    pub fast_simulation: bool,
}

impl Default for MevParams {
    fn default() -> Self {
        Self {
            min_profit_native: 0.01,
            max_slippage_percent: 0.5,
            default_gas_limit: 300_000,
            priority_fee_multiplier: 1.1,
            cache_key_prefix: "mev:".to_string(),
            mempool_ttl_secs: 300,
            simulation_timeout_ms: 150,
            fast_simulation: true,
        }
    }
}

/// Sandbox (anvil) launch parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxParams {
    pub anvil_bin: String,
    pub host: String,
    /// First candidate port; the probe increments on collision.
    pub base_port: u16,
    pub accounts: u32,
    /// Per-account funding in native token units. Must cover every test
    /// trade plus gas headroom.
    pub balance_avax: u64,
}

impl Default for SandboxParams {
    fn default() -> Self {
        Self {
            anvil_bin: "anvil".to_string(),
            host: "127.0.0.1".to_string(),
            base_port: 8545,
            accounts: 10,
            balance_avax: 10_000,
        }
    }
}

/// Full pipeline configuration. Immutable after load.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub network: Network,
    pub rpc_url: String,
    pub ws_url: String,
    pub chain_id: u64,
    pub redis_url: String,
    pub venues: Vec<Venue>,
    pub tokens: Vec<Token>,
    /// Configured (tokenA, tokenB) pairs, resolved to addresses.
    pub pairs: Vec<(Address, Address)>,
    pub wrapped_native: Address,
    pub mev: MevParams,
    pub sandbox: SandboxParams,
}

impl PipelineConfig {
    /// Built-in mainnet defaults: TraderJoe + Pangolin, WAVAX/USDC/USDT,
    /// one WAVAX/USDC pair.
    pub fn default_mainnet() -> Self {
        let wavax = addr(MAINNET_WAVAX);
        let usdc = addr(MAINNET_USDC);
        let usdt = addr(MAINNET_USDT);
        Self {
            network: Network::Mainnet,
            rpc_url: MAINNET_RPC.to_string(),
            ws_url: MAINNET_WS.to_string(),
            chain_id: MAINNET_CHAIN_ID,
            redis_url: "redis://127.0.0.1:6379/".to_string(),
            venues: vec![
                Venue {
                    name: "TraderJoe".to_string(),
                    factory: addr(TRADERJOE_FACTORY),
                    router: addr(TRADERJOE_ROUTER),
                    kind: VenueKind::ConstantProductV2,
                },
                Venue {
                    name: "Pangolin".to_string(),
                    factory: addr(PANGOLIN_FACTORY),
                    router: addr(PANGOLIN_ROUTER),
                    kind: VenueKind::ConstantProductV2,
                },
            ],
            tokens: vec![
                Token::new(wavax, 18, Some("WAVAX".to_string())),
                Token::new(usdc, 6, Some("USDC".to_string())),
                Token::new(usdt, 6, Some("USDT".to_string())),
            ],
            pairs: vec![(wavax, usdc)],
            wrapped_native: wavax,
            mev: MevParams::default(),
            sandbox: SandboxParams::default(),
        }
    }

    pub fn default_testnet() -> Self {
        let mut config = Self::default_mainnet();
        config.network = Network::Testnet;
        config.rpc_url = TESTNET_RPC.to_string();
        config.ws_url = TESTNET_WS.to_string();
        config.chain_id = TESTNET_CHAIN_ID;
        config.wrapped_native = addr(TESTNET_WAVAX);
        config.tokens = vec![Token::new(config.wrapped_native, 18, Some("WAVAX".to_string()))];
        config.pairs = vec![];
        config
    }

    /// Load configuration from the environment, starting from the
    /// network's defaults. Refuses to start on any malformed value.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let network = match std::env::var("NETWORK") {
            Ok(v) => Network::from_env_value(&v)?,
            Err(_) => Network::Mainnet,
        };
        let mut config = match network {
            Network::Mainnet => Self::default_mainnet(),
            Network::Testnet => Self::default_testnet(),
        };

        if let Ok(v) = std::env::var("RPC_URL") {
            config.rpc_url = v;
        }
        if let Ok(v) = std::env::var("WS_RPC_URL") {
            config.ws_url = v;
        }
        if let Ok(v) = std::env::var("CHAIN_ID") {
            config.chain_id = v.parse().context("CHAIN_ID not a number")?;
        }
        if let Ok(v) = std::env::var("REDIS_URL") {
            config.redis_url = v;
        }

        // VENUES="Name:0xfactory:0xrouter,..."
        if let Ok(v) = std::env::var("VENUES") {
            config.venues = parse_venues(&v)?;
        }
        // TOKENS="SYMBOL:0xaddress:decimals,..."
        if let Ok(v) = std::env::var("TOKENS") {
            config.tokens = parse_tokens(&v)?;
        }
        // TRADING_PAIRS="WAVAX/USDC,WAVAX/USDT"
        if let Ok(v) = std::env::var("TRADING_PAIRS") {
            config.pairs = parse_pairs(&v, &config.tokens)?;
        }
        if let Ok(v) = std::env::var("WRAPPED_NATIVE") {
            config.wrapped_native =
                Address::from_str(&v).context("WRAPPED_NATIVE not an address")?;
        }

        if let Ok(v) = std::env::var("MIN_PROFIT_NATIVE") {
            config.mev.min_profit_native = v.parse().context("MIN_PROFIT_NATIVE not a number")?;
        }
        if let Ok(v) = std::env::var("MAX_SLIPPAGE_PERCENT") {
            config.mev.max_slippage_percent =
                v.parse().context("MAX_SLIPPAGE_PERCENT not a number")?;
        }
        if let Ok(v) = std::env::var("DEFAULT_GAS_LIMIT") {
            config.mev.default_gas_limit = v.parse().context("DEFAULT_GAS_LIMIT not a number")?;
        }
        if let Ok(v) = std::env::var("PRIORITY_FEE_MULTIPLIER") {
            config.mev.priority_fee_multiplier =
                v.parse().context("PRIORITY_FEE_MULTIPLIER not a number")?;
        }
        if let Ok(v) = std::env::var("CACHE_KEY_PREFIX") {
            config.mev.cache_key_prefix = v;
        }
        if let Ok(v) = std::env::var("MEMPOOL_TTL_SECS") {
            config.mev.mempool_ttl_secs = v.parse().context("MEMPOOL_TTL_SECS not a number")?;
        }
        if let Ok(v) = std::env::var("SIMULATION_TIMEOUT_MS") {
            config.mev.simulation_timeout_ms =
                v.parse().context("SIMULATION_TIMEOUT_MS not a number")?;
        }
        if let Ok(v) = std::env::var("FAST_SIMULATION") {
            config.mev.fast_simulation = v.parse().context("FAST_SIMULATION not a bool")?;
        }

        if let Ok(v) = std::env::var("ANVIL_BIN") {
            config.sandbox.anvil_bin = v;
        }
        if let Ok(v) = std::env::var("SANDBOX_HOST") {
            config.sandbox.host = v;
        }
        if let Ok(v) = std::env::var("SANDBOX_BASE_PORT") {
            config.sandbox.base_port = v.parse().context("SANDBOX_BASE_PORT not a port")?;
        }
        if let Ok(v) = std::env::var("SANDBOX_BALANCE_AVAX") {
            config.sandbox.balance_avax =
                v.parse().context("SANDBOX_BALANCE_AVAX not a number")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Startup validation: malformed configuration refuses to start.
    pub fn validate(&self) -> Result<()> {
        if self.venues.len() < 2 {
            bail!("need at least two venues for cross-venue arbitrage");
        }
        for token in &self.tokens {
            if token.decimals > 36 {
                bail!(
                    "token {:?} decimals {} out of range [0, 36]",
                    token.address,
                    token.decimals
                );
            }
        }
        for (token_a, token_b) in &self.pairs {
            if self.token(*token_a).is_none() {
                bail!("pair references unknown token {:?}", token_a);
            }
            if self.token(*token_b).is_none() {
                bail!("pair references unknown token {:?}", token_b);
            }
            if token_a == token_b {
                bail!("pair has identical tokens {:?}", token_a);
            }
        }
        if self.token(self.wrapped_native).is_none() {
            bail!("wrapped native token {:?} missing from token table", self.wrapped_native);
        }
        Ok(())
    }

    pub fn token(&self, address: Address) -> Option<&Token> {
        self.tokens.iter().find(|t| t.address == address)
    }

    pub fn token_by_symbol(&self, symbol: &str) -> Option<&Token> {
        self.tokens
            .iter()
            .find(|t| t.symbol.as_deref() == Some(symbol))
    }

    /// Decimal exponent of a token. Missing decimals encountered lazily
    /// reject the specific opportunity rather than the stage.
    pub fn decimals_of(&self, address: Address) -> Result<u8, PipelineError> {
        self.token(address)
            .map(|t| t.decimals)
            .ok_or_else(|| PipelineError::Config(format!("decimals unknown for {:?}", address)))
    }

    pub fn is_wrapped_native(&self, address: Address) -> bool {
        address == self.wrapped_native
    }

    pub fn venue(&self, name: &str) -> Option<&Venue> {
        self.venues.iter().find(|v| v.name == name)
    }

    /// Venue whose router matches `address`. Address parsing normalizes
    /// case, so this comparison is effectively case-insensitive.
    pub fn venue_by_router(&self, address: Address) -> Option<&Venue> {
        self.venues.iter().find(|v| v.router == address)
    }

    /// Human symbol for logs; falls back to the hex address.
    pub fn symbol_of(&self, address: Address) -> String {
        self.token(address)
            .and_then(|t| t.symbol.clone())
            .unwrap_or_else(|| format!("{:?}", address))
    }
}

fn addr(s: &str) -> Address {
    // Only used with the in-crate default constants.
    Address::from_str(s).expect("built-in default address is valid")
}

fn parse_venues(raw: &str) -> Result<Vec<Venue>> {
    raw.split(',')
        .map(|entry| {
            let parts: Vec<&str> = entry.trim().split(':').collect();
            if parts.len() != 3 {
                bail!("invalid venue entry (want Name:factory:router): {}", entry);
            }
            Ok(Venue {
                name: parts[0].to_string(),
                factory: Address::from_str(parts[1])
                    .with_context(|| format!("invalid factory address in venue {}", parts[0]))?,
                router: Address::from_str(parts[2])
                    .with_context(|| format!("invalid router address in venue {}", parts[0]))?,
                kind: VenueKind::ConstantProductV2,
            })
        })
        .collect()
}

fn parse_tokens(raw: &str) -> Result<Vec<Token>> {
    raw.split(',')
        .map(|entry| {
            let parts: Vec<&str> = entry.trim().split(':').collect();
            if parts.len() != 3 {
                bail!("invalid token entry (want SYMBOL:address:decimals): {}", entry);
            }
            let decimals: u8 = parts[2]
                .parse()
                .with_context(|| format!("invalid decimals for token {}", parts[0]))?;
            Ok(Token::new(
                Address::from_str(parts[1])
                    .with_context(|| format!("invalid address for token {}", parts[0]))?,
                decimals,
                Some(parts[0].to_string()),
            ))
        })
        .collect()
}

fn parse_pairs(raw: &str, tokens: &[Token]) -> Result<Vec<(Address, Address)>> {
    raw.split(',')
        .map(|entry| {
            let parts: Vec<&str> = entry.trim().split('/').collect();
            if parts.len() != 2 {
                bail!("invalid pair entry (want SYMA/SYMB): {}", entry);
            }
            let lookup = |sym: &str| {
                tokens
                    .iter()
                    .find(|t| t.symbol.as_deref() == Some(sym))
                    .map(|t| t.address)
                    .with_context(|| format!("pair references unknown token symbol {}", sym))
            };
            Ok((lookup(parts[0])?, lookup(parts[1])?))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mainnet_validates() {
        let config = PipelineConfig::default_mainnet();
        assert!(config.validate().is_ok());
        assert_eq!(config.chain_id, 43114);
        assert_eq!(config.venues.len(), 2);
        assert!(config.is_wrapped_native(config.wrapped_native));
    }

    #[test]
    fn test_venue_by_router_lookup() {
        let config = PipelineConfig::default_mainnet();
        let joe = config.venue("TraderJoe").unwrap();
        assert_eq!(
            config.venue_by_router(joe.router).map(|v| v.name.as_str()),
            Some("TraderJoe")
        );
        assert!(config.venue_by_router(Address::ZERO).is_none());
    }

    #[test]
    fn test_parse_pairs_rejects_unknown_symbol() {
        let config = PipelineConfig::default_mainnet();
        let parsed = parse_pairs("WAVAX/USDC", &config.tokens).unwrap();
        assert_eq!(parsed.len(), 1);
        assert!(parse_pairs("WAVAX/DOGE", &config.tokens).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_decimals() {
        let mut config = PipelineConfig::default_mainnet();
        config.tokens[0].decimals = 40;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_single_venue() {
        let mut config = PipelineConfig::default_mainnet();
        config.venues.truncate(1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_decimals_of_unknown_token_is_config_error() {
        let config = PipelineConfig::default_mainnet();
        let err = config.decimals_of(Address::repeat_byte(0x99)).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }
}
