//! Bundle Replay Engine
//!
//! Purpose:
//!     Replay transaction bundles against the owned sandbox in strict
//!     nonce order, one bundle at a time, and account profit in fast or
//!     precise mode.
//!
//! Notes:
//!     - Every bundle transaction is signed by the sandbox's default
//!       funded dev account and broadcast with nonce N+i; each receipt
//!       is awaited before the next send. A missing receipt or status 0
//!       aborts the bundle.
//!     - The 150 ms wall-clock budget is a soft signal: the result
//!       records the observed time, nothing is aborted on time alone.

use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, sleep, timeout, Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::cache::CacheClient;
use crate::chain::ChainClient;
use crate::config::PipelineConfig;
use crate::simulator::bundle::build_cross_venue_bundle;
use crate::simulator::sandbox::Sandbox;
use crate::types::{PipelineError, SimulationResult, TransactionBundle};

/// Gas price used when the sandbox's fee data reports zero (it is
/// launched with --gas-price 0). Broadcasts need a non-zero price.
const DEFAULT_GAS_PRICE_WEI: u128 = 25_000_000_000;

/// Settle delay before the precise-mode balance read.
const PRECISE_SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Per-receipt wait budget; a replay that exceeds this has hung.
const RECEIPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default funded dev account 0 of the sandbox.
const DEV_ACCOUNT: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";
const DEV_ACCOUNT_KEY: &str =
    "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

/// Non-zero gas price selection from the sandbox's fee data.
pub fn effective_gas_price(reported: Option<u128>) -> u128 {
    match reported {
        Some(price) if price > 0 => price,
        _ => DEFAULT_GAS_PRICE_WEI,
    }
}

/// Fast-mode accounting: expected profit minus realized gas cost minus
/// the native value sent with the bundle. Skips the post-bundle balance
/// read.
pub fn fast_profit(
    expected_profit_wei: i128,
    total_gas_used: u64,
    gas_price_wei: u128,
    total_value_wei: i128,
) -> i128 {
    expected_profit_wei - total_gas_used as i128 * gas_price_wei as i128 - total_value_wei
}

/// Owns the sandbox and the signing wallet; processes bundles strictly
/// one at a time.
pub struct BundleSimulator {
    config: Arc<PipelineConfig>,
    chain: ChainClient,
    sandbox: Sandbox,
    wallet_address: Address,
    /// Wallet-filled provider bound to the sandbox endpoint.
    provider: DynProvider,
}

impl BundleSimulator {
    /// Launch the sandbox and wire the signing provider. Startup errors
    /// are fatal to this stage.
    pub async fn start(config: Arc<PipelineConfig>, chain: ChainClient) -> Result<Self, PipelineError> {
        let sandbox = Sandbox::start(&chain, &config.rpc_url, &config.sandbox).await?;

        let signer = PrivateKeySigner::from_str(DEV_ACCOUNT_KEY)
            .map_err(|e| PipelineError::SandboxStartup(format!("dev signer: {}", e)))?;
        let wallet_address = Address::from_str(DEV_ACCOUNT)
            .map_err(|e| PipelineError::SandboxStartup(format!("dev account: {}", e)))?;

        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect(sandbox.endpoint())
            .await
            .map_err(|e| PipelineError::SandboxStartup(format!("wallet provider: {}", e)))?
            .erased();

        Ok(Self {
            config,
            chain,
            sandbox,
            wallet_address,
            provider,
        })
    }

    pub fn wallet_address(&self) -> Address {
        self.wallet_address
    }

    pub fn sandbox_endpoint(&self) -> &str {
        self.sandbox.endpoint()
    }

    /// Replay one bundle. Never panics and never crashes the stage;
    /// failures land in the result's error field.
    pub async fn simulate(&mut self, bundle: &TransactionBundle) -> SimulationResult {
        let started = Instant::now();

        if !self.sandbox.is_running() {
            return SimulationResult::failed("sandbox not running", 0, elapsed_ms(started));
        }

        let gas_price = effective_gas_price(self.provider.get_gas_price().await.ok());

        let base_nonce = match self.provider.get_transaction_count(self.wallet_address).await {
            Ok(nonce) => nonce,
            Err(e) => {
                return SimulationResult::failed(
                    format!("nonce fetch: {}", e),
                    0,
                    elapsed_ms(started),
                )
            }
        };

        let fast = self.config.mev.fast_simulation;
        let initial_balance = if fast {
            U256::ZERO
        } else {
            match self.provider.get_balance(self.wallet_address).await {
                Ok(balance) => balance,
                Err(e) => {
                    return SimulationResult::failed(
                        format!("balance read: {}", e),
                        0,
                        elapsed_ms(started),
                    )
                }
            }
        };

        let mut total_gas: u64 = 0;
        let mut total_value: i128 = 0;

        for (i, tx) in bundle.transactions.iter().enumerate() {
            let request = TransactionRequest::default()
                .with_from(self.wallet_address)
                .with_to(tx.to)
                .with_value(tx.value)
                .with_input(tx.input.clone())
                .with_gas_limit(tx.gas_limit)
                .with_gas_price(gas_price)
                .with_nonce(base_nonce + i as u64);

            let pending = match self.provider.send_transaction(request).await {
                Ok(pending) => pending,
                Err(e) => {
                    return SimulationResult::failed(
                        format!("tx {} broadcast: {}", i, e),
                        total_gas,
                        elapsed_ms(started),
                    )
                }
            };

            let receipt = match timeout(RECEIPT_TIMEOUT, pending.get_receipt()).await {
                Ok(Ok(receipt)) => receipt,
                Ok(Err(e)) => {
                    return SimulationResult::failed(
                        format!("tx {} receipt: {}", i, e),
                        total_gas,
                        elapsed_ms(started),
                    )
                }
                Err(_) => {
                    return SimulationResult::failed(
                        format!("tx {} receipt timed out", i),
                        total_gas,
                        elapsed_ms(started),
                    )
                }
            };

            total_gas = total_gas.saturating_add(receipt.gas_used as u64);
            total_value += tx.value.to::<u128>() as i128;

            if !receipt.status() {
                return SimulationResult::failed(
                    format!("tx {} reverted (status 0)", i),
                    total_gas,
                    elapsed_ms(started),
                );
            }
        }

        let profit_wei = if fast {
            fast_profit(bundle.expected_profit_wei, total_gas, gas_price, total_value)
        } else {
            sleep(PRECISE_SETTLE_DELAY).await;
            match self.provider.get_balance(self.wallet_address).await {
                Ok(final_balance) => {
                    final_balance.to::<u128>() as i128 - initial_balance.to::<u128>() as i128
                }
                Err(e) => {
                    return SimulationResult::failed(
                        format!("final balance read: {}", e),
                        total_gas,
                        elapsed_ms(started),
                    )
                }
            }
        };

        let execution_time_ms = elapsed_ms(started);
        if execution_time_ms > self.config.mev.simulation_timeout_ms {
            // Soft signal only; downstream gating reads the recorded time.
            warn!(
                "Bundle exceeded budget: {}ms > {}ms | {}",
                execution_time_ms, self.config.mev.simulation_timeout_ms, bundle.description
            );
        }

        SimulationResult {
            success: true,
            gas_used: total_gas,
            profit_wei,
            error: None,
            execution_time_ms,
        }
    }

    /// Repin the sandbox to a fresh fork and re-fund the dev account to
    /// the configured test balance. Required between bundles.
    pub async fn reset(&mut self) -> Result<(), PipelineError> {
        let funding =
            U256::from(self.config.sandbox.balance_avax) * U256::from(10).pow(U256::from(18));
        self.sandbox
            .reset(&self.chain, self.wallet_address, funding)
            .await
    }

    pub async fn stop(&mut self) {
        self.sandbox.stop().await;
    }

    /// Simulation loop: pick the best published opportunity, replay it,
    /// report locally, reset. Bundles run strictly one at a time.
    pub async fn run(&mut self, cache: &CacheClient, mut shutdown: watch::Receiver<bool>) {
        let mut tick = interval(Duration::from_secs(5));
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if !self.sandbox.is_running() {
                        error!("Sandbox subprocess died — stopping simulator stage");
                        return;
                    }
                    self.simulate_best(cache).await;
                }
                _ = shutdown.changed() => {
                    info!("Bundle simulator shutting down");
                    self.stop().await;
                    return;
                }
            }
        }
    }

    async fn simulate_best(&mut self, cache: &CacheClient) {
        let opportunities = crate::arbitrage::detector::load_published_opportunities(cache).await;
        let Some(best) = opportunities.first() else {
            debug!("No published opportunities to simulate");
            return;
        };

        let bundle = match build_cross_venue_bundle(
            &self.config,
            best,
            best.max_trade,
            self.wallet_address,
        ) {
            Ok(bundle) => bundle,
            Err(e) => {
                // Lazy config problems reject the opportunity, not the stage.
                warn!("Bundle build rejected: {}", e);
                return;
            }
        };

        let result = self.simulate(&bundle).await;
        info!(
            "SIMULATED: {} | success={} | gas={} | profit={} wei | {}ms{}",
            bundle.description,
            result.success,
            result.gas_used,
            result.profit_wei,
            result.execution_time_ms,
            result
                .error
                .as_ref()
                .map(|e| format!(" | error: {}", e))
                .unwrap_or_default(),
        );

        if let Err(e) = self.reset().await {
            warn!("Sandbox reset failed: {}", e);
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_gas_price_defaults_on_zero() {
        assert_eq!(effective_gas_price(Some(0)), DEFAULT_GAS_PRICE_WEI);
        assert_eq!(effective_gas_price(None), DEFAULT_GAS_PRICE_WEI);
        assert_eq!(effective_gas_price(Some(7)), 7);
    }

    #[test]
    fn test_fast_profit_accounting() {
        // expected 0.01 AVAX, 200k gas at 25 gwei, 1 AVAX of value sent
        let expected = 10_000_000_000_000_000i128;
        let value = 1_000_000_000_000_000_000i128;
        let profit = fast_profit(expected, 200_000, 25_000_000_000, value);
        let gas_cost = 200_000i128 * 25_000_000_000i128;
        assert_eq!(profit, expected - gas_cost - value);
    }

    #[test]
    fn test_fast_profit_can_go_negative() {
        let profit = fast_profit(0, 300_000, 25_000_000_000, 0);
        assert!(profit < 0);
    }
}
