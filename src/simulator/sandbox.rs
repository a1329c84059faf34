//! Sandbox Lifecycle
//!
//! Purpose:
//!     Own the forked-EVM subprocess (anvil) used for bundle replay:
//!     port selection, launch, readiness polling, deterministic reset
//!     between bundles, and teardown.
//!
//! Notes:
//!     - The fork pins to head - 2 so the sandbox never races the real
//!       chain's newest block.
//!     - Startup failure is fatal to the simulator stage and only to it.
//!     - Sandbox state is disposable between bundles; `reset` repins to
//!       a fresh fork and re-funds the default account.

use alloy::primitives::{Address, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use serde_json::json;
use std::net::TcpListener;
use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout, Duration, Instant};
use tracing::{debug, info, warn};

use crate::chain::ChainClient;
use crate::config::SandboxParams;
use crate::types::PipelineError;

/// Fork this many blocks behind head.
const FORK_BLOCK_OFFSET: u64 = 2;

/// Readiness poll: 1 s interval, 30 s budget, then fatal.
const READY_POLL_INTERVAL: Duration = Duration::from_secs(1);
const READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Empirical stabilization pause after the first successful poll.
const STABILIZE_DELAY: Duration = Duration::from_secs(2);

/// Grace period for subprocess exit on stop.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// How many candidate ports the probe tries before giving up.
const PORT_PROBE_ATTEMPTS: u16 = 100;

/// Bind-and-release probe: returns the first free port at or above
/// `base`, incrementing on collision.
pub fn probe_port(host: &str, base: u16) -> Result<u16, PipelineError> {
    for offset in 0..PORT_PROBE_ATTEMPTS {
        let candidate = base.saturating_add(offset);
        match TcpListener::bind((host, candidate)) {
            Ok(listener) => {
                drop(listener);
                return Ok(candidate);
            }
            Err(_) => continue,
        }
    }
    Err(PipelineError::SandboxStartup(format!(
        "no free port in [{}, {}]",
        base,
        base.saturating_add(PORT_PROBE_ATTEMPTS)
    )))
}

/// A running anvil subprocess, exclusively owned by one simulator.
pub struct Sandbox {
    child: Option<Child>,
    endpoint: String,
    port: u16,
    fork_url: String,
    fork_block: u64,
    provider: DynProvider,
}

impl Sandbox {
    /// Launch the sandbox forked from the real chain at head - 2 and
    /// wait for it to accept JSON-RPC. Any failure here is fatal to the
    /// simulator stage.
    pub async fn start(
        chain: &ChainClient,
        fork_url: &str,
        params: &SandboxParams,
    ) -> Result<Self, PipelineError> {
        let head = chain
            .block_number()
            .await
            .map_err(|e| PipelineError::SandboxStartup(format!("head block fetch: {}", e)))?;
        let fork_block = head.saturating_sub(FORK_BLOCK_OFFSET);

        let port = probe_port(&params.host, params.base_port)?;
        let endpoint = format!("http://{}:{}", params.host, port);

        let child = Command::new(&params.anvil_bin)
            .arg("--fork-url")
            .arg(fork_url)
            .arg("--fork-block-number")
            .arg(fork_block.to_string())
            .arg("--port")
            .arg(port.to_string())
            .arg("--host")
            .arg(&params.host)
            .arg("--accounts")
            .arg(params.accounts.to_string())
            .arg("--balance")
            .arg(params.balance_avax.to_string())
            .arg("--gas-limit")
            .arg("30000000")
            .arg("--gas-price")
            .arg("0")
            .arg("--base-fee")
            .arg("0")
            .arg("--auto-impersonate")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                PipelineError::SandboxStartup(format!("spawn {}: {}", params.anvil_bin, e))
            })?;

        let provider = ProviderBuilder::new()
            .connect(&endpoint)
            .await
            .map_err(|e| PipelineError::SandboxStartup(format!("sandbox provider: {}", e)))?
            .erased();

        let mut sandbox = Self {
            child: Some(child),
            endpoint,
            port,
            fork_url: fork_url.to_string(),
            fork_block,
            provider,
        };

        sandbox.wait_until_ready().await?;
        sleep(STABILIZE_DELAY).await;

        info!(
            "Sandbox ready on port {} | fork block {} | {} accounts x {} AVAX",
            sandbox.port, sandbox.fork_block, params.accounts, params.balance_avax
        );
        Ok(sandbox)
    }

    /// Poll `eth_blockNumber` until the subprocess answers. Exiting
    /// early or missing the 30 s budget is fatal.
    async fn wait_until_ready(&mut self) -> Result<(), PipelineError> {
        let started = Instant::now();
        loop {
            if !self.is_running() {
                return Err(PipelineError::SandboxStartup(
                    "subprocess exited before becoming ready".to_string(),
                ));
            }
            match self.provider.get_block_number().await {
                Ok(block) => {
                    debug!("Sandbox answered at block {}", block);
                    return Ok(());
                }
                Err(_) if started.elapsed() < READY_TIMEOUT => {
                    sleep(READY_POLL_INTERVAL).await;
                }
                Err(e) => {
                    return Err(PipelineError::SandboxStartup(format!(
                        "not ready within {:?}: {}",
                        READY_TIMEOUT, e
                    )));
                }
            }
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn fork_block(&self) -> u64 {
        self.fork_block
    }

    /// Provider bound to the sandbox endpoint (unsigned reads and admin
    /// methods).
    pub fn provider(&self) -> DynProvider {
        self.provider.clone()
    }

    /// Crash detection: reaps the subprocess handle if it has exited.
    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => match child.try_wait() {
                Ok(Some(status)) => {
                    warn!("Sandbox subprocess exited: {}", status);
                    self.child = None;
                    false
                }
                Ok(None) => true,
                Err(e) => {
                    warn!("Sandbox wait error: {}", e);
                    false
                }
            },
            None => false,
        }
    }

    /// Repin to a fresh fork at the real chain's current head - 2 and
    /// re-fund `account`. Required between bundles to shed balances,
    /// approvals, and pool drift from the previous replay.
    pub async fn reset(
        &mut self,
        chain: &ChainClient,
        account: Address,
        balance_wei: U256,
    ) -> Result<(), PipelineError> {
        let head = chain
            .block_number()
            .await
            .map_err(|e| PipelineError::TransientChain(format!("head block fetch: {}", e)))?;
        self.fork_block = head.saturating_sub(FORK_BLOCK_OFFSET);

        // The admin dialect requires the object parameter shape.
        let forking = json!({
            "forking": {
                "jsonRpcUrl": self.fork_url,
                "blockNumber": self.fork_block,
            }
        });
        self.provider
            .raw_request::<_, serde_json::Value>("anvil_reset".into(), [forking])
            .await
            .map_err(|e| PipelineError::BundleExecution(format!("anvil_reset: {}", e)))?;

        self.provider
            .raw_request::<_, serde_json::Value>("anvil_setBalance".into(), (account, balance_wei))
            .await
            .map_err(|e| PipelineError::BundleExecution(format!("anvil_setBalance: {}", e)))?;

        debug!(
            "Sandbox reset to fork block {} | {:?} funded with {} wei",
            self.fork_block, account, balance_wei
        );
        Ok(())
    }

    /// Terminate the subprocess and wait up to 5 s for it to exit.
    pub async fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.start_kill() {
                warn!("Sandbox kill failed: {}", e);
                return;
            }
            match timeout(STOP_GRACE, child.wait()).await {
                Ok(Ok(status)) => debug!("Sandbox stopped: {}", status),
                Ok(Err(e)) => warn!("Sandbox wait failed: {}", e),
                Err(_) => warn!("Sandbox did not exit within {:?} — abandoning", STOP_GRACE),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_port_returns_bindable_port() {
        let port = probe_port("127.0.0.1", 49_500).expect("some port free");
        assert!(port >= 49_500);
        // The probe released it; binding again must work.
        TcpListener::bind(("127.0.0.1", port)).expect("probed port bindable");
    }

    #[test]
    fn test_probe_port_skips_occupied() {
        // Hold a port open, then probe starting at it.
        let held = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let held_port = held.local_addr().unwrap().port();
        let probed = probe_port("127.0.0.1", held_port).expect("probe escalates");
        assert!(probed > held_port);
    }
}
