//! Chain Client
//!
//! Thin wrapper over the node's JSON-RPC surface. Point lookups go over
//! a shared HTTP provider; pending-transaction subscriptions get a fresh
//! WebSocket connection per attempt so the consumer's reconnect loop
//! owns the connection lifetime (a dropped stream is re-created by
//! calling `connect_ws` again).

use alloy::primitives::B256;
use alloy::providers::{DynProvider, Provider, ProviderBuilder, WsConnect};
use alloy::pubsub::Subscription;
use alloy::rpc::types::Transaction;
use anyhow::{Context, Result};

#[derive(Clone)]
pub struct ChainClient {
    http: DynProvider,
    ws_url: String,
}

impl ChainClient {
    /// Connect the HTTP side. The WebSocket side is connected lazily by
    /// `connect_ws` because subscription consumers re-dial on error.
    pub async fn connect(rpc_url: &str, ws_url: &str) -> Result<Self> {
        let http = ProviderBuilder::new()
            .connect(rpc_url)
            .await
            .with_context(|| format!("RPC connect failed: {}", rpc_url))?
            .erased();
        Ok(Self {
            http,
            ws_url: ws_url.to_string(),
        })
    }

    /// Shared HTTP provider for contract bindings.
    pub fn provider(&self) -> DynProvider {
        self.http.clone()
    }

    /// Fresh WebSocket provider. Keep the returned provider alive for as
    /// long as any subscription created from it is consumed.
    pub async fn connect_ws(&self) -> Result<DynProvider> {
        let ws = ProviderBuilder::new()
            .connect_ws(WsConnect::new(&self.ws_url))
            .await
            .with_context(|| format!("WebSocket connect failed: {}", self.ws_url))?
            .erased();
        Ok(ws)
    }

    /// Subscribe to pending-transaction hashes on the given WS provider.
    pub async fn subscribe_pending(&self, ws: &DynProvider) -> Result<Subscription<B256>> {
        ws.subscribe_pending_transactions()
            .await
            .context("newPendingTransactions subscription failed")
    }

    /// Point lookup for a pending or mined transaction. None when the
    /// node no longer knows the hash (propagation race).
    pub async fn get_transaction(&self, hash: B256) -> Result<Option<Transaction>> {
        self.http
            .get_transaction_by_hash(hash)
            .await
            .context("eth_getTransactionByHash failed")
    }

    pub async fn block_number(&self) -> Result<u64> {
        self.http.get_block_number().await.context("eth_blockNumber failed")
    }

    /// Node gas-price hint in wei.
    pub async fn gas_price(&self) -> Result<u128> {
        self.http.get_gas_price().await.context("eth_gasPrice failed")
    }
}
