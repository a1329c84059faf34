//! Mempool Ingestor — Enrichment Loop
//!
//! Purpose:
//!     Subscribe to pending-transaction hashes over WebSocket, enrich
//!     each with decoded swap metadata, deduplicate, and publish to the
//!     shared cache with bounded retention.
//!
//! Dependencies:
//!     - alloy (WS provider, subscription, consensus tx accessors)
//!     - tokio (select!, interval, watch shutdown)
//!     - redis via CacheClient (tx:/swaps:/swap_queue records)
//!
//! Notes:
//!     - Dedup short-circuit runs before the point lookup; it is the
//!       primary lever for the 150 ms p95 enrichment budget.
//!     - Cache errors are swallowed: the loop never stops because the
//!       cache is down.
//!     - Subscription errors reconnect with a fixed 5 s backoff, forever.

use alloy::consensus::Transaction as TransactionTrait;
use alloy::network::TransactionResponse;
use alloy::primitives::B256;
use anyhow::{anyhow, Result};
use chrono::Utc;
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Duration};
use tracing::{debug, info, warn};

use crate::cache::CacheClient;
use crate::chain::ChainClient;
use crate::config::PipelineConfig;
use crate::mempool::decoder;
use crate::types::EnrichedTransaction;

/// Wholesale-clear threshold for the in-memory dedup set.
const DEDUP_CAP: usize = 10_000;

/// The swap_queue list is trimmed to this many newest entries.
const SWAP_QUEUE_CAP: isize = 1_000;

/// Fixed reconnect backoff after a subscription failure.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// Expired-key sweep cadence.
const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Per-transaction enrichment budget (p95 contract).
const ENRICH_BUDGET_MS: u64 = 150;

/// Mempool ingestion stage. Owns its dedup set and its subscription;
/// shares nothing in-process with the other stages.
pub struct MempoolIngestor {
    config: Arc<PipelineConfig>,
    chain: ChainClient,
    cache: CacheClient,
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl MempoolIngestor {
    pub fn new(config: Arc<PipelineConfig>, chain: ChainClient, cache: CacheClient) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            chain,
            cache,
            shutdown_tx,
            handle: None,
        }
    }

    /// Spawn the ingestion loop. Idempotent while running.
    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }
        let config = self.config.clone();
        let chain = self.chain.clone();
        let cache = self.cache.clone();
        let shutdown = self.shutdown_tx.subscribe();
        self.handle = Some(tokio::spawn(async move {
            run(config, chain, cache, shutdown).await;
        }));
    }

    /// Signal shutdown and wait up to 5 s for in-flight enrichment to
    /// finish.
    pub async fn stop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.handle.take() {
            if timeout(Duration::from_secs(5), handle).await.is_err() {
                warn!("Mempool ingestor did not stop within 5s — abandoning task");
            }
        }
    }

    /// Newest `n` enriched swap transactions from the queue. Cache
    /// unavailability yields an empty list, never an error.
    pub async fn get_pending_swaps(&self, n: usize) -> Vec<EnrichedTransaction> {
        if n == 0 {
            return Vec::new();
        }
        let hashes = self
            .cache
            .list_range("swap_queue", 0, n as isize - 1)
            .await
            .unwrap_or_default();

        let mut swaps = Vec::with_capacity(hashes.len());
        for hash in hashes {
            match self.cache.get(&format!("swaps:{}", hash)).await {
                Ok(Some(json)) => match serde_json::from_str::<EnrichedTransaction>(&json) {
                    Ok(tx) => swaps.push(tx),
                    Err(e) => debug!("Corrupt swaps record {}: {}", hash, e),
                },
                // Expired between the queue read and the get, or cache down.
                _ => {}
            }
        }
        swaps
    }
}

/// Outer reconnect loop: one WS session per iteration, fixed 5 s
/// backoff on failure, indefinitely. The dedup set and stats survive
/// reconnects.
async fn run(
    config: Arc<PipelineConfig>,
    chain: ChainClient,
    cache: CacheClient,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut seen: HashSet<B256> = HashSet::new();
    let mut stats = IngestStats::default();

    loop {
        if *shutdown.borrow() {
            break;
        }
        match run_session(&config, &chain, &cache, &mut shutdown, &mut seen, &mut stats).await {
            Ok(()) => {
                info!("Mempool ingestor shutting down");
                break;
            }
            Err(e) => {
                warn!("Mempool subscription error: {} — reconnecting in 5s", e);
                tokio::select! {
                    _ = tokio::time::sleep(RECONNECT_BACKOFF) => {}
                    _ = shutdown.changed() => break,
                }
            }
        }
    }
}

/// One WebSocket session. Returns Ok on shutdown, Err on any
/// subscription failure (caller reconnects).
async fn run_session(
    config: &PipelineConfig,
    chain: &ChainClient,
    cache: &CacheClient,
    shutdown: &mut watch::Receiver<bool>,
    seen: &mut HashSet<B256>,
    stats: &mut IngestStats,
) -> Result<()> {
    // The WS provider must outlive the subscription stream.
    let ws = chain.connect_ws().await?;
    let subscription = chain.subscribe_pending(&ws).await?;
    let mut pending_stream = subscription.into_stream();

    info!(
        "Mempool ingestor subscribed | routers={} | ttl={}s",
        config.venues.len(),
        config.mev.mempool_ttl_secs
    );

    let mut sweep_interval = interval(SWEEP_INTERVAL);
    sweep_interval.tick().await; // skip the immediate tick

    let mut stats_interval = interval(Duration::from_secs(60));
    stats_interval.tick().await;

    loop {
        tokio::select! {
            maybe_hash = pending_stream.next() => {
                match maybe_hash {
                    Some(hash) => {
                        process_hash(config, chain, cache, seen, stats, hash).await;
                    }
                    None => return Err(anyhow!("pending stream ended")),
                }
            }

            _ = sweep_interval.tick() => {
                sweep_expired(config, cache).await;
            }

            _ = stats_interval.tick() => {
                stats.log_summary(seen.len());
            }

            _ = shutdown.changed() => return Ok(()),
        }
    }
}

/// Full enrichment path for one subscription-delivered hash.
async fn process_hash(
    config: &PipelineConfig,
    chain: &ChainClient,
    cache: &CacheClient,
    seen: &mut HashSet<B256>,
    stats: &mut IngestStats,
    hash: B256,
) {
    let started = Instant::now();

    // Dedup short-circuit before any RPC.
    if seen.contains(&hash) {
        stats.deduped += 1;
        return;
    }

    let tx = match chain.get_transaction(hash).await {
        Ok(Some(tx)) => tx,
        Ok(None) => {
            // Propagation race: the node no longer knows the hash.
            stats.missing += 1;
            return;
        }
        Err(e) => {
            warn!("Transaction lookup failed for {:?}: {}", hash, e);
            return;
        }
    };

    if seen.len() >= DEDUP_CAP {
        // Bounded memory beats perfect dedup; rare re-ingest is tolerated.
        debug!("Dedup set at {} entries — clearing", seen.len());
        seen.clear();
    }
    seen.insert(hash);

    let to = tx.to();
    let input = TransactionTrait::input(&tx);
    let decoded_swap = match to.and_then(|to| config.venue_by_router(to)) {
        Some(venue) => {
            let decoded = decoder::decode_calldata(venue.kind, venue.router, input);
            if decoded.is_none() && input.len() >= 4 {
                info!(
                    "Undecodable router call {:?} | {} | selector={}",
                    hash,
                    venue.name,
                    decoder::selector_hex(input)
                );
            }
            decoded
        }
        None => None,
    };

    let gas_price = TransactionTrait::gas_price(&tx);
    let enriched = EnrichedTransaction {
        hash,
        from: tx.from(),
        to,
        value: TransactionTrait::value(&tx),
        gas_limit: TransactionTrait::gas_limit(&tx),
        gas_price,
        max_fee_per_gas: if gas_price.is_some() {
            None
        } else {
            Some(TransactionTrait::max_fee_per_gas(&tx))
        },
        max_priority_fee_per_gas: TransactionTrait::max_priority_fee_per_gas(&tx),
        nonce: TransactionTrait::nonce(&tx),
        input: input.clone(),
        seen_at: Utc::now(),
        block_number: tx.block_number,
        decoded_swap,
    };

    publish(config, cache, stats, &enriched).await;

    let elapsed_ms = started.elapsed().as_millis() as u64;
    stats.record(&enriched, elapsed_ms);
    if elapsed_ms > ENRICH_BUDGET_MS {
        warn!(
            "Slow enrichment: {:?} took {}ms (budget {}ms)",
            hash, elapsed_ms, ENRICH_BUDGET_MS
        );
    }
}

/// Write `tx:<hash>` and, for swaps, `swaps:<hash>` plus the bounded
/// queue entry. All cache errors are logged and swallowed.
async fn publish(
    config: &PipelineConfig,
    cache: &CacheClient,
    stats: &mut IngestStats,
    enriched: &EnrichedTransaction,
) {
    let json = match serde_json::to_string(enriched) {
        Ok(json) => json,
        Err(e) => {
            warn!("Serialize failed for {:?}: {}", enriched.hash, e);
            return;
        }
    };
    let ttl = config.mev.mempool_ttl_secs;
    let hash_hex = format!("{:?}", enriched.hash);

    if cache
        .set_with_ttl(&format!("tx:{}", hash_hex), &json, ttl)
        .await
        .is_err()
    {
        stats.cache_errors += 1;
    }

    if enriched.is_swap() {
        if cache
            .set_with_ttl(&format!("swaps:{}", hash_hex), &json, ttl)
            .await
            .is_err()
        {
            stats.cache_errors += 1;
            return;
        }
        if cache.list_push_left("swap_queue", &hash_hex).await.is_ok() {
            let _ = cache.list_trim("swap_queue", 0, SWAP_QUEUE_CAP - 1).await;
        } else {
            stats.cache_errors += 1;
        }
    }
}

/// Belt-and-braces cleanup: delete pipeline keys whose TTL is no longer
/// positive. Keys without expiry never belong to this pipeline.
async fn sweep_expired(config: &PipelineConfig, cache: &CacheClient) {
    let keys = match cache.keys_by_prefix("").await {
        Ok(keys) => keys,
        Err(_) => return,
    };
    let mut removed = 0usize;
    for key in keys {
        if let Ok(ttl) = cache.ttl(&key).await {
            if ttl <= 0 {
                if cache.delete(&key).await.is_ok() {
                    removed += 1;
                }
            }
        }
    }
    if removed > 0 {
        debug!(
            "Expired-key sweep removed {} entries under prefix {}",
            removed, config.mev.cache_key_prefix
        );
    }
}

/// Running ingest counters plus enrichment-latency samples for the p95
/// budget check.
#[derive(Default)]
struct IngestStats {
    processed: u64,
    deduped: u64,
    missing: u64,
    decoded: u64,
    undecoded: u64,
    cache_errors: u64,
    latency_samples_ms: Vec<u64>,
}

impl IngestStats {
    fn record(&mut self, enriched: &EnrichedTransaction, elapsed_ms: u64) {
        self.processed += 1;
        if enriched.decoded_swap.is_some() {
            self.decoded += 1;
        } else {
            self.undecoded += 1;
        }
        if self.latency_samples_ms.len() >= 10_000 {
            self.latency_samples_ms.clear();
        }
        self.latency_samples_ms.push(elapsed_ms);
    }

    fn p95_latency_ms(&self) -> u64 {
        if self.latency_samples_ms.is_empty() {
            return 0;
        }
        let mut sorted = self.latency_samples_ms.clone();
        sorted.sort_unstable();
        let idx = (sorted.len() * 95 / 100).min(sorted.len() - 1);
        sorted[idx]
    }

    fn log_summary(&self, dedup_size: usize) {
        info!(
            "MEMPOOL STATS | processed={} deduped={} missing={} | decoded={} undecoded={} | \
             cache_errors={} | p95_enrich={}ms (budget {}ms) | dedup_size={}",
            self.processed,
            self.deduped,
            self.missing,
            self.decoded,
            self.undecoded,
            self.cache_errors,
            self.p95_latency_ms(),
            ENRICH_BUDGET_MS,
            dedup_size,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_p95_latency() {
        let mut stats = IngestStats::default();
        for ms in 1..=100u64 {
            stats.latency_samples_ms.push(ms);
        }
        assert_eq!(stats.p95_latency_ms(), 96);

        let empty = IngestStats::default();
        assert_eq!(empty.p95_latency_ms(), 0);
    }

    #[test]
    fn test_dedup_cap_never_exceeded() {
        let mut seen: HashSet<B256> = HashSet::new();
        for i in 0..(DEDUP_CAP * 2 + 7) {
            let mut bytes = [0u8; 32];
            bytes[..8].copy_from_slice(&(i as u64).to_be_bytes());
            let hash = B256::from(bytes);
            if seen.len() >= DEDUP_CAP {
                seen.clear();
            }
            seen.insert(hash);
            assert!(seen.len() <= DEDUP_CAP);
        }
    }

    #[test]
    fn test_swap_queue_trim_bounds() {
        // LTRIM 0..=999 keeps exactly the newest 1000 entries
        assert_eq!(SWAP_QUEUE_CAP - 1, 999);
    }
}
