//! Avalanche Cross-DEX Arbitrage Pipeline
//!
//! Three independent stages connected only through the cache and the
//! chain node: mempool ingestion, reserve-view arbitrage detection, and
//! forked-sandbox bundle simulation.

pub mod arbitrage;
pub mod cache;
pub mod chain;
pub mod config;
pub mod contracts;
pub mod mempool;
pub mod reserves;
pub mod simulator;
pub mod types;

// Re-export commonly used types
pub use arbitrage::ArbDetector;
pub use cache::CacheClient;
pub use chain::ChainClient;
pub use config::PipelineConfig;
pub use mempool::MempoolIngestor;
pub use reserves::ReserveView;
pub use simulator::BundleSimulator;
pub use types::{
    ArbitrageOpportunity, EnrichedTransaction, PipelineError, PoolReserves, SimulationResult,
    TransactionBundle,
};
