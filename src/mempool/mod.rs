//! Mempool ingestion stage: pending-transaction subscription, calldata
//! decoding, and cache publication.

pub mod decoder;
pub mod ingestor;

pub use ingestor::MempoolIngestor;
