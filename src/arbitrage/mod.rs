//! Cross-venue arbitrage detection stage.

pub mod detector;

pub use detector::{load_published_opportunities, should_rewrite, ArbDetector};
