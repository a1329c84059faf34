//! Live reserve state: discovery, refresh, and price derivation.

pub mod view;

pub use view::{pool_max_trade, pool_mid_price, ReserveMap, ReserveView};
