//! launchpad-data crate

pub mod decimal;
pub mod store;
pub mod types;

pub use store::{ChunkCommit, Store};
pub use types::{Amount, Pool, PoolKey, ScannerState, Trade, TradeKey, TradeSide};
