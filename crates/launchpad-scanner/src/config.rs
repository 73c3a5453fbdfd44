//! Scanner configuration.

use std::time::Duration;

use alloy::primitives::Address;
use eyre::{ensure, Result};

pub const DEFAULT_CONFIRMATIONS: u64 = 12;
pub const DEFAULT_CHUNK_SIZE: u64 = 1000;
pub const DEFAULT_ARCHIVE_THRESHOLD: u64 = 128;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5000);
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;
pub const DEFAULT_RECONNECT_BASE_DELAY: Duration = Duration::from_millis(5000);

/// Everything one scan stream needs.
#[derive(Clone, Debug, PartialEq)]
pub struct ScannerConfig {
    pub chain_id: u64,
    /// Identifies the stream's state row together with `chain_id`.
    pub scanner_name: String,
    pub rpc_url: String,
    pub archive_rpc_url: Option<String>,
    /// Bonding curve contract emitting `Trade`.
    pub bonding_curve_address: Address,
    /// Pool factory contract emitting `NewPool`.
    pub create_pool_address: Address,
    /// First block to scan on a fresh stream. Defaults to the chain tip.
    pub start_block: Option<u64>,
    pub confirmations: u64,
    pub poll_interval: Duration,
    pub chunk_size: u64,
    pub archive_threshold: u64,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay: Duration,
}

impl ScannerConfig {
    pub fn new(
        chain_id: u64,
        scanner_name: impl Into<String>,
        rpc_url: impl Into<String>,
        bonding_curve_address: Address,
        create_pool_address: Address,
    ) -> Self {
        Self {
            chain_id,
            scanner_name: scanner_name.into(),
            rpc_url: rpc_url.into(),
            archive_rpc_url: None,
            bonding_curve_address,
            create_pool_address,
            start_block: None,
            confirmations: DEFAULT_CONFIRMATIONS,
            poll_interval: DEFAULT_POLL_INTERVAL,
            chunk_size: DEFAULT_CHUNK_SIZE,
            archive_threshold: DEFAULT_ARCHIVE_THRESHOLD,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_base_delay: DEFAULT_RECONNECT_BASE_DELAY,
        }
    }

    /// Rejects settings the scanner cannot run with.
    ///
    /// # Errors
    /// Returns error describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.scanner_name.trim().is_empty(), "scanner name must not be empty");
        ensure!(!self.rpc_url.trim().is_empty(), "primary RPC URL must not be empty");
        ensure!(self.chunk_size > 0, "chunk size must be at least 1 block");
        ensure!(
            !self.bonding_curve_address.is_zero(),
            "bonding curve address must be set"
        );
        ensure!(
            !self.create_pool_address.is_zero(),
            "pool factory address must be set"
        );
        ensure!(
            self.max_reconnect_attempts > 0,
            "max reconnect attempts must be at least 1"
        );
        if let Some(url) = &self.archive_rpc_url {
            ensure!(!url.trim().is_empty(), "archive RPC URL must not be blank");
        }
        Ok(())
    }
}
