//! launchpad-scanner: follows a launchpad's pool factory and bonding curve
//! contracts and ingests their events into the relational store.
//!
//! Blocks are scanned in confirmed chunks. Each chunk is committed together
//! with the scanner's progress marker, so a restart resumes exactly where the
//! last commit left off.

pub mod backoff;
pub mod client;
pub mod config;
pub mod contracts;
pub mod decoder;
pub mod ingest;
pub mod metrics;
pub mod scanner;
pub mod shutdown;

pub use client::{ChainClient, ClientPair, Connect, HttpConnector, Route, RpcClient};
pub use config::ScannerConfig;
pub use scanner::{BlockRange, IterationOutcome, Scanner, ScannerStatus};
pub use shutdown::StopHandle;
