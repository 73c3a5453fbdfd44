//! Shared test doubles and factories.
//!
//! `MockChain` stands in for a JSON-RPC node: it serves logs filtered the way
//! `eth_getLogs` would, and can be told to fail a number of calls.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::primitives::{address, Address, LogData, B256, U256};
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;
use eyre::{eyre, Result};
use launchpad_data::Store;
use launchpad_scanner::contracts::{NewPool, PoolCreated, Trade as TradeEvent, TradeExecuted};
use launchpad_scanner::{ChainClient, Connect, ScannerConfig, StopHandle};

pub const CHAIN_ID: u64 = 56;
pub const SCANNER_NAME: &str = "bsc-test";
pub const FACTORY: Address = address!("1111111111111111111111111111111111111111");
pub const CURVE: Address = address!("4444444444444444444444444444444444444444");
pub const CREATOR: Address = address!("2222222222222222222222222222222222222222");
pub const TOKEN: Address = address!("3333333333333333333333333333333333333333");
pub const TRADER: Address = address!("5555555555555555555555555555555555555555");

pub const PRIMARY_URL: &str = "mock://primary";
pub const ARCHIVE_URL: &str = "mock://archive";

/// Unix time of block 0 on every mock chain; blocks are 3 seconds apart.
pub const GENESIS_TIME: u64 = 1_700_000_000;

pub fn test_store() -> Arc<Store> {
    Arc::new(Store::new(":memory:").expect("in-memory store should always open"))
}

/// Scanner config pointed at the mock contracts, starting at `start_block`.
pub fn scanner_config(start_block: u64) -> ScannerConfig {
    let mut config = ScannerConfig::new(CHAIN_ID, SCANNER_NAME, PRIMARY_URL, CURVE, FACTORY);
    config.start_block = Some(start_block);
    config.poll_interval = Duration::from_millis(5);
    config.reconnect_base_delay = Duration::from_millis(1);
    config
}

#[derive(Default)]
struct ChainState {
    height: u64,
    logs: Vec<Log>,
    missing_blocks: HashSet<u64>,
    fail_height_calls: usize,
    fail_logs_from: Option<u64>,
    stop_on_logs_from: Option<(u64, StopHandle)>,
    log_calls: Vec<(Address, u64, u64)>,
}

/// In-memory node. Clones share state, so a test keeps a handle to the chain
/// it gave the connector.
#[derive(Clone, Default)]
pub struct MockChain {
    state: Arc<Mutex<ChainState>>,
}

impl MockChain {
    pub fn new(height: u64) -> Self {
        let chain = Self::default();
        chain.set_height(height);
        chain
    }

    pub fn set_height(&self, height: u64) {
        self.state.lock().unwrap().height = height;
    }

    pub fn push_log(&self, log: Log) {
        self.state.lock().unwrap().logs.push(log);
    }

    /// The next `n` `eth_blockNumber` calls fail.
    pub fn fail_height_calls(&self, n: usize) {
        self.state.lock().unwrap().fail_height_calls = n;
    }

    /// `eth_getLogs` fails for any range starting at or after `block`.
    pub fn fail_logs_from(&self, block: Option<u64>) {
        self.state.lock().unwrap().fail_logs_from = block;
    }

    /// Requests a stop on `handle` when `eth_getLogs` is called for a range
    /// starting at `block`, so the stop lands while that chunk is in flight.
    pub fn stop_when_fetching(&self, block: u64, handle: StopHandle) {
        self.state.lock().unwrap().stop_on_logs_from = Some((block, handle));
    }

    pub fn drop_block(&self, number: u64) {
        self.state.lock().unwrap().missing_blocks.insert(number);
    }

    /// `(address, from, to)` of every `eth_getLogs` call so far.
    pub fn log_calls(&self) -> Vec<(Address, u64, u64)> {
        self.state.lock().unwrap().log_calls.clone()
    }
}

impl ChainClient for MockChain {
    async fn block_number(&self) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        if state.fail_height_calls > 0 {
            state.fail_height_calls -= 1;
            return Err(eyre!("connection refused"));
        }
        Ok(state.height)
    }

    async fn logs(&self, address: Address, topic: B256, from: u64, to: u64) -> Result<Vec<Log>> {
        let mut state = self.state.lock().unwrap();
        state.log_calls.push((address, from, to));
        if let Some((_, handle)) = state.stop_on_logs_from.as_ref().filter(|(block, _)| *block == from) {
            handle.stop();
        }
        if state.fail_logs_from.is_some_and(|block| from >= block) {
            return Err(eyre!("eth_getLogs timed out"));
        }
        Ok(state
            .logs
            .iter()
            .filter(|log| {
                log.address() == address
                    && log.inner.data.topics().first() == Some(&topic)
                    && log.block_number.is_some_and(|n| (from..=to).contains(&n))
            })
            .cloned()
            .collect())
    }

    async fn block_timestamp(&self, number: u64) -> Result<Option<u64>> {
        let state = self.state.lock().unwrap();
        if state.missing_blocks.contains(&number) {
            return Ok(None);
        }
        Ok(Some(GENESIS_TIME + number * 3))
    }

    async fn receipt_hash(&self, tx_hash: B256) -> Result<Option<B256>> {
        Ok(Some(tx_hash))
    }
}

/// Hands out `MockChain` handles by URL and can refuse connections.
#[derive(Clone, Default)]
pub struct MockConnector {
    chains: Arc<Mutex<HashMap<String, MockChain>>>,
    failures: Arc<Mutex<usize>>,
    connects: Arc<Mutex<usize>>,
}

impl MockConnector {
    pub fn with_primary(chain: &MockChain) -> Self {
        let connector = Self::default();
        connector.register(PRIMARY_URL, chain);
        connector
    }

    pub fn register(&self, url: &str, chain: &MockChain) {
        self.chains
            .lock()
            .unwrap()
            .insert(url.to_string(), chain.clone());
    }

    pub fn fail_next_connects(&self, n: usize) {
        *self.failures.lock().unwrap() = n;
    }

    /// Successful and failed connection attempts so far.
    pub fn connects(&self) -> usize {
        *self.connects.lock().unwrap()
    }
}

impl Connect for MockConnector {
    type Client = MockChain;

    async fn connect(&self, url: &str) -> Result<MockChain> {
        *self.connects.lock().unwrap() += 1;
        let mut failures = self.failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err(eyre!("connect to {} refused", url));
        }
        self.chains
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| eyre!("no mock chain at {}", url))
    }
}

/// `NewPool` payload with 1,000 whole tokens of supply (6 decimals).
pub fn sample_pool_created(pool_id: u64) -> PoolCreated {
    PoolCreated {
        poolId: U256::from(pool_id),
        creator: CREATOR,
        tokenAddress: TOKEN,
        tokenDecimals: U256::from(6),
        nftName: format!("Pool {}", pool_id),
        nftTicker: format!("P{}", pool_id),
        uri: "ipfs://pool".to_string(),
        nftDescription: String::new(),
        conversionRate: U256::from(1000),
        tokenSupply: U256::from(1_000_000_000u64),
        tokenBalance: U256::from(800_000_000u64),
        ethBalance: U256::ZERO,
        nftPrice: U256::from(10),
        feeRate: U256::from(100),
        mintable: U256::from(1),
        lpAmount: U256::ZERO,
        time: U256::from(GENESIS_TIME),
    }
}

/// `Trade` payload. `quote` is in wei, `base` in 6-decimal token units.
pub fn sample_trade_executed(pool_id: u64, quote: u128, base: u128, side: u8) -> TradeExecuted {
    TradeExecuted {
        poolId: U256::from(pool_id),
        trader: TRADER,
        sender: TRADER,
        tokenAddress: TOKEN,
        tokenName: format!("Pool {}", pool_id),
        tokenTicker: format!("P{}", pool_id),
        tokenUri: String::new(),
        quoteAmount: U256::from(quote),
        baseAmount: U256::from(base),
        fee: U256::from(quote / 100),
        side: U256::from(side),
        poolEthBalance: U256::from(quote),
        poolTokenBalance: U256::from(800_000_000u64),
        time: U256::from(GENESIS_TIME),
    }
}

/// Transaction hash derived from `(block, log_index)` so each log is distinct.
pub fn tx_hash(block: u64, log_index: u64) -> B256 {
    B256::from(U256::from((block << 16) | log_index).to_be_bytes::<32>())
}

fn mined_log(address: Address, data: LogData, block: u64, log_index: u64) -> Log {
    Log {
        inner: alloy::primitives::Log { address, data },
        block_number: Some(block),
        log_index: Some(log_index),
        transaction_hash: Some(tx_hash(block, log_index)),
        ..Default::default()
    }
}

pub fn pool_log(pool: PoolCreated, block: u64, log_index: u64) -> Log {
    mined_log(FACTORY, NewPool { pool }.encode_log_data(), block, log_index)
}

pub fn trade_log(trade: TradeExecuted, block: u64, log_index: u64) -> Log {
    mined_log(CURVE, TradeEvent { trade }.encode_log_data(), block, log_index)
}

/// A factory log carrying the `NewPool` topic but truncated data.
pub fn garbage_pool_log(block: u64, log_index: u64) -> Log {
    let data = LogData::new_unchecked(vec![NewPool::SIGNATURE_HASH], vec![0xde, 0xad].into());
    mined_log(FACTORY, data, block, log_index)
}
