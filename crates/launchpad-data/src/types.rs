//! Row types for scanner progress, pools, and trades.

use std::fmt;
use std::str::FromStr;

use alloy::primitives::{Address, B256, U256};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Unsigned on-chain quantity (uint256), rendered as a base-10 string.
///
/// Trade amounts and supplies routinely exceed 2^53, so they never pass
/// through floating point. Storage and JSON both use the decimal text form.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(U256);

impl Amount {
    pub const ZERO: Amount = Amount(U256::ZERO);

    pub fn as_u256(&self) -> U256 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl From<U256> for Amount {
    fn from(value: U256) -> Self {
        Self(value)
    }
}

impl From<u64> for Amount {
    fn from(value: u64) -> Self {
        Self(U256::from(value))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Amount {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        U256::from_str_radix(s.trim(), 10)
            .map(Self)
            .map_err(|e| eyre::eyre!("invalid decimal amount {:?}: {}", s, e))
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Direction of a trade against the bonding curve.
///
/// Canonical encoding is 1 = buy, 0 = sell. The contract emits 1 for buys;
/// every other emitted value is treated as a sell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", from = "u8")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn code(self) -> u8 {
        match self {
            TradeSide::Buy => 1,
            TradeSide::Sell => 0,
        }
    }
}

impl From<u8> for TradeSide {
    fn from(code: u8) -> Self {
        if code == 1 {
            TradeSide::Buy
        } else {
            TradeSide::Sell
        }
    }
}

impl From<TradeSide> for u8 {
    fn from(side: TradeSide) -> Self {
        side.code()
    }
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeSide::Buy => f.write_str("buy"),
            TradeSide::Sell => f.write_str("sell"),
        }
    }
}

/// Durable scan progress for one (chain, scanner name) stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannerState {
    pub chain_id: u64,
    pub scanner_name: String,
    /// Highest block whose events are durably committed.
    pub last_processed_block: u64,
    pub is_running: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub last_error_message: Option<String>,
    pub total_blocks_processed: u64,
    pub total_events_processed: u64,
}

/// Natural key of a pool row.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub chain_id: u64,
    pub pool_id: u64,
    pub transaction_hash: B256,
    pub block_timestamp: DateTime<Utc>,
}

/// Natural key of a trade row.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TradeKey {
    pub chain_id: u64,
    pub transaction_hash: B256,
    pub pool_id: u64,
    pub block_timestamp: DateTime<Utc>,
}

/// A bonding-curve pool, recorded from a `NewPool` event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pool {
    pub chain_id: u64,
    /// Pool factory contract that emitted the event.
    pub contract_address: Address,
    pub pool_id: u64,
    pub creator: Address,
    pub token_address: Address,
    pub token_decimals: u32,
    pub nft_name: String,
    pub nft_ticker: String,
    pub uri: Option<String>,
    pub nft_description: Option<String>,
    pub conversion_rate: Amount,
    pub token_supply: Amount,
    pub token_balance: Amount,
    pub eth_balance: Amount,
    pub nft_price: Amount,
    pub fee_rate: Amount,
    pub mintable: u32,
    pub lp_amount: Amount,
    pub transaction_hash: B256,
    pub block_number: u64,
    pub block_timestamp: DateTime<Utc>,
    /// Derived from the latest trade; `None` until one prices the pool.
    pub token_price: Option<BigDecimal>,
    pub market_cap: Option<BigDecimal>,
    pub webhook_sent: bool,
}

impl Pool {
    pub fn key(&self) -> PoolKey {
        PoolKey {
            chain_id: self.chain_id,
            pool_id: self.pool_id,
            transaction_hash: self.transaction_hash,
            block_timestamp: self.block_timestamp,
        }
    }
}

/// A buy or sell against a pool, recorded from a `Trade` event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub chain_id: u64,
    /// Bonding curve contract that emitted the event.
    pub contract_address: Address,
    pub pool_id: u64,
    pub trader: Address,
    pub sender: Address,
    pub token_address: Address,
    pub token_name: String,
    pub token_ticker: String,
    pub token_uri: Option<String>,
    /// Quote-side amount (18 decimals).
    pub quote_amount: Amount,
    /// Base-side amount (6 decimals).
    pub base_amount: Amount,
    pub fee: Amount,
    pub side: TradeSide,
    pub pool_eth_balance: Amount,
    pub pool_token_balance: Amount,
    pub transaction_hash: B256,
    pub block_number: u64,
    pub block_timestamp: DateTime<Utc>,
    pub webhook_sent: bool,
}

impl Trade {
    pub fn key(&self) -> TradeKey {
        TradeKey {
            chain_id: self.chain_id,
            transaction_hash: self.transaction_hash,
            pool_id: self.pool_id,
            block_timestamp: self.block_timestamp,
        }
    }
}

/// Lowercase `0x`-prefixed hex, the storage form of addresses and hashes.
pub fn lower_hex(bytes: impl AsRef<[u8]>) -> String {
    format!("0x{}", alloy::hex::encode(bytes))
}
