//! Decodes raw logs into launchpad events and maps them onto store rows.
//!
//! Decoding happens in two steps. [`decode_pool_log`] / [`decode_trade_log`]
//! turn a log into a [`PendingEvent`] that still lacks its block timestamp and
//! canonical transaction hash; once those are resolved, [`map_pool`] /
//! [`map_trade`] validate the payload and build the row. Either step may
//! reject the event with a [`SkipReason`].

use std::fmt;

use alloy::primitives::{Address, B256, U256};
use alloy::rpc::types::Log;
use chrono::{DateTime, Utc};
use launchpad_data::{Amount, Pool, Trade, TradeSide};

use crate::contracts::{NewPool, PoolCreated, Trade as TradeEvent, TradeExecuted};

/// Why a single event was left out of an otherwise healthy chunk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// The log data does not decode as the expected event.
    Undecodable(String),
    /// The log has no block number, transaction hash, or log index (pending or pruned).
    MissingMetadata(&'static str),
    /// A required field is empty, zero, or out of range.
    Invalid(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Undecodable(e) => write!(f, "undecodable log: {}", e),
            SkipReason::MissingMetadata(field) => write!(f, "log missing {}", field),
            SkipReason::Invalid(e) => write!(f, "invalid event: {}", e),
        }
    }
}

/// Event payload decoded from a log.
#[derive(Clone, Debug, PartialEq)]
pub enum EventPayload {
    Pool(PoolCreated),
    Trade(TradeExecuted),
}

/// A decoded event awaiting its block timestamp and receipt.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingEvent {
    /// Contract that emitted the log.
    pub contract_address: Address,
    pub block_number: u64,
    pub log_index: u64,
    pub tx_hash: B256,
    pub payload: EventPayload,
}

/// Chain data resolved for a pending event.
#[derive(Clone, Debug, PartialEq)]
pub struct EventContext {
    pub chain_id: u64,
    pub contract_address: Address,
    pub block_number: u64,
    pub block_timestamp: DateTime<Utc>,
    /// Hash taken from the transaction receipt.
    pub transaction_hash: B256,
}

fn log_position(log: &Log) -> Result<(u64, u64, B256), SkipReason> {
    let block_number = log
        .block_number
        .ok_or(SkipReason::MissingMetadata("block number"))?;
    let log_index = log.log_index.ok_or(SkipReason::MissingMetadata("log index"))?;
    let tx_hash = log
        .transaction_hash
        .ok_or(SkipReason::MissingMetadata("transaction hash"))?;
    Ok((block_number, log_index, tx_hash))
}

/// Decodes a `NewPool` log.
pub fn decode_pool_log(log: &Log) -> Result<PendingEvent, SkipReason> {
    let (block_number, log_index, tx_hash) = log_position(log)?;
    let decoded = log
        .log_decode::<NewPool>()
        .map_err(|e| SkipReason::Undecodable(e.to_string()))?;
    Ok(PendingEvent {
        contract_address: log.address(),
        block_number,
        log_index,
        tx_hash,
        payload: EventPayload::Pool(decoded.inner.data.pool),
    })
}

/// Decodes a `Trade` log.
pub fn decode_trade_log(log: &Log) -> Result<PendingEvent, SkipReason> {
    let (block_number, log_index, tx_hash) = log_position(log)?;
    let decoded = log
        .log_decode::<TradeEvent>()
        .map_err(|e| SkipReason::Undecodable(e.to_string()))?;
    Ok(PendingEvent {
        contract_address: log.address(),
        block_number,
        log_index,
        tx_hash,
        payload: EventPayload::Trade(decoded.inner.data.trade),
    })
}

fn require_address(field: &str, value: Address) -> Result<Address, SkipReason> {
    if value.is_zero() {
        return Err(SkipReason::Invalid(format!("{} is the zero address", field)));
    }
    Ok(value)
}

fn require_text(field: &str, value: &str) -> Result<String, SkipReason> {
    if value.trim().is_empty() {
        return Err(SkipReason::Invalid(format!("{} is empty", field)));
    }
    Ok(value.to_string())
}

fn optional_text(value: &str) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn narrow<T: TryFrom<U256>>(field: &str, value: U256) -> Result<T, SkipReason> {
    T::try_from(value).map_err(|_| SkipReason::Invalid(format!("{} {} out of range", field, value)))
}

/// Narrows an id to what an SQLite `INTEGER` column can hold.
fn storable_id(field: &str, value: U256) -> Result<u64, SkipReason> {
    let id: i64 = narrow(field, value)?;
    u64::try_from(id).map_err(|_| SkipReason::Invalid(format!("{} {} out of range", field, value)))
}

fn trade_side(raw: U256) -> TradeSide {
    if raw == U256::from(1u8) {
        return TradeSide::Buy;
    }
    if raw > U256::from(2u8) {
        tracing::warn!(side = %raw, "unexpected trade side value, recording as sell");
    }
    TradeSide::Sell
}

/// Validates a `NewPool` payload and builds the pool row.
pub fn map_pool(event: &PoolCreated, ctx: &EventContext) -> Result<Pool, SkipReason> {
    Ok(Pool {
        chain_id: ctx.chain_id,
        contract_address: ctx.contract_address,
        pool_id: storable_id("poolId", event.poolId)?,
        creator: require_address("creator", event.creator)?,
        token_address: require_address("tokenAddress", event.tokenAddress)?,
        token_decimals: narrow("tokenDecimals", event.tokenDecimals)?,
        nft_name: require_text("nftName", &event.nftName)?,
        nft_ticker: require_text("nftTicker", &event.nftTicker)?,
        uri: optional_text(&event.uri),
        nft_description: optional_text(&event.nftDescription),
        conversion_rate: Amount::from(event.conversionRate),
        token_supply: Amount::from(event.tokenSupply),
        token_balance: Amount::from(event.tokenBalance),
        eth_balance: Amount::from(event.ethBalance),
        nft_price: Amount::from(event.nftPrice),
        fee_rate: Amount::from(event.feeRate),
        mintable: narrow("mintable", event.mintable)?,
        lp_amount: Amount::from(event.lpAmount),
        transaction_hash: ctx.transaction_hash,
        block_number: ctx.block_number,
        block_timestamp: ctx.block_timestamp,
        token_price: None,
        market_cap: None,
        webhook_sent: false,
    })
}

/// Validates a `Trade` payload and builds the trade row.
pub fn map_trade(event: &TradeExecuted, ctx: &EventContext) -> Result<Trade, SkipReason> {
    Ok(Trade {
        chain_id: ctx.chain_id,
        contract_address: ctx.contract_address,
        pool_id: storable_id("poolId", event.poolId)?,
        trader: require_address("trader", event.trader)?,
        sender: require_address("sender", event.sender)?,
        token_address: require_address("tokenAddress", event.tokenAddress)?,
        token_name: require_text("tokenName", &event.tokenName)?,
        token_ticker: require_text("tokenTicker", &event.tokenTicker)?,
        token_uri: optional_text(&event.tokenUri),
        quote_amount: Amount::from(event.quoteAmount),
        base_amount: Amount::from(event.baseAmount),
        fee: Amount::from(event.fee),
        side: trade_side(event.side),
        pool_eth_balance: Amount::from(event.poolEthBalance),
        pool_token_balance: Amount::from(event.poolTokenBalance),
        transaction_hash: ctx.transaction_hash,
        block_number: ctx.block_number,
        block_timestamp: ctx.block_timestamp,
        webhook_sent: false,
    })
}
