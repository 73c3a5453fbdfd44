//! SQLite storage for scanner progress, pools, and trades.
//!
//! Uses WAL mode so the webhook dispatcher can read while the scanner
//! writes. Natural keys are enforced as `UNIQUE` constraints; inserts use
//! `ON CONFLICT DO NOTHING`, which is what makes chunk replay idempotent.

use std::fmt::Display;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use alloy::primitives::{Address, B256};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use eyre::{eyre, Result, WrapErr};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::decimal::{to_plain_string, METRIC_SCALE};
use crate::types::{lower_hex, Pool, PoolKey, ScannerState, Trade, TradeKey, TradeSide};

/// Progress recorded when a chunk is committed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkCommit {
    /// Last block of the chunk; becomes `last_processed_block`.
    pub end_block: u64,
    pub blocks: u64,
    pub events: u64,
}

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Creates or opens a SQLite database with WAL mode enabled.
    ///
    /// # Errors
    /// Returns error if the database cannot be opened or migrations fail.
    pub fn new(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .wrap_err_with(|| format!("failed to open database at {}", path))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| eyre!("database connection mutex poisoned"))
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn()?.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS scanner_states (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chain_id INTEGER NOT NULL,
                scanner_name TEXT NOT NULL,
                last_processed_block INTEGER NOT NULL DEFAULT 0,
                is_running INTEGER NOT NULL DEFAULT 0,
                last_run_at TEXT,
                last_success_at TEXT,
                last_error_at TEXT,
                last_error_message TEXT,
                total_blocks_processed INTEGER NOT NULL DEFAULT 0,
                total_events_processed INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (chain_id, scanner_name)
            );

            CREATE TABLE IF NOT EXISTS pools (
                chain_id INTEGER NOT NULL,
                contract_address TEXT NOT NULL,
                pool_id INTEGER NOT NULL,
                creator TEXT NOT NULL,
                token_address TEXT NOT NULL,
                token_decimals INTEGER NOT NULL,
                nft_name TEXT NOT NULL,
                nft_ticker TEXT NOT NULL,
                uri TEXT,
                nft_description TEXT,
                conversion_rate TEXT NOT NULL,
                token_supply TEXT NOT NULL,
                token_balance TEXT NOT NULL,
                eth_balance TEXT NOT NULL,
                nft_price TEXT NOT NULL,
                fee_rate TEXT NOT NULL,
                mintable INTEGER NOT NULL,
                lp_amount TEXT NOT NULL,
                transaction_hash TEXT NOT NULL,
                block_number INTEGER NOT NULL,
                block_timestamp TEXT NOT NULL,
                token_price TEXT,
                market_cap TEXT,
                webhook_sent INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (chain_id, pool_id, transaction_hash, block_timestamp)
            );

            CREATE INDEX IF NOT EXISTS pools_chain_id_pool_id_idx ON pools (chain_id, pool_id);
            CREATE INDEX IF NOT EXISTS pools_webhook_sent_idx ON pools (webhook_sent);
            CREATE INDEX IF NOT EXISTS pools_block_number_idx ON pools (block_number);

            CREATE TABLE IF NOT EXISTS trades (
                chain_id INTEGER NOT NULL,
                contract_address TEXT NOT NULL,
                pool_id INTEGER NOT NULL,
                trader TEXT NOT NULL,
                sender TEXT NOT NULL,
                token_address TEXT NOT NULL,
                token_name TEXT NOT NULL,
                token_ticker TEXT NOT NULL,
                token_uri TEXT,
                quote_amount TEXT NOT NULL,
                base_amount TEXT NOT NULL,
                fee TEXT NOT NULL,
                side INTEGER NOT NULL,
                pool_eth_balance TEXT NOT NULL,
                pool_token_balance TEXT NOT NULL,
                transaction_hash TEXT NOT NULL,
                block_number INTEGER NOT NULL,
                block_timestamp TEXT NOT NULL,
                webhook_sent INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (chain_id, transaction_hash, pool_id, block_timestamp)
            );

            CREATE INDEX IF NOT EXISTS trades_chain_pool_time_idx
                ON trades (chain_id, pool_id, block_timestamp);
            CREATE INDEX IF NOT EXISTS trades_webhook_sent_idx ON trades (webhook_sent);
            CREATE INDEX IF NOT EXISTS trades_trader_idx ON trades (trader);
            ",
        )?;
        Ok(())
    }

    // ── scanner state ──────────────────────────────────────────────────

    /// Loads the state row for a stream, creating it with zeroed counters
    /// on first use.
    ///
    /// # Errors
    /// Returns error if the insert or select fails.
    pub fn load_or_create_state(&self, chain_id: u64, scanner_name: &str) -> Result<ScannerState> {
        let now = Utc::now();
        let conn = self.conn()?;
        let created = conn.execute(
            "
            INSERT INTO scanner_states (chain_id, scanner_name, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?3)
            ON CONFLICT (chain_id, scanner_name) DO NOTHING
            ",
            params![chain_id, scanner_name, now],
        )?;
        if created > 0 {
            tracing::info!(chain_id, scanner_name, "created scanner state");
        }

        conn.query_row(
            "SELECT * FROM scanner_states WHERE chain_id = ?1 AND scanner_name = ?2",
            params![chain_id, scanner_name],
            scanner_state_from_row,
        )
        .wrap_err("failed to load scanner state")
    }

    /// Returns the state row for a stream, if one exists.
    ///
    /// # Errors
    /// Returns error if the query fails.
    pub fn scanner_state(&self, chain_id: u64, scanner_name: &str) -> Result<Option<ScannerState>> {
        let state = self
            .conn()?
            .query_row(
                "SELECT * FROM scanner_states WHERE chain_id = ?1 AND scanner_name = ?2",
                params![chain_id, scanner_name],
                scanner_state_from_row,
            )
            .optional()?;
        Ok(state)
    }

    /// Lists every scanner state, ordered by chain then name.
    ///
    /// # Errors
    /// Returns error if the query fails.
    pub fn list_scanner_states(&self) -> Result<Vec<ScannerState>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT * FROM scanner_states ORDER BY chain_id, scanner_name")?;
        let states = stmt
            .query_map([], scanner_state_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(states)
    }

    /// Sets `last_processed_block` only if the stream has never advanced.
    ///
    /// Returns `true` if the row was updated.
    ///
    /// # Errors
    /// Returns error if the update fails.
    pub fn initialize_last_processed(
        &self,
        chain_id: u64,
        scanner_name: &str,
        block: u64,
    ) -> Result<bool> {
        let changed = self.conn()?.execute(
            "
            UPDATE scanner_states
            SET last_processed_block = ?3, updated_at = ?4
            WHERE chain_id = ?1 AND scanner_name = ?2 AND last_processed_block = 0
            ",
            params![chain_id, scanner_name, block, Utc::now()],
        )?;
        Ok(changed > 0)
    }

    pub fn mark_scanner_running(
        &self,
        chain_id: u64,
        scanner_name: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.update_state(
            "is_running = 1, last_run_at = ?3, updated_at = ?3",
            chain_id,
            scanner_name,
            params![chain_id, scanner_name, at],
        )
    }

    pub fn mark_scanner_stopped(&self, chain_id: u64, scanner_name: &str) -> Result<()> {
        self.update_state(
            "is_running = 0, updated_at = ?3",
            chain_id,
            scanner_name,
            params![chain_id, scanner_name, Utc::now()],
        )
    }

    pub fn record_scan_success(
        &self,
        chain_id: u64,
        scanner_name: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.update_state(
            "last_success_at = ?3, updated_at = ?3",
            chain_id,
            scanner_name,
            params![chain_id, scanner_name, at],
        )
    }

    pub fn record_scan_error(
        &self,
        chain_id: u64,
        scanner_name: &str,
        at: DateTime<Utc>,
        message: &str,
    ) -> Result<()> {
        self.update_state(
            "last_error_at = ?3, last_error_message = ?4, updated_at = ?3",
            chain_id,
            scanner_name,
            params![chain_id, scanner_name, at, message],
        )
    }

    /// Advances `last_processed_block` and bumps both counters in a single
    /// statement. The block never moves backwards.
    ///
    /// # Errors
    /// Returns error if the update fails or the state row is missing.
    pub fn commit_chunk(&self, chain_id: u64, scanner_name: &str, commit: ChunkCommit) -> Result<()> {
        self.update_state(
            "
            last_processed_block = MAX(last_processed_block, ?3),
            total_blocks_processed = total_blocks_processed + ?4,
            total_events_processed = total_events_processed + ?5,
            updated_at = ?6
            ",
            chain_id,
            scanner_name,
            params![
                chain_id,
                scanner_name,
                commit.end_block,
                commit.blocks,
                commit.events,
                Utc::now()
            ],
        )
    }

    /// Zeroes progress, counters, and telemetry for one stream, keeping the row.
    pub fn reset_scanner_state(&self, chain_id: u64, scanner_name: &str) -> Result<()> {
        self.update_state(
            "
            last_processed_block = 0, is_running = 0,
            total_blocks_processed = 0, total_events_processed = 0,
            last_run_at = NULL, last_success_at = NULL,
            last_error_at = NULL, last_error_message = NULL,
            updated_at = ?3
            ",
            chain_id,
            scanner_name,
            params![chain_id, scanner_name, Utc::now()],
        )
    }

    /// Resets every scanner state. Returns the number of rows reset.
    pub fn reset_all_scanner_states(&self) -> Result<usize> {
        let reset = self.conn()?.execute(
            "
            UPDATE scanner_states SET
                last_processed_block = 0, is_running = 0,
                total_blocks_processed = 0, total_events_processed = 0,
                last_run_at = NULL, last_success_at = NULL,
                last_error_at = NULL, last_error_message = NULL,
                updated_at = ?1
            ",
            params![Utc::now()],
        )?;
        Ok(reset)
    }

    fn update_state(
        &self,
        assignments: &str,
        chain_id: u64,
        scanner_name: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<()> {
        let sql = format!(
            "UPDATE scanner_states SET {} WHERE chain_id = ?1 AND scanner_name = ?2",
            assignments
        );
        let changed = self.conn()?.execute(&sql, params)?;
        if changed == 0 {
            return Err(eyre!(
                "no scanner state for chain {} / {}",
                chain_id,
                scanner_name
            ));
        }
        Ok(())
    }

    // ── pools ──────────────────────────────────────────────────────────

    /// Inserts a pool unless a row with the same natural key exists.
    ///
    /// Returns `true` if a row was inserted. An existing row is left untouched.
    ///
    /// # Errors
    /// Returns error if the insert fails for any reason other than the key conflict.
    pub fn insert_pool_if_absent(&self, pool: &Pool) -> Result<bool> {
        let now = Utc::now();
        let inserted = self.conn()?.execute(
            "
            INSERT INTO pools (
                chain_id, contract_address, pool_id, creator, token_address,
                token_decimals, nft_name, nft_ticker, uri, nft_description,
                conversion_rate, token_supply, token_balance, eth_balance, nft_price,
                fee_rate, mintable, lp_amount, transaction_hash, block_number,
                block_timestamp, token_price, market_cap, webhook_sent,
                created_at, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                ?16, ?17, ?18, ?19, ?20, ?21, NULL, NULL, 0, ?22, ?22
            )
            ON CONFLICT (chain_id, pool_id, transaction_hash, block_timestamp) DO NOTHING
            ",
            params![
                pool.chain_id,
                lower_hex(pool.contract_address),
                pool.pool_id,
                lower_hex(pool.creator),
                lower_hex(pool.token_address),
                pool.token_decimals,
                pool.nft_name,
                pool.nft_ticker,
                pool.uri,
                pool.nft_description,
                pool.conversion_rate.to_string(),
                pool.token_supply.to_string(),
                pool.token_balance.to_string(),
                pool.eth_balance.to_string(),
                pool.nft_price.to_string(),
                pool.fee_rate.to_string(),
                pool.mintable,
                pool.lp_amount.to_string(),
                lower_hex(pool.transaction_hash),
                pool.block_number,
                pool.block_timestamp,
                now,
            ],
        )?;
        Ok(inserted > 0)
    }

    /// All pool rows for a pool id on a chain, oldest first.
    pub fn pools_by_id(&self, chain_id: u64, pool_id: u64) -> Result<Vec<Pool>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM pools WHERE chain_id = ?1 AND pool_id = ?2 ORDER BY block_number, rowid",
        )?;
        let pools = stmt
            .query_map(params![chain_id, pool_id], pool_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(pools)
    }

    /// Overwrites the derived price and market cap of one pool row.
    pub fn set_pool_metrics(
        &self,
        key: &PoolKey,
        token_price: &BigDecimal,
        market_cap: &BigDecimal,
    ) -> Result<()> {
        let changed = self.conn()?.execute(
            "
            UPDATE pools SET token_price = ?5, market_cap = ?6, updated_at = ?7
            WHERE chain_id = ?1 AND pool_id = ?2 AND transaction_hash = ?3 AND block_timestamp = ?4
            ",
            params![
                key.chain_id,
                key.pool_id,
                lower_hex(key.transaction_hash),
                key.block_timestamp,
                to_plain_string(token_price, METRIC_SCALE),
                to_plain_string(market_cap, METRIC_SCALE),
                Utc::now(),
            ],
        )?;
        if changed == 0 {
            return Err(eyre!("pool {} on chain {} not found", key.pool_id, key.chain_id));
        }
        Ok(())
    }

    /// Pools not yet delivered to the webhook, in creation order.
    pub fn unsent_pools(&self, limit: usize) -> Result<Vec<Pool>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM pools WHERE webhook_sent = 0 ORDER BY created_at, rowid LIMIT ?1",
        )?;
        let pools = stmt
            .query_map(params![limit as i64], pool_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(pools)
    }

    /// Flips `webhook_sent` for one pool. Returns `false` if it was already sent.
    pub fn mark_pool_sent(&self, key: &PoolKey) -> Result<bool> {
        let changed = self.conn()?.execute(
            "
            UPDATE pools SET webhook_sent = 1, updated_at = ?5
            WHERE chain_id = ?1 AND pool_id = ?2 AND transaction_hash = ?3
              AND block_timestamp = ?4 AND webhook_sent = 0
            ",
            params![
                key.chain_id,
                key.pool_id,
                lower_hex(key.transaction_hash),
                key.block_timestamp,
                Utc::now(),
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn count_pools(&self, chain_id: u64) -> Result<u64> {
        let count = self.conn()?.query_row(
            "SELECT COUNT(*) FROM pools WHERE chain_id = ?1",
            params![chain_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ── trades ─────────────────────────────────────────────────────────

    /// Inserts a trade unless a row with the same natural key exists.
    ///
    /// Returns `true` if a row was inserted.
    ///
    /// # Errors
    /// Returns error if the insert fails for any reason other than the key conflict.
    pub fn insert_trade_if_absent(&self, trade: &Trade) -> Result<bool> {
        let now = Utc::now();
        let inserted = self.conn()?.execute(
            "
            INSERT INTO trades (
                chain_id, contract_address, pool_id, trader, sender, token_address,
                token_name, token_ticker, token_uri, quote_amount, base_amount, fee,
                side, pool_eth_balance, pool_token_balance, transaction_hash,
                block_number, block_timestamp, webhook_sent, created_at, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                ?16, ?17, ?18, 0, ?19, ?19
            )
            ON CONFLICT (chain_id, transaction_hash, pool_id, block_timestamp) DO NOTHING
            ",
            params![
                trade.chain_id,
                lower_hex(trade.contract_address),
                trade.pool_id,
                lower_hex(trade.trader),
                lower_hex(trade.sender),
                lower_hex(trade.token_address),
                trade.token_name,
                trade.token_ticker,
                trade.token_uri,
                trade.quote_amount.to_string(),
                trade.base_amount.to_string(),
                trade.fee.to_string(),
                trade.side.code(),
                trade.pool_eth_balance.to_string(),
                trade.pool_token_balance.to_string(),
                lower_hex(trade.transaction_hash),
                trade.block_number,
                trade.block_timestamp,
                now,
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Trades not yet delivered to the webhook, in creation order.
    pub fn unsent_trades(&self, limit: usize) -> Result<Vec<Trade>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM trades WHERE webhook_sent = 0 ORDER BY created_at, rowid LIMIT ?1",
        )?;
        let trades = stmt
            .query_map(params![limit as i64], trade_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(trades)
    }

    /// Flips `webhook_sent` for one trade. Returns `false` if it was already sent.
    pub fn mark_trade_sent(&self, key: &TradeKey) -> Result<bool> {
        let changed = self.conn()?.execute(
            "
            UPDATE trades SET webhook_sent = 1, updated_at = ?5
            WHERE chain_id = ?1 AND transaction_hash = ?2 AND pool_id = ?3
              AND block_timestamp = ?4 AND webhook_sent = 0
            ",
            params![
                key.chain_id,
                lower_hex(key.transaction_hash),
                key.pool_id,
                key.block_timestamp,
                Utc::now(),
            ],
        )?;
        Ok(changed > 0)
    }

    /// Trades for a pool ordered by block.
    pub fn trades_for_pool(&self, chain_id: u64, pool_id: u64) -> Result<Vec<Trade>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM trades WHERE chain_id = ?1 AND pool_id = ?2 ORDER BY block_number, rowid",
        )?;
        let trades = stmt
            .query_map(params![chain_id, pool_id], trade_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(trades)
    }

    pub fn count_trades(&self, chain_id: u64) -> Result<u64> {
        let count = self.conn()?.query_row(
            "SELECT COUNT(*) FROM trades WHERE chain_id = ?1",
            params![chain_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn parse_column<T>(row: &Row<'_>, column: &str) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    let text: String = row.get(column)?;
    text.parse().map_err(|e| {
        let index = row.as_ref().column_index(column).unwrap_or_default();
        rusqlite::Error::FromSqlConversionFailure(
            index,
            Type::Text,
            format!("{}: {}", column, e).into(),
        )
    })
}

fn parse_optional_column<T>(row: &Row<'_>, column: &str) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    let text: Option<String> = row.get(column)?;
    match text {
        None => Ok(None),
        Some(_) => parse_column(row, column).map(Some),
    }
}

fn scanner_state_from_row(row: &Row<'_>) -> rusqlite::Result<ScannerState> {
    Ok(ScannerState {
        chain_id: row.get("chain_id")?,
        scanner_name: row.get("scanner_name")?,
        last_processed_block: row.get("last_processed_block")?,
        is_running: row.get("is_running")?,
        last_run_at: row.get("last_run_at")?,
        last_success_at: row.get("last_success_at")?,
        last_error_at: row.get("last_error_at")?,
        last_error_message: row.get("last_error_message")?,
        total_blocks_processed: row.get("total_blocks_processed")?,
        total_events_processed: row.get("total_events_processed")?,
    })
}

fn pool_from_row(row: &Row<'_>) -> rusqlite::Result<Pool> {
    Ok(Pool {
        chain_id: row.get("chain_id")?,
        contract_address: parse_column::<Address>(row, "contract_address")?,
        pool_id: row.get("pool_id")?,
        creator: parse_column::<Address>(row, "creator")?,
        token_address: parse_column::<Address>(row, "token_address")?,
        token_decimals: row.get("token_decimals")?,
        nft_name: row.get("nft_name")?,
        nft_ticker: row.get("nft_ticker")?,
        uri: row.get("uri")?,
        nft_description: row.get("nft_description")?,
        conversion_rate: parse_column(row, "conversion_rate")?,
        token_supply: parse_column(row, "token_supply")?,
        token_balance: parse_column(row, "token_balance")?,
        eth_balance: parse_column(row, "eth_balance")?,
        nft_price: parse_column(row, "nft_price")?,
        fee_rate: parse_column(row, "fee_rate")?,
        mintable: row.get("mintable")?,
        lp_amount: parse_column(row, "lp_amount")?,
        transaction_hash: parse_column::<B256>(row, "transaction_hash")?,
        block_number: row.get("block_number")?,
        block_timestamp: row.get("block_timestamp")?,
        token_price: parse_optional_column::<BigDecimal>(row, "token_price")?,
        market_cap: parse_optional_column::<BigDecimal>(row, "market_cap")?,
        webhook_sent: row.get("webhook_sent")?,
    })
}

fn trade_from_row(row: &Row<'_>) -> rusqlite::Result<Trade> {
    let side: u8 = row.get("side")?;
    Ok(Trade {
        chain_id: row.get("chain_id")?,
        contract_address: parse_column::<Address>(row, "contract_address")?,
        pool_id: row.get("pool_id")?,
        trader: parse_column::<Address>(row, "trader")?,
        sender: parse_column::<Address>(row, "sender")?,
        token_address: parse_column::<Address>(row, "token_address")?,
        token_name: row.get("token_name")?,
        token_ticker: row.get("token_ticker")?,
        token_uri: row.get("token_uri")?,
        quote_amount: parse_column(row, "quote_amount")?,
        base_amount: parse_column(row, "base_amount")?,
        fee: parse_column(row, "fee")?,
        side: TradeSide::from(side),
        pool_eth_balance: parse_column(row, "pool_eth_balance")?,
        pool_token_balance: parse_column(row, "pool_token_balance")?,
        transaction_hash: parse_column::<B256>(row, "transaction_hash")?,
        block_number: row.get("block_number")?,
        block_timestamp: row.get("block_timestamp")?,
        webhook_sent: row.get("webhook_sent")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Amount;
    use alloy::primitives::{address, b256};
    use chrono::TimeZone;

    fn test_store() -> Store {
        Store::new(":memory:").expect("in-memory store should always open")
    }

    fn sample_pool(pool_id: u64, tx: B256) -> Pool {
        Pool {
            chain_id: 56,
            contract_address: address!("1111111111111111111111111111111111111111"),
            pool_id,
            creator: address!("2222222222222222222222222222222222222222"),
            token_address: address!("3333333333333333333333333333333333333333"),
            token_decimals: 6,
            nft_name: "Frog".to_string(),
            nft_ticker: "FROG".to_string(),
            uri: Some("ipfs://frog".to_string()),
            nft_description: None,
            conversion_rate: Amount::from(1_000u64),
            token_supply: Amount::from(1_000_000_000_000u64),
            token_balance: Amount::from(800_000_000_000u64),
            eth_balance: Amount::ZERO,
            nft_price: Amount::from(10u64),
            fee_rate: Amount::from(100u64),
            mintable: 1,
            lp_amount: Amount::ZERO,
            transaction_hash: tx,
            block_number: 100,
            block_timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            token_price: None,
            market_cap: None,
            webhook_sent: false,
        }
    }

    fn sample_trade(pool_id: u64, tx: B256) -> Trade {
        Trade {
            chain_id: 56,
            contract_address: address!("4444444444444444444444444444444444444444"),
            pool_id,
            trader: address!("5555555555555555555555555555555555555555"),
            sender: address!("6666666666666666666666666666666666666666"),
            token_address: address!("3333333333333333333333333333333333333333"),
            token_name: "Frog".to_string(),
            token_ticker: "FROG".to_string(),
            token_uri: None,
            quote_amount: "1500000000000000000".parse().unwrap(),
            base_amount: Amount::from(2_000_000u64),
            fee: Amount::from(15u64),
            side: TradeSide::Buy,
            pool_eth_balance: "98765432109876543210".parse().unwrap(),
            pool_token_balance: Amount::from(1u64),
            transaction_hash: tx,
            block_number: 101,
            block_timestamp: Utc.timestamp_opt(1_700_000_003, 0).unwrap(),
            webhook_sent: false,
        }
    }

    const TX_A: B256 = b256!("00000000000000000000000000000000000000000000000000000000000000aa");
    const TX_B: B256 = b256!("00000000000000000000000000000000000000000000000000000000000000bb");

    #[test]
    fn migrations_create_tables() {
        let store = test_store();
        let conn = store.conn().expect("lock should succeed");
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .expect("query should prepare");

        let tables: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .expect("query_map should succeed")
            .collect::<Result<Vec<_>, _>>()
            .expect("all rows should parse");

        assert!(tables.contains(&"pools".to_string()));
        assert!(tables.contains(&"trades".to_string()));
        assert!(tables.contains(&"scanner_states".to_string()));
    }

    #[test]
    fn state_is_created_once_with_zero_counters() {
        let store = test_store();
        let first = store.load_or_create_state(56, "bsc-main").unwrap();
        assert_eq!(first.last_processed_block, 0);
        assert_eq!(first.total_events_processed, 0);
        assert!(!first.is_running);

        store
            .commit_chunk(56, "bsc-main", ChunkCommit { end_block: 10, blocks: 10, events: 3 })
            .unwrap();
        let again = store.load_or_create_state(56, "bsc-main").unwrap();
        assert_eq!(again.last_processed_block, 10);
        assert_eq!(store.list_scanner_states().unwrap().len(), 1);
    }

    #[test]
    fn commit_never_moves_block_backwards() {
        let store = test_store();
        store.load_or_create_state(56, "bsc-main").unwrap();
        store
            .commit_chunk(56, "bsc-main", ChunkCommit { end_block: 500, blocks: 500, events: 1 })
            .unwrap();
        store
            .commit_chunk(56, "bsc-main", ChunkCommit { end_block: 300, blocks: 1, events: 0 })
            .unwrap();

        let state = store.scanner_state(56, "bsc-main").unwrap().unwrap();
        assert_eq!(state.last_processed_block, 500);
        assert_eq!(state.total_blocks_processed, 501);
        assert_eq!(state.total_events_processed, 1);
    }

    #[test]
    fn initialize_only_applies_to_fresh_stream() {
        let store = test_store();
        store.load_or_create_state(56, "bsc-main").unwrap();
        assert!(store.initialize_last_processed(56, "bsc-main", 42).unwrap());
        assert!(!store.initialize_last_processed(56, "bsc-main", 7).unwrap());
        let state = store.scanner_state(56, "bsc-main").unwrap().unwrap();
        assert_eq!(state.last_processed_block, 42);
    }

    #[test]
    fn reset_keeps_row_and_zeroes_progress() {
        let store = test_store();
        store.load_or_create_state(56, "bsc-main").unwrap();
        store.mark_scanner_running(56, "bsc-main", Utc::now()).unwrap();
        store.record_scan_error(56, "bsc-main", Utc::now(), "boom").unwrap();
        store
            .commit_chunk(56, "bsc-main", ChunkCommit { end_block: 9, blocks: 9, events: 9 })
            .unwrap();

        assert_eq!(store.reset_all_scanner_states().unwrap(), 1);
        let state = store.scanner_state(56, "bsc-main").unwrap().unwrap();
        assert_eq!(state.last_processed_block, 0);
        assert_eq!(state.total_blocks_processed, 0);
        assert!(!state.is_running);
        assert!(state.last_error_message.is_none());
        assert!(state.last_run_at.is_none());
    }

    #[test]
    fn updates_on_unknown_stream_fail() {
        let store = test_store();
        assert!(store.mark_scanner_stopped(1, "missing").is_err());
    }

    #[test]
    fn pool_insert_is_create_if_absent() {
        let store = test_store();
        let pool = sample_pool(7, TX_A);
        assert!(store.insert_pool_if_absent(&pool).unwrap());

        let mut changed = pool.clone();
        changed.nft_name = "Toad".to_string();
        assert!(!store.insert_pool_if_absent(&changed).unwrap());

        let rows = store.pools_by_id(56, 7).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0], pool);
    }

    #[test]
    fn pool_metrics_round_trip_as_decimals() {
        let store = test_store();
        let pool = sample_pool(7, TX_A);
        store.insert_pool_if_absent(&pool).unwrap();

        let price: BigDecimal = "0.75".parse().unwrap();
        let cap: BigDecimal = "750000".parse().unwrap();
        store.set_pool_metrics(&pool.key(), &price, &cap).unwrap();

        let stored = &store.pools_by_id(56, 7).unwrap()[0];
        assert_eq!(stored.token_price.as_ref(), Some(&price));
        assert_eq!(stored.market_cap.as_ref(), Some(&cap));
    }

    #[test]
    fn trade_insert_is_create_if_absent() {
        let store = test_store();
        let trade = sample_trade(7, TX_B);
        assert!(store.insert_trade_if_absent(&trade).unwrap());
        assert!(!store.insert_trade_if_absent(&trade).unwrap());
        assert_eq!(store.count_trades(56).unwrap(), 1);

        let stored = &store.trades_for_pool(56, 7).unwrap()[0];
        assert_eq!(stored, &trade);
    }

    #[test]
    fn same_tx_different_pool_is_a_distinct_trade() {
        let store = test_store();
        assert!(store.insert_trade_if_absent(&sample_trade(7, TX_B)).unwrap());
        assert!(store.insert_trade_if_absent(&sample_trade(8, TX_B)).unwrap());
        assert_eq!(store.count_trades(56).unwrap(), 2);
    }

    #[test]
    fn webhook_flags_flip_once() {
        let store = test_store();
        let pool = sample_pool(7, TX_A);
        let trade = sample_trade(7, TX_B);
        store.insert_pool_if_absent(&pool).unwrap();
        store.insert_trade_if_absent(&trade).unwrap();

        assert_eq!(store.unsent_pools(10).unwrap().len(), 1);
        assert!(store.mark_pool_sent(&pool.key()).unwrap());
        assert!(!store.mark_pool_sent(&pool.key()).unwrap());
        assert!(store.unsent_pools(10).unwrap().is_empty());

        assert!(store.mark_trade_sent(&trade.key()).unwrap());
        assert!(store.unsent_trades(10).unwrap().is_empty());
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.sqlite");
        let path = path.to_str().unwrap();
        {
            let store = Store::new(path).unwrap();
            store.load_or_create_state(56, "bsc-main").unwrap();
            store
                .commit_chunk(56, "bsc-main", ChunkCommit { end_block: 77, blocks: 77, events: 0 })
                .unwrap();
        }
        let reopened = Store::new(path).unwrap();
        let state = reopened.scanner_state(56, "bsc-main").unwrap().unwrap();
        assert_eq!(state.last_processed_block, 77);
    }
}
