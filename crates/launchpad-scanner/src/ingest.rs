//! Resolves decoded events against the chain and writes them with
//! create-if-absent semantics.

use std::collections::{HashMap, HashSet};

use alloy::primitives::B256;
use chrono::{DateTime, Utc};
use eyre::{eyre, Result, WrapErr};
use futures::future::try_join_all;
use launchpad_data::Store;

use crate::client::ChainClient;
use crate::decoder::{map_pool, map_trade, EventContext, EventPayload, PendingEvent, SkipReason};
use crate::metrics::{derive_pool_metrics, MetricOutcome};

/// Result of applying one event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    Inserted,
    /// A row with the same natural key already exists and was left as is.
    AlreadyPresent,
    Skipped(SkipReason),
}

/// Per-stream counts for a chunk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EventTally {
    pub inserted: u64,
    pub existing: u64,
    pub skipped: u64,
}

impl EventTally {
    pub fn record(&mut self, outcome: &ApplyOutcome) {
        match outcome {
            ApplyOutcome::Inserted => self.inserted += 1,
            ApplyOutcome::AlreadyPresent => self.existing += 1,
            ApplyOutcome::Skipped(_) => self.skipped += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.inserted + self.existing + self.skipped
    }
}

/// A pending event together with the chain data it was resolved against.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedEvent {
    pub event: PendingEvent,
    pub context: EventContext,
}

/// Looks up block timestamps and receipts for every event of a chunk.
///
/// Lookups run concurrently, one per distinct block and per distinct
/// transaction. A block or receipt the node cannot find fails the whole call.
///
/// # Errors
/// Returns error if any lookup fails or returns nothing.
pub async fn resolve_events<C: ChainClient>(
    client: &C,
    chain_id: u64,
    events: Vec<PendingEvent>,
) -> Result<Vec<ResolvedEvent>> {
    let blocks: HashSet<u64> = events.iter().map(|e| e.block_number).collect();
    let txs: HashSet<B256> = events.iter().map(|e| e.tx_hash).collect();

    let timestamps = try_join_all(blocks.into_iter().map(|number| async move {
        let timestamp = client
            .block_timestamp(number)
            .await?
            .ok_or_else(|| eyre!("block {} not found", number))?;
        let timestamp = DateTime::<Utc>::from_timestamp(timestamp as i64, 0)
            .ok_or_else(|| eyre!("block {} has invalid timestamp {}", number, timestamp))?;
        Ok::<_, eyre::Report>((number, timestamp))
    }));
    let receipts = try_join_all(txs.into_iter().map(|tx| async move {
        let hash = client
            .receipt_hash(tx)
            .await?
            .ok_or_else(|| eyre!("receipt for {} not found", tx))?;
        Ok::<_, eyre::Report>((tx, hash))
    }));

    let (timestamps, receipts) = futures::try_join!(timestamps, receipts)?;
    let timestamps: HashMap<u64, DateTime<Utc>> = timestamps.into_iter().collect();
    let receipts: HashMap<B256, B256> = receipts.into_iter().collect();

    events
        .into_iter()
        .map(|event| -> Result<ResolvedEvent> {
            let block_timestamp = *timestamps
                .get(&event.block_number)
                .ok_or_else(|| eyre!("timestamp for block {} missing", event.block_number))?;
            let transaction_hash = *receipts
                .get(&event.tx_hash)
                .ok_or_else(|| eyre!("receipt for {} missing", event.tx_hash))?;
            let context = EventContext {
                chain_id,
                contract_address: event.contract_address,
                block_number: event.block_number,
                block_timestamp,
                transaction_hash,
            };
            Ok(ResolvedEvent { event, context })
        })
        .collect()
}

/// Writes one resolved event. Trades also refresh their pool's metrics.
///
/// # Errors
/// Returns error if the store fails; invalid payloads become
/// [`ApplyOutcome::Skipped`] instead.
pub fn apply_event(store: &Store, resolved: &ResolvedEvent) -> Result<ApplyOutcome> {
    let ResolvedEvent { event, context } = resolved;
    let outcome = match &event.payload {
        EventPayload::Pool(payload) => match map_pool(payload, context) {
            Ok(pool) => {
                let inserted = store
                    .insert_pool_if_absent(&pool)
                    .wrap_err_with(|| format!("failed to store pool {}", pool.pool_id))?;
                tracing::debug!(
                    tx_hash = %pool.transaction_hash,
                    pool_id = pool.pool_id,
                    creator = %pool.creator,
                    inserted,
                    "processed pool event"
                );
                inserted_or_present(inserted)
            }
            Err(reason) => ApplyOutcome::Skipped(reason),
        },
        EventPayload::Trade(payload) => match map_trade(payload, context) {
            Ok(trade) => {
                let inserted = store.insert_trade_if_absent(&trade).wrap_err_with(|| {
                    format!("failed to store trade {}", trade.transaction_hash)
                })?;
                // Runs for replayed trades too, so a retried chunk converges
                // on the same pool metrics.
                let metrics = derive_pool_metrics(store, &trade)?;
                tracing::debug!(
                    tx_hash = %trade.transaction_hash,
                    pool_id = trade.pool_id,
                    trader = %trade.trader,
                    side = %trade.side,
                    inserted,
                    pool_found = metrics != MetricOutcome::PoolNotFound,
                    "processed trade event"
                );
                inserted_or_present(inserted)
            }
            Err(reason) => ApplyOutcome::Skipped(reason),
        },
    };

    if let ApplyOutcome::Skipped(reason) = &outcome {
        tracing::warn!(
            tx_hash = %event.tx_hash,
            block_number = event.block_number,
            log_index = event.log_index,
            %reason,
            "skipping event"
        );
    }
    Ok(outcome)
}

fn inserted_or_present(inserted: bool) -> ApplyOutcome {
    if inserted {
        ApplyOutcome::Inserted
    } else {
        ApplyOutcome::AlreadyPresent
    }
}
