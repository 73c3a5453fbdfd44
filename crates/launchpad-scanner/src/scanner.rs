//! Range scanner: walks confirmed blocks in chunks, ingests both event
//! streams, and commits progress one chunk at a time.
//!
//! A chunk is the unit of crash consistency. Its rows are written with
//! create-if-absent semantics and only then is `last_processed_block`
//! advanced, in one statement. A crash in between replays the chunk on
//! restart, which is a no-op at the row level.

use std::sync::Arc;

use alloy::primitives::Address;
use alloy::sol_types::SolEvent;
use chrono::Utc;
use eyre::{Result, WrapErr};
use launchpad_data::{ChunkCommit, Store};
use serde::Serialize;
use tokio::sync::watch;

use crate::backoff::{Backoff, BackoffDecision};
use crate::client::{ChainClient, ClientPair, Connect, Route};
use crate::config::ScannerConfig;
use crate::contracts::{NewPool, Trade as TradeEvent};
use crate::decoder::{decode_pool_log, decode_trade_log, EventPayload, PendingEvent};
use crate::ingest::{apply_event, resolve_events, ApplyOutcome, EventTally};
use crate::shutdown::StopHandle;

/// Inclusive block range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct BlockRange {
    pub from: u64,
    pub to: u64,
}

impl BlockRange {
    pub fn block_count(&self) -> u64 {
        self.to - self.from + 1
    }
}

/// Highest block considered final at `height`.
pub fn safe_block(height: u64, confirmations: u64) -> u64 {
    height.saturating_sub(confirmations)
}

/// Splits `(last_processed, safe_block]` into consecutive ranges of at most
/// `chunk_size` blocks. Empty when there is nothing new.
pub fn plan_chunks(last_processed: u64, safe_block: u64, chunk_size: u64) -> Vec<BlockRange> {
    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::new();
    let mut from = last_processed.saturating_add(1);
    while from <= safe_block {
        let to = from.saturating_add(chunk_size - 1).min(safe_block);
        chunks.push(BlockRange { from, to });
        if to == u64::MAX {
            break;
        }
        from = to + 1;
    }
    chunks
}

/// What one committed chunk contained.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkReport {
    pub range: BlockRange,
    pub route: Route,
    /// Logs returned by the node for both streams.
    pub fetched: u64,
    pub pools: EventTally,
    pub trades: EventTally,
}

/// Result of one pass of the scan loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IterationOutcome {
    /// The chain has not advanced past the committed block.
    Idle { height: u64, last_processed_block: u64 },
    /// One or more chunks were committed.
    Advanced {
        chunks: Vec<ChunkReport>,
        last_processed_block: u64,
    },
}

/// Operational snapshot of a scanner.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannerStatus {
    pub is_running: bool,
    pub chain_id: u64,
    pub last_processed_block: u64,
    pub bonding_curve_address: Address,
    pub create_pool_address: Address,
}

/// Scans one (chain, scanner name) stream.
pub struct Scanner<K: Connect> {
    config: ScannerConfig,
    store: Arc<Store>,
    connector: K,
    clients: Arc<ClientPair<K::Client>>,
    stop: StopHandle,
    status: watch::Sender<ScannerStatus>,
}

impl<K: Connect> Scanner<K> {
    /// Validates `config` and connects the primary and archive clients.
    ///
    /// # Errors
    /// Returns error if the config is invalid or a connection fails.
    pub async fn connect(config: ScannerConfig, store: Arc<Store>, connector: K) -> Result<Self> {
        config.validate()?;
        let clients = ClientPair::connect(
            &connector,
            &config.rpc_url,
            config.archive_rpc_url.as_deref(),
        )
        .await?;
        let (status, _) = watch::channel(ScannerStatus {
            is_running: false,
            chain_id: config.chain_id,
            last_processed_block: 0,
            bonding_curve_address: config.bonding_curve_address,
            create_pool_address: config.create_pool_address,
        });
        Ok(Self {
            config,
            store,
            connector,
            clients: Arc::new(clients),
            stop: StopHandle::new(),
            status,
        })
    }

    /// Handle for requesting a cooperative stop from another task.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn status(&self) -> ScannerStatus {
        self.status.borrow().clone()
    }

    /// Receiver that observes status changes while [`Scanner::run`] holds the scanner.
    pub fn subscribe_status(&self) -> watch::Receiver<ScannerStatus> {
        self.status.subscribe()
    }

    fn set_status(&self, running: Option<bool>, last_processed_block: Option<u64>) {
        self.status.send_modify(|status| {
            if let Some(running) = running {
                status.is_running = running;
            }
            if let Some(block) = last_processed_block {
                status.last_processed_block = block;
            }
        });
    }

    /// Loads (or creates) the state row, marks the stream running, and
    /// seeds `last_processed_block` on a fresh stream.
    ///
    /// # Errors
    /// Returns error if the store fails or the chain height cannot be read.
    pub async fn start(&mut self) -> Result<()> {
        let chain_id = self.config.chain_id;
        let name = self.config.scanner_name.as_str();

        let state = self.store.load_or_create_state(chain_id, name)?;
        tracing::info!(
            chain_id,
            scanner_name = name,
            last_processed_block = state.last_processed_block,
            total_blocks_processed = state.total_blocks_processed,
            total_events_processed = state.total_events_processed,
            bonding_curve = %self.config.bonding_curve_address,
            create_pool = %self.config.create_pool_address,
            "starting blockchain scanner"
        );
        self.store.mark_scanner_running(chain_id, name, Utc::now())?;

        let mut last_processed = state.last_processed_block;
        if last_processed == 0 {
            let initial = match self.config.start_block {
                Some(block) => block.saturating_sub(1),
                None => self
                    .clients
                    .primary()
                    .block_number()
                    .await
                    .wrap_err("failed to read chain height for initial block")?,
            };
            if self.store.initialize_last_processed(chain_id, name, initial)? {
                last_processed = initial;
                tracing::info!(first_block = initial + 1, "starting from block");
            }
        }

        self.set_status(Some(true), Some(last_processed));
        Ok(())
    }

    /// Scans everything between the committed block and the safe frontier.
    ///
    /// Progress is read from the store, not from memory, so a failed pass
    /// resumes from the last committed chunk.
    ///
    /// # Errors
    /// Returns error on any RPC or store failure. Chunks committed before the
    /// failure stay committed.
    pub async fn run_once(&mut self) -> Result<IterationOutcome> {
        let chain_id = self.config.chain_id;
        let state = self
            .store
            .load_or_create_state(chain_id, &self.config.scanner_name)?;
        let last_processed = state.last_processed_block;

        let clients = Arc::clone(&self.clients);
        let height = clients
            .primary()
            .block_number()
            .await
            .wrap_err("failed to read chain height")?;
        let safe = safe_block(height, self.config.confirmations);

        if safe <= last_processed {
            tracing::trace!(height, safe_block = safe, last_processed, "no new confirmed blocks");
            return Ok(IterationOutcome::Idle {
                height,
                last_processed_block: last_processed,
            });
        }

        tracing::info!(
            from = last_processed + 1,
            to = safe,
            "processing blocks"
        );

        let mut reports = Vec::new();
        let mut committed = last_processed;
        for range in plan_chunks(last_processed, safe, self.config.chunk_size) {
            if self.stop.is_stopped() {
                tracing::info!(next_block = range.from, "stop requested between chunks");
                break;
            }
            let report = self.process_chunk(&clients, range).await?;
            self.store.commit_chunk(
                chain_id,
                &self.config.scanner_name,
                ChunkCommit {
                    end_block: range.to,
                    blocks: range.block_count(),
                    events: report.fetched,
                },
            )?;
            committed = range.to;
            self.set_status(None, Some(committed));
            reports.push(report);
        }

        Ok(IterationOutcome::Advanced {
            chunks: reports,
            last_processed_block: committed,
        })
    }

    #[tracing::instrument(skip(self, clients), fields(from = range.from, to = range.to))]
    async fn process_chunk(
        &self,
        clients: &ClientPair<K::Client>,
        range: BlockRange,
    ) -> Result<ChunkReport> {
        let (route, client) = if clients.has_archive() {
            let height = clients
                .primary()
                .block_number()
                .await
                .wrap_err("failed to read chain height for client selection")?;
            clients.select(height, range.to, self.config.archive_threshold)
        } else {
            (Route::Primary, clients.primary())
        };
        if route == Route::Archive {
            tracing::info!(from = range.from, to = range.to, "using archive node for block range");
        }

        let (pool_logs, trade_logs) = tokio::try_join!(
            client.logs(
                self.config.create_pool_address,
                NewPool::SIGNATURE_HASH,
                range.from,
                range.to
            ),
            client.logs(
                self.config.bonding_curve_address,
                TradeEvent::SIGNATURE_HASH,
                range.from,
                range.to
            ),
        )?;
        let fetched = (pool_logs.len() + trade_logs.len()) as u64;

        let mut pools = EventTally::default();
        let mut trades = EventTally::default();
        let mut pending: Vec<PendingEvent> = Vec::with_capacity(fetched as usize);

        for (log, is_pool) in pool_logs
            .iter()
            .map(|l| (l, true))
            .chain(trade_logs.iter().map(|l| (l, false)))
        {
            let decoded = if is_pool {
                decode_pool_log(log)
            } else {
                decode_trade_log(log)
            };
            match decoded {
                Ok(event) => pending.push(event),
                Err(reason) => {
                    tracing::warn!(
                        tx_hash = ?log.transaction_hash,
                        block_number = ?log.block_number,
                        %reason,
                        "skipping event"
                    );
                    let outcome = ApplyOutcome::Skipped(reason);
                    if is_pool {
                        pools.record(&outcome);
                    } else {
                        trades.record(&outcome);
                    }
                }
            }
        }

        // Pools first so a trade can price a pool created in the same chunk.
        pending.sort_by_key(|e| {
            let is_trade = matches!(e.payload, EventPayload::Trade(_));
            (is_trade, e.block_number, e.log_index)
        });

        let resolved = resolve_events(client, self.config.chain_id, pending).await?;
        for event in &resolved {
            let outcome = apply_event(&self.store, event)?;
            match event.event.payload {
                EventPayload::Pool(_) => pools.record(&outcome),
                EventPayload::Trade(_) => trades.record(&outcome),
            }
        }

        tracing::info!(
            from = range.from,
            to = range.to,
            used_archive = route == Route::Archive,
            total_events = fetched,
            pools_inserted = pools.inserted,
            trades_inserted = trades.inserted,
            skipped = pools.skipped + trades.skipped,
            "processed {} trades and {} pools",
            trade_logs.len(),
            pool_logs.len()
        );

        Ok(ChunkReport {
            range,
            route,
            fetched,
            pools,
            trades,
        })
    }

    /// Replaces both clients with fresh connections.
    async fn reconnect(&mut self) -> Result<()> {
        let clients = ClientPair::connect(
            &self.connector,
            &self.config.rpc_url,
            self.config.archive_rpc_url.as_deref(),
        )
        .await?;
        self.clients = Arc::new(clients);
        Ok(())
    }

    fn record_error(&self, message: &str) {
        if let Err(e) = self.store.record_scan_error(
            self.config.chain_id,
            &self.config.scanner_name,
            Utc::now(),
            message,
        ) {
            tracing::error!(error = %e, "failed to record scanner error");
        }
    }

    fn mark_stopped(&self) {
        self.set_status(Some(false), None);
        if let Err(e) = self
            .store
            .mark_scanner_stopped(self.config.chain_id, &self.config.scanner_name)
        {
            tracing::error!(error = %e, "failed to persist stopped state");
        }
    }

    /// Runs the scan loop until a stop is requested or reconnects are exhausted.
    ///
    /// Each failed iteration is recorded on the state row, followed by an
    /// exponential pause and a fresh pair of clients. A successful iteration
    /// resets the attempt count.
    ///
    /// # Errors
    /// Returns the last scan error once `max_reconnect_attempts` is exceeded,
    /// or a start-up error. `is_running` is cleared in every case.
    pub async fn run(&mut self) -> Result<()> {
        if let Err(e) = self.start().await {
            self.record_error(&format!("{:#}", e));
            self.mark_stopped();
            return Err(e);
        }

        let mut backoff = Backoff::new(
            self.config.reconnect_base_delay,
            self.config.max_reconnect_attempts,
        );

        let result = loop {
            if self.stop.is_stopped() {
                tracing::info!("stopping blockchain scanner");
                break Ok(());
            }

            let iteration = match self.run_once().await {
                Ok(outcome) => self
                    .store
                    .record_scan_success(self.config.chain_id, &self.config.scanner_name, Utc::now())
                    .map(|_| outcome),
                Err(e) => Err(e),
            };

            match iteration {
                Ok(_) => backoff.on_success(),
                Err(err) => {
                    let message = format!("{:#}", err);
                    tracing::error!(error = %message, "error in scan loop");

                    match backoff.on_failure() {
                        BackoffDecision::GiveUp { attempts } => {
                            tracing::error!(
                                attempts,
                                "max reconnection attempts reached, stopping scanner"
                            );
                            self.record_error(&message);
                            break Err(err.wrap_err(format!(
                                "scanner {} gave up after {} consecutive failures",
                                self.config.scanner_name, attempts
                            )));
                        }
                        BackoffDecision::Retry { attempt, delay } => {
                            self.record_error(&format!(
                                "{} (reconnect attempt {}/{} in {}ms)",
                                message,
                                attempt,
                                backoff.max_attempts(),
                                delay.as_millis()
                            ));
                            tracing::warn!(
                                attempt,
                                max_attempts = backoff.max_attempts(),
                                delay_ms = delay.as_millis() as u64,
                                "reconnection attempt"
                            );
                            if self.stop.sleep(delay).await {
                                continue;
                            }
                            match self.reconnect().await {
                                Ok(()) => tracing::info!("provider reinitialized successfully"),
                                Err(e) => {
                                    let message = format!("reconnect failed: {:#}", e);
                                    tracing::error!(error = %message, "failed to reinitialize provider");
                                    self.record_error(&message);
                                }
                            }
                            continue;
                        }
                    }
                }
            }

            self.stop.sleep(self.config.poll_interval).await;
        };

        self.mark_stopped();
        result
    }
}
