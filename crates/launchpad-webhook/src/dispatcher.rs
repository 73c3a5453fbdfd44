//! Polls for undelivered pools and trades and pushes them to the webhook.
//!
//! Delivery is at-least-once: a row is flagged `webhook_sent` only after the
//! receiver acknowledged it, so a crash between the two resends the row.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use eyre::Result;
use launchpad_data::Store;

use crate::delivery::{Deliver, Envelope};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5000);
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(10000);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);
pub const DEFAULT_BATCH_SIZE: usize = 100;

#[derive(Clone, Debug, PartialEq)]
pub struct WebhookConfig {
    /// Receiver URL. Empty disables delivery.
    pub url: String,
    pub poll_interval: Duration,
    /// Retries after the first try, so each event gets `retry_attempts + 1` tries.
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    pub timeout: Duration,
    pub bearer_token: Option<String>,
    /// Rows of each kind read per poll.
    pub batch_size: usize,
}

impl WebhookConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            timeout: DEFAULT_TIMEOUT,
            bearer_token: None,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.url.trim().is_empty()
    }
}

/// Counts for one poll.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub pools_sent: usize,
    pub pools_failed: usize,
    pub trades_sent: usize,
    pub trades_failed: usize,
}

pub struct Dispatcher<D> {
    store: Arc<Store>,
    delivery: D,
    config: WebhookConfig,
}

impl<D: Deliver> Dispatcher<D> {
    pub fn new(store: Arc<Store>, delivery: D, config: WebhookConfig) -> Self {
        Self {
            store,
            delivery,
            config,
        }
    }

    /// Tries one envelope up to `retry_attempts + 1` times.
    async fn send_with_retry(&self, envelope: &Envelope, event_id: &str) -> bool {
        let tries = self.config.retry_attempts.saturating_add(1);
        for attempt in 1..=tries {
            match self.delivery.deliver(envelope).await {
                Ok(()) => {
                    tracing::debug!(event_id, attempt, "webhook delivered");
                    return true;
                }
                Err(e) => {
                    tracing::warn!(
                        event_id,
                        attempt,
                        retries_left = tries - attempt,
                        error = %e,
                        "failed to send event to webhook"
                    );
                }
            }
            if attempt < tries {
                tokio::time::sleep(self.config.retry_delay).await;
            }
        }
        false
    }

    /// Delivers every pending pool, then every pending trade, once.
    ///
    /// # Errors
    /// Returns error if the store cannot be read or updated. Delivery
    /// failures are counted, not returned; those rows stay pending.
    pub async fn run_once(&self) -> Result<DispatchReport> {
        let mut report = DispatchReport::default();
        if !self.config.is_enabled() {
            tracing::debug!("webhook URL not configured, skipping");
            return Ok(report);
        }

        let pools = self.store.unsent_pools(self.config.batch_size)?;
        if !pools.is_empty() {
            tracing::info!(count = pools.len(), "found new pool events to send");
        }
        for pool in &pools {
            let event_id = format!("pool:{}", pool.pool_id);
            if self.send_with_retry(&Envelope::pool(pool)?, &event_id).await {
                self.store.mark_pool_sent(&pool.key())?;
                report.pools_sent += 1;
                tracing::info!(
                    pool_id = pool.pool_id,
                    token = %pool.token_address,
                    creator = %pool.creator,
                    "sent pool event"
                );
            } else {
                report.pools_failed += 1;
                tracing::warn!(pool_id = pool.pool_id, "giving up on pool event until next poll");
            }
        }

        let trades = self.store.unsent_trades(self.config.batch_size)?;
        if !trades.is_empty() {
            tracing::info!(count = trades.len(), "found new trade events to send");
        }
        for trade in &trades {
            let event_id = format!("trade:{}", trade.transaction_hash);
            if self.send_with_retry(&Envelope::trade(trade)?, &event_id).await {
                self.store.mark_trade_sent(&trade.key())?;
                report.trades_sent += 1;
                tracing::info!(
                    tx_hash = %trade.transaction_hash,
                    pool_id = trade.pool_id,
                    side = %trade.side,
                    "sent trade event"
                );
            } else {
                report.trades_failed += 1;
                tracing::warn!(
                    tx_hash = %trade.transaction_hash,
                    "giving up on trade event until next poll"
                );
            }
        }

        Ok(report)
    }

    /// Polls until `shutdown` resolves. Errors from a poll are logged and the
    /// loop carries on.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) {
        tracing::info!(
            url = %self.config.url,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            retry_attempts = self.config.retry_attempts,
            "starting webhook sender"
        );
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                result = self.run_once() => {
                    if let Err(e) = result {
                        tracing::error!(error = %format!("{:#}", e), "error in webhook sender loop");
                    }
                }
            }
            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
        tracing::info!("stopping webhook sender");
    }
}
