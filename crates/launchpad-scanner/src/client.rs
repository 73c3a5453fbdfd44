//! Chain clients: the JSON-RPC seam, its alloy implementation, and the
//! primary/archive pair the scanner routes between.

use std::future::Future;
use std::sync::Arc;

use alloy::network::Ethereum;
use alloy::primitives::{Address, B256};
use alloy::providers::fillers::FillProvider;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::eth::{BlockId, BlockNumberOrTag};
use alloy::rpc::types::{Filter, Log};
use eyre::{Result, WrapErr};

type ProviderType = FillProvider<
    alloy::providers::fillers::JoinFill<
        alloy::providers::Identity,
        alloy::providers::fillers::JoinFill<
            alloy::providers::fillers::GasFiller,
            alloy::providers::fillers::JoinFill<
                alloy::providers::fillers::BlobGasFiller,
                alloy::providers::fillers::JoinFill<
                    alloy::providers::fillers::NonceFiller,
                    alloy::providers::fillers::ChainIdFiller,
                >,
            >,
        >,
    >,
    alloy::providers::RootProvider<Ethereum>,
>;

/// The read-only RPC surface the scanner needs from a node.
pub trait ChainClient: Send + Sync {
    /// Current chain height (`eth_blockNumber`).
    fn block_number(&self) -> impl Future<Output = Result<u64>> + Send;

    /// Logs emitted by `address` with topic0 `topic`, in `from..=to`.
    fn logs(
        &self,
        address: Address,
        topic: B256,
        from: u64,
        to: u64,
    ) -> impl Future<Output = Result<Vec<Log>>> + Send;

    /// Block timestamp in unix seconds, `None` if the node does not know the block.
    fn block_timestamp(&self, number: u64) -> impl Future<Output = Result<Option<u64>>> + Send;

    /// Canonical transaction hash from the receipt, `None` if no receipt exists.
    fn receipt_hash(&self, tx_hash: B256) -> impl Future<Output = Result<Option<B256>>> + Send;
}

/// Builds fresh clients. Called at start-up and on every reconnect.
pub trait Connect: Send + Sync {
    type Client: ChainClient;

    fn connect(&self, url: &str) -> impl Future<Output = Result<Self::Client>> + Send;
}

/// JSON-RPC client over an alloy HTTP provider.
pub struct RpcClient {
    provider: Arc<ProviderType>,
}

impl RpcClient {
    /// Creates a client for `rpc_url`. No request is made until first use.
    ///
    /// # Errors
    /// Returns error if the URL does not parse.
    pub fn new(rpc_url: &str) -> Result<Self> {
        let provider =
            ProviderBuilder::new().on_http(rpc_url.parse().wrap_err("invalid RPC URL format")?);
        Ok(Self {
            provider: Arc::new(provider),
        })
    }
}

impl ChainClient for RpcClient {
    async fn block_number(&self) -> Result<u64> {
        self.provider
            .get_block_number()
            .await
            .wrap_err("eth_blockNumber failed")
    }

    #[tracing::instrument(skip(self, topic), fields(%address))]
    async fn logs(&self, address: Address, topic: B256, from: u64, to: u64) -> Result<Vec<Log>> {
        let filter = Filter::new()
            .address(address)
            .event_signature(topic)
            .from_block(from)
            .to_block(to);
        self.provider
            .get_logs(&filter)
            .await
            .wrap_err_with(|| format!("eth_getLogs failed for blocks {}..={}", from, to))
    }

    async fn block_timestamp(&self, number: u64) -> Result<Option<u64>> {
        let block = self
            .provider
            .get_block(BlockId::Number(BlockNumberOrTag::Number(number)))
            .await
            .wrap_err_with(|| format!("failed to fetch block {}", number))?;
        Ok(block.map(|b| b.header.timestamp))
    }

    async fn receipt_hash(&self, tx_hash: B256) -> Result<Option<B256>> {
        let receipt = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .wrap_err_with(|| format!("failed to fetch receipt {}", tx_hash))?;
        Ok(receipt.map(|r| r.transaction_hash))
    }
}

/// Connects [`RpcClient`]s and checks each endpoint answers `eth_blockNumber`.
#[derive(Clone, Copy, Debug, Default)]
pub struct HttpConnector;

impl Connect for HttpConnector {
    type Client = RpcClient;

    #[tracing::instrument(skip_all, fields(rpc_url = %url))]
    async fn connect(&self, url: &str) -> Result<RpcClient> {
        let client = RpcClient::new(url)?;
        let latest_block = client
            .block_number()
            .await
            .wrap_err("failed to test RPC connectivity with eth_blockNumber")?;
        tracing::info!(latest_block, "RPC connection successful");
        Ok(client)
    }
}

/// Which endpoint serves a chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    Primary,
    Archive,
}

/// Picks the archive node when one is configured and `chunk_end` lies more
/// than `archive_threshold` blocks behind `current_height`.
pub fn route_for(
    current_height: u64,
    chunk_end: u64,
    archive_threshold: u64,
    has_archive: bool,
) -> Route {
    if has_archive && current_height.saturating_sub(chunk_end) > archive_threshold {
        Route::Archive
    } else {
        Route::Primary
    }
}

/// A primary ("hot") client and an optional archive client.
///
/// The scanner owns the pair behind an `Arc` and swaps the whole pair on
/// reconnect, so in-flight lookups keep the clients they started with.
pub struct ClientPair<C> {
    primary: C,
    archive: Option<C>,
}

impl<C: ChainClient> ClientPair<C> {
    /// Connects the primary and, if given, the archive endpoint.
    ///
    /// # Errors
    /// Returns error if either connection fails.
    pub async fn connect<K>(connector: &K, primary_url: &str, archive_url: Option<&str>) -> Result<Self>
    where
        K: Connect<Client = C>,
    {
        let primary = connector
            .connect(primary_url)
            .await
            .wrap_err("failed to connect primary RPC")?;
        let archive = match archive_url {
            Some(url) => {
                tracing::info!(url, "archive RPC URL configured");
                Some(
                    connector
                        .connect(url)
                        .await
                        .wrap_err("failed to connect archive RPC")?,
                )
            }
            None => None,
        };
        Ok(Self { primary, archive })
    }

    pub fn primary(&self) -> &C {
        &self.primary
    }

    pub fn has_archive(&self) -> bool {
        self.archive.is_some()
    }

    /// The client for a routing decision. Falls back to the primary when no
    /// archive is configured.
    fn get(&self, route: Route) -> &C {
        match (route, &self.archive) {
            (Route::Archive, Some(archive)) => archive,
            _ => &self.primary,
        }
    }

    /// Routes a chunk ending at `chunk_end` given the current height.
    pub fn select(&self, current_height: u64, chunk_end: u64, archive_threshold: u64) -> (Route, &C) {
        let route = route_for(current_height, chunk_end, archive_threshold, self.has_archive());
        (route, self.get(route))
    }
}
