use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use clap::{ArgAction, Args, Parser, Subcommand};
use color_eyre::eyre::{Context, Result};
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use launchpad_data::Store;
use launchpad_scanner::{HttpConnector, Scanner, ScannerConfig};
use launchpad_webhook::{Dispatcher, HttpDelivery, WebhookConfig};
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "launchpad-indexer")]
#[command(about = "Indexes launchpad pool and trade events from an EVM chain")]
#[command(version)]
struct Cli {
    #[arg(long, short = 'v', action = ArgAction::Count, global = true)]
    verbose: u8,

    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    #[arg(
        long,
        global = true,
        env = "DATABASE_PATH",
        default_value = "data/launchpad.sqlite"
    )]
    db_path: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan the chain and ingest pool and trade events.
    Scan(ScanArgs),
    /// Push undelivered pools and trades to the webhook receiver.
    SendWebhooks(WebhookArgs),
    /// Show persisted scanner progress.
    ScannerState(StateArgs),
}

#[derive(Args, Debug)]
struct ScanArgs {
    #[arg(long, env = "CHAIN_ID", default_value_t = 56)]
    chain_id: u64,

    #[arg(long, env = "SCANNER_NAME", default_value = "bsc-main")]
    scanner_name: String,

    #[arg(long, env = "BSC_RPC_URL")]
    rpc_url: String,

    #[arg(long, env = "BSC_ARCHIVE_RPC_URL")]
    archive_rpc_url: Option<String>,

    /// Pool factory contract emitting `NewPool`.
    #[arg(long, env = "CREATE_POOL_ADDRESS_BSC")]
    create_pool_address: Address,

    /// Bonding curve contract emitting `Trade`.
    #[arg(long, env = "BONDINGCURVE_ADDRESS_BSC")]
    bonding_curve_address: Address,

    /// First block to scan on a fresh stream. Defaults to the chain tip.
    #[arg(long, env = "SCANNER_START_BLOCK")]
    start_block: Option<u64>,

    #[arg(long, env = "SCANNER_BLOCK_CONFIRMATIONS", default_value_t = 12)]
    confirmations: u64,

    /// Milliseconds between scan iterations.
    #[arg(long, env = "SCANNER_POLL_INTERVAL", default_value_t = 5000)]
    poll_interval_ms: u64,

    #[arg(long, env = "SCANNER_CHUNK_SIZE", default_value_t = 1000)]
    chunk_size: u64,

    #[arg(long, env = "SCANNER_ARCHIVE_THRESHOLD", default_value_t = 128)]
    archive_threshold: u64,
}

#[derive(Args, Debug)]
struct WebhookArgs {
    /// Receiver URL. Without one the sender idles.
    #[arg(long, env = "WEBHOOK_URL", default_value = "")]
    url: String,

    #[arg(long, env = "WEBHOOK_POLL_INTERVAL", default_value_t = 5000)]
    poll_interval_ms: u64,

    #[arg(long, env = "WEBHOOK_RETRY_ATTEMPTS", default_value_t = 3)]
    retry_attempts: u32,

    #[arg(long, env = "WEBHOOK_RETRY_DELAY", default_value_t = 10000)]
    retry_delay_ms: u64,

    #[arg(long, env = "WEBHOOK_TIMEOUT", default_value_t = 5000)]
    timeout_ms: u64,

    #[arg(long, env = "SSE_PUBLISH_TOKEN", hide_env_values = true)]
    bearer_token: Option<String>,
}

#[derive(Args, Debug)]
struct StateArgs {
    /// Reset every scanner to block 0 and clear its counters.
    #[arg(long)]
    reset: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet)?;

    match cli.command {
        Commands::Scan(args) => handle_scan(&cli.db_path, args).await,
        Commands::SendWebhooks(args) => handle_send_webhooks(&cli.db_path, args).await,
        Commands::ScannerState(args) => handle_scanner_state(&cli.db_path, args),
    }
}

fn init_tracing(verbose: u8, quiet: bool) -> Result<()> {
    let level = if quiet {
        Level::WARN
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.as_str()))
        .wrap_err("failed to initialize tracing filter")?;

    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

fn open_store(db_path: &str) -> Result<Arc<Store>> {
    if db_path != ":memory:" {
        if let Some(parent) = Path::new(db_path).parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .wrap_err_with(|| format!("failed to create directory {}", parent.display()))?;
        }
    }
    let store = Store::new(db_path).wrap_err("failed to open SQLite store")?;
    Ok(Arc::new(store))
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

async fn handle_scan(db_path: &str, args: ScanArgs) -> Result<()> {
    let store = open_store(db_path)?;

    let mut config = ScannerConfig::new(
        args.chain_id,
        args.scanner_name,
        args.rpc_url,
        args.bonding_curve_address,
        args.create_pool_address,
    );
    config.archive_rpc_url = args.archive_rpc_url.filter(|url| !url.trim().is_empty());
    config.start_block = args.start_block;
    config.confirmations = args.confirmations;
    config.poll_interval = Duration::from_millis(args.poll_interval_ms);
    config.chunk_size = args.chunk_size;
    config.archive_threshold = args.archive_threshold;

    let mut scanner = Scanner::connect(config, store, HttpConnector)
        .await
        .wrap_err("failed to initialize scanner")?;

    let stop = scanner.stop_handle();
    tokio::spawn(async move {
        shutdown_signal().await;
        stop.stop();
    });

    scanner.run().await?;

    let status = scanner.status();
    info!(
        chain_id = status.chain_id,
        last_processed_block = status.last_processed_block,
        "scanner stopped"
    );
    Ok(())
}

async fn handle_send_webhooks(db_path: &str, args: WebhookArgs) -> Result<()> {
    let store = open_store(db_path)?;

    let config = WebhookConfig {
        poll_interval: Duration::from_millis(args.poll_interval_ms),
        retry_attempts: args.retry_attempts,
        retry_delay: Duration::from_millis(args.retry_delay_ms),
        timeout: Duration::from_millis(args.timeout_ms),
        bearer_token: args.bearer_token,
        ..WebhookConfig::new(args.url)
    };
    if !config.is_enabled() {
        tracing::warn!("WEBHOOK_URL not set, webhook sender will idle");
    }

    let delivery = HttpDelivery::new(
        config.url.clone(),
        config.timeout,
        config.bearer_token.clone(),
    )?;
    let dispatcher = Dispatcher::new(store, delivery, config);
    dispatcher.run(shutdown_signal()).await;
    Ok(())
}

fn format_time(at: Option<DateTime<Utc>>) -> String {
    at.map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn handle_scanner_state(db_path: &str, args: StateArgs) -> Result<()> {
    let store = open_store(db_path)?;

    if args.reset {
        let count = store
            .reset_all_scanner_states()
            .wrap_err("failed to reset scanner states")?;
        info!(count, "reset scanner states");
    }

    let states = store
        .list_scanner_states()
        .wrap_err("failed to query scanner states")?;
    if states.is_empty() {
        println!("No scanner states found.");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec![
        "Chain",
        "Scanner",
        "Last Block",
        "Running",
        "Last Run",
        "Last Success",
        "Last Error",
        "Blocks",
        "Events",
    ]);

    for state in &states {
        let last_error = match (&state.last_error_at, &state.last_error_message) {
            (Some(at), Some(message)) => format!("{} {}", format_time(Some(*at)), message),
            (Some(at), None) => format_time(Some(*at)),
            _ => "-".to_string(),
        };
        table.add_row(vec![
            state.chain_id.to_string(),
            state.scanner_name.clone(),
            state.last_processed_block.to_string(),
            if state.is_running { "yes" } else { "no" }.to_string(),
            format_time(state.last_run_at),
            format_time(state.last_success_at),
            last_error,
            state.total_blocks_processed.to_string(),
            state.total_events_processed.to_string(),
        ]);
    }

    println!("{table}");
    Ok(())
}
