//! Courier CLI
//!
//! Receives offered files over a direct socket and reports progress.

mod config;
mod direct;
mod progress;

use clap::{Parser, Subcommand};
use courier_core::{
    IncomingTransfer, IncomingTransferManager, PreferenceSelector, StreamOffer, TransferRequest,
    TransferStatus,
};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use config::{Config, LoggingConfig};
use direct::{DIRECT_NAMESPACE, DirectSocketNegotiator};
use progress::{TransferProgress, format_bytes};

/// Courier - receive files offered by instant-messaging peers
#[derive(Parser)]
#[command(name = "courier")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Receive one file from a sender listening on a direct socket
    Receive {
        /// Sender address (host:port)
        #[arg(long, required = true)]
        connect: String,

        /// Offered file name
        #[arg(long, required = true)]
        name: String,

        /// Offered file size in bytes
        #[arg(long, required = true)]
        size: u64,

        /// Output directory (defaults to the configured download directory)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Stream id of the offer
        #[arg(long, default_value = "courier-direct")]
        sid: String,

        /// Identity of the sending peer
        #[arg(long, default_value = "unknown")]
        from: String,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };

    // Validate configuration
    config.validate()?;

    init_logging(cli.verbose, &config.logging)?;

    match cli.command {
        Commands::Receive {
            connect,
            name,
            size,
            output,
            sid,
            from,
        } => {
            let request = TransferRequest::new(
                from,
                name,
                size,
                StreamOffer::new(sid, vec![DIRECT_NAMESPACE.to_string()]),
            );
            receive_file(request, connect, output, &config).await?;
        }
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

/// Initialize logging
fn init_logging(verbose: bool, logging: &LoggingConfig) -> anyhow::Result<()> {
    let level = if verbose {
        "debug".to_string()
    } else {
        logging.level.to_lowercase()
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    match &logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }

    Ok(())
}

/// Refresh `progress` until the transfer ends, cancelling it when `interrupt`
/// resolves. `interrupt` is polled across ticks, never recreated.
async fn watch_transfer<F: Future>(
    transfer: &IncomingTransfer,
    progress: &TransferProgress,
    poll_interval: Duration,
    interrupt: F,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    let mut last_status = TransferStatus::Initial;
    tokio::pin!(interrupt);
    let mut interrupted = false;

    while !transfer.is_done() {
        tokio::select! {
            _ = ticker.tick() => {
                progress.update(transfer.bytes_transferred());
                let status = transfer.status();
                if status != last_status {
                    progress.set_message(format!("{status}: {}", transfer.file_name()));
                    last_status = status;
                }
            }
            _ = &mut interrupt, if !interrupted => {
                interrupted = true;
                if transfer.cancel() {
                    progress.set_message("Cancelling...".to_string());
                }
            }
        }
    }
}

/// Receive one file into the output directory
async fn receive_file(
    request: TransferRequest,
    connect: String,
    output: Option<PathBuf>,
    config: &Config,
) -> anyhow::Result<()> {
    let output = output.unwrap_or_else(|| config.transfer.download_dir.clone());
    std::fs::create_dir_all(&output)?;
    let target = courier_files::resolve_in_dir(&output, request.file_name())?;

    let negotiator = DirectSocketNegotiator::new(connect.clone(), config.connect_timeout());
    let selector = PreferenceSelector::new().with(Arc::new(negotiator));
    let manager = IncomingTransferManager::new(Arc::new(selector), config.transfer_config())?;

    println!("File: {}", request.file_name());
    println!("Size: {}", format_bytes(request.file_size()));
    println!("From: {} via {}", request.requestor(), connect);
    println!("Saving to: {}", target.display());

    let transfer = manager.create_incoming(request)?;
    transfer.receive_to_sink(&target).await?;

    let progress = TransferProgress::new(transfer.file_size(), transfer.file_name());
    watch_transfer(
        &transfer,
        &progress,
        config.transfer_config().poll_interval,
        tokio::signal::ctrl_c(),
    )
    .await;

    let status = transfer.wait().await;
    progress.update(transfer.bytes_transferred());
    manager.prune_finished();

    match status {
        TransferStatus::Complete => {
            progress.finish_with_message(format!(
                "Received {} ({})",
                transfer.file_name(),
                format_bytes(transfer.bytes_transferred())
            ));
            Ok(())
        }
        _ => {
            let reason = transfer
                .last_failure()
                .map_or_else(|| status.to_string(), |failure| failure.to_string());
            progress.abandon_with_message(format!("Transfer {status}"));
            anyhow::bail!("{}: {}", transfer.file_name(), reason)
        }
    }
}
