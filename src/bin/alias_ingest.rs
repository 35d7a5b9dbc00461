//! Alias Ingestion Binary - reconciles serial numbers with device UIDs
//!
//! Reads newline-delimited JSON device events and runs each one carrying both a
//! serial number and a device UID through the swap detector. New-device and swap
//! signals are written to stdout as JSON lines for downstream notification.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --release --bin alias_ingest -- --input events.jsonl
//! cat events.jsonl | cargo run --release --bin alias_ingest
//! ```
//!
//! ## Environment Variables
//!
//! - FLEETID_DB_PATH - SQLite database path (default: data/fleetid.db)
//! - INGEST_CHANNEL_BUFFER - Event channel capacity (default: 1000)
//! - ALIAS_CONFLICT_ATTEMPTS / STORE_TIMEOUT_MS - see `IdentityConfig`
//! - RUST_LOG - Logging level (optional, default: info)

use fleetid::ingest::{start_alias_ingestion, DeviceEvent, IdentitySignal};
use fleetid::{DeviceIdentity, IdentityConfig};
use std::env;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

fn parse_input_from_args() -> Option<String> {
    let args: Vec<String> = env::args().collect();
    args.iter()
        .position(|x| x == "--input")
        .and_then(|idx| args.get(idx + 1).cloned())
}

async fn feed_events<R>(reader: R, tx: mpsc::Sender<DeviceEvent>) -> u64
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut parse_failures = 0u64;

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match DeviceEvent::from_jsonl(&line) {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            log::error!("Ingestion task stopped, no longer reading input");
                            break;
                        }
                    }
                    Err(e) => {
                        parse_failures += 1;
                        log::warn!("Failed to parse device event: {} ({})", line, e);
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                log::error!("Input read error: {}", e);
                break;
            }
        }
    }

    parse_failures
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    dotenv::dotenv().ok();

    let config = IdentityConfig::from_env()?;
    let input = parse_input_from_args();

    log::info!("🔧 alias_ingest configuration");
    log::info!("   Database: {}", config.db_path);
    log::info!("   Input: {}", input.as_deref().unwrap_or("stdin"));
    log::info!("   Conflict attempts: {}", config.conflict_attempts);

    let identity = DeviceIdentity::open_sqlite(&config)?;

    let (event_tx, event_rx) = mpsc::channel::<DeviceEvent>(config.ingest_channel_buffer);
    let (signal_tx, mut signal_rx) = mpsc::channel::<IdentitySignal>(config.ingest_channel_buffer);

    let ingestion = tokio::spawn(start_alias_ingestion(
        event_rx,
        identity.detector(),
        Some(signal_tx),
    ));

    let printer = tokio::spawn(async move {
        while let Some(signal) = signal_rx.recv().await {
            match serde_json::to_string(&signal) {
                Ok(line) => println!("{}", line),
                Err(e) => log::warn!("Failed to serialize signal: {}", e),
            }
        }
    });

    let parse_failures = match input {
        Some(path) => {
            let file = tokio::fs::File::open(&path).await?;
            feed_events(BufReader::new(file), event_tx).await
        }
        None => feed_events(BufReader::new(tokio::io::stdin()), event_tx).await,
    };

    let stats = ingestion.await?;
    printer.await?;

    log::info!(
        "✅ Done: {} events ({} unparseable lines), {} new devices, {} swaps, {} failures ({} transient)",
        stats.received,
        parse_failures,
        stats.new_devices,
        stats.swaps,
        stats.failures,
        stats.transient_failures
    );

    Ok(())
}
