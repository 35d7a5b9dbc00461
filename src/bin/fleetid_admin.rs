//! Fleet identity admin tool
//!
//! ## Usage
//!
//! ```bash
//! fleetid_admin resolve <serial-or-uid>
//! fleetid_admin uids <serial>
//! fleetid_admin alias <serial> <device-uid>
//! fleetid_admin merge <source-serial> <target-serial>
//! fleetid_admin list [limit]
//! fleetid_admin history <serial> <alerts|commands|journeys|locations> [limit]
//! ```
//!
//! Results are printed to stdout as JSON. `merge` is the privileged operation; run
//! it only after the operator has confirmed both serial numbers belong to one unit.
//!
//! ## Environment Variables
//!
//! - FLEETID_DB_PATH - SQLite database path (default: data/fleetid.db)
//! - FANOUT_POLICY - partial | fail_fast (default: partial)
//! - RUST_LOG - Logging level (optional, default: info)

use fleetid::history::{HistoryKind, SqliteHistoryStore};
use fleetid::{DeviceIdentity, IdentityConfig};
use serde::Serialize;
use std::env;

const USAGE: &str = "usage: fleetid_admin <resolve|uids|alias|merge|list|history> [args...]";

#[derive(Debug)]
enum Command {
    Resolve { identifier: String },
    Uids { serial_number: String },
    Alias { serial_number: String, device_uid: String },
    Merge { source_serial: String, target_serial: String },
    List { limit: usize },
    History { serial_number: String, kind: HistoryKind, limit: Option<usize> },
}

fn parse_limit(value: Option<&String>) -> Result<Option<usize>, String> {
    value
        .map(|v| v.parse::<usize>().map_err(|_| format!("Invalid limit: {}", v)))
        .transpose()
}

fn parse_command(args: &[String]) -> Result<Command, String> {
    let arg = |idx: usize| -> Result<String, String> {
        args.get(idx).cloned().ok_or_else(|| USAGE.to_string())
    };

    match args.first().map(|s| s.as_str()) {
        Some("resolve") => Ok(Command::Resolve { identifier: arg(1)? }),
        Some("uids") => Ok(Command::Uids { serial_number: arg(1)? }),
        Some("alias") => Ok(Command::Alias {
            serial_number: arg(1)?,
            device_uid: arg(2)?,
        }),
        Some("merge") => Ok(Command::Merge {
            source_serial: arg(1)?,
            target_serial: arg(2)?,
        }),
        Some("list") => Ok(Command::List {
            limit: parse_limit(args.get(1))?.unwrap_or(100),
        }),
        Some("history") => Ok(Command::History {
            serial_number: arg(1)?,
            kind: arg(2)?.parse()?,
            limit: parse_limit(args.get(3))?,
        }),
        _ => Err(USAGE.to_string()),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    dotenv::dotenv().ok();

    let args: Vec<String> = env::args().skip(1).collect();
    let command = parse_command(&args)?;
    let config = IdentityConfig::from_env()?;

    let identity = DeviceIdentity::open_sqlite(&config)?;
    log::debug!("Using {} alias store at {}", identity.backend_type(), config.db_path);

    match command {
        Command::Resolve { identifier } => {
            print_json(&identity.resolve_device(&identifier).await?)?;
        }
        Command::Uids { serial_number } => {
            print_json(&identity.get_all_device_uids_for_serial(&serial_number).await?)?;
        }
        Command::Alias { serial_number, device_uid } => {
            print_json(&identity.handle_device_alias(&serial_number, &device_uid).await?)?;
        }
        Command::Merge { source_serial, target_serial } => {
            log::info!("🔀 Merging {} into {}", source_serial, target_serial);
            let result = identity.merge_devices(&source_serial, &target_serial).await?;
            if result.already_merged {
                log::info!("   Merge was already complete, nothing changed");
            }
            print_json(&result)?;
        }
        Command::List { limit } => {
            print_json(&identity.list_aliases(limit).await?)?;
        }
        Command::History { serial_number, kind, limit } => {
            let store = SqliteHistoryStore::open(&config.db_path, kind)?;
            let result = identity.history(&serial_number, &store, limit).await?;

            if result.degraded {
                log::warn!(
                    "⚠️  Partial history: queries failed for {:?}",
                    result.failed_device_uids
                );
            }

            print_json(&serde_json::json!({
                "serial_number": result.serial_number,
                "kind": kind,
                "device_uids": result.device_uids,
                "degraded": result.degraded,
                "failed_device_uids": result.failed_device_uids,
                "items": result.items,
            }))?;
        }
    }

    Ok(())
}
