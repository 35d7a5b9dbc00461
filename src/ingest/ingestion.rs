//! Alias ingestion - async channel processor for device events
//!
//! Main loop:
//! 1. Receives device events via mpsc channel
//! 2. Runs each event carrying a serial number and device UID through the SwapDetector
//! 3. Emits an IdentitySignal for new devices and swaps
//!
//! Per-event failures are logged and counted, never fatal. Events that failed with a
//! transient error (`ConflictOnUpdate`, `Timeout`) are not queued for another attempt
//! here. Every call re-evaluates the record from current state, so the next event for
//! the same serial number repairs it; callers that need an exact replay can redeliver
//! from upstream, where delivery is at-least-once and every alias update is safe to
//! repeat. `IngestStats::transient_failures` counts the events in that state.

use super::event::DeviceEvent;
use crate::alias::error::IdentityError;
use crate::alias::swap::SwapDetector;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Identity change worth notifying someone about
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IdentitySignal {
    NewDevice {
        serial_number: String,
        device_uid: String,
    },
    Swap {
        serial_number: String,
        old_device_uid: String,
        new_device_uid: String,
    },
}

/// What happened to a single event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventDisposition {
    /// No usable serial number / device UID pair
    Skipped,
    Unchanged,
    Signal(IdentitySignal),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub received: u64,
    pub skipped: u64,
    pub unchanged: u64,
    pub new_devices: u64,
    pub swaps: u64,
    /// All rejected events, transient ones included
    pub failures: u64,
    /// Rejected with an error that a later event for the same serial can clear
    pub transient_failures: u64,
}

impl IngestStats {
    fn record(&mut self, disposition: &EventDisposition) {
        match disposition {
            EventDisposition::Skipped => self.skipped += 1,
            EventDisposition::Unchanged => self.unchanged += 1,
            EventDisposition::Signal(IdentitySignal::NewDevice { .. }) => self.new_devices += 1,
            EventDisposition::Signal(IdentitySignal::Swap { .. }) => self.swaps += 1,
        }
    }
}

/// Reconcile one event against the alias store
pub async fn process_event(
    detector: &SwapDetector,
    event: &DeviceEvent,
) -> Result<EventDisposition, IdentityError> {
    let (serial_number, device_uid) = match event.alias_pair() {
        Some(pair) => pair,
        None => {
            log::debug!(
                "Skipping event {:?}: no serial number / device UID pair",
                event.event_uid
            );
            return Ok(EventDisposition::Skipped);
        }
    };

    let outcome = detector.handle_device_alias(serial_number, device_uid).await?;

    if outcome.is_new_device {
        return Ok(EventDisposition::Signal(IdentitySignal::NewDevice {
            serial_number: serial_number.to_string(),
            device_uid: device_uid.to_string(),
        }));
    }

    match (outcome.is_swap, outcome.old_device_uid) {
        (true, Some(old_device_uid)) => Ok(EventDisposition::Signal(IdentitySignal::Swap {
            serial_number: serial_number.to_string(),
            old_device_uid,
            new_device_uid: device_uid.to_string(),
        })),
        _ => Ok(EventDisposition::Unchanged),
    }
}

/// Run until the event channel closes, then return the counters
///
/// Signals go to `signal_tx` when given; a closed signal channel is logged once
/// and otherwise ignored so alias reconciliation keeps going.
pub async fn start_alias_ingestion(
    mut rx: mpsc::Receiver<DeviceEvent>,
    detector: Arc<SwapDetector>,
    signal_tx: Option<mpsc::Sender<IdentitySignal>>,
) -> IngestStats {
    log::info!("🚀 Starting alias ingestion");

    let mut stats = IngestStats::default();
    let mut signal_tx = signal_tx;

    while let Some(event) = rx.recv().await {
        stats.received += 1;

        match process_event(&detector, &event).await {
            Ok(disposition) => {
                stats.record(&disposition);

                if let EventDisposition::Signal(signal) = disposition {
                    if let Some(tx) = signal_tx.as_ref() {
                        if let Err(e) = tx.send(signal).await {
                            log::warn!("Signal channel closed, dropping signals: {}", e);
                            signal_tx = None;
                        }
                    }
                }
            }
            Err(e) => {
                stats.failures += 1;
                if e.is_transient() {
                    stats.transient_failures += 1;
                    log::warn!("⚠️  Transient alias failure (event {:?}): {}", event.event_uid, e);
                } else {
                    log::error!("❌ Alias rejected (event {:?}): {}", event.event_uid, e);
                }
            }
        }

        if stats.received % 1000 == 0 {
            log::info!(
                "📊 Ingested {} events ({} new, {} swaps, {} failures)",
                stats.received,
                stats.new_devices,
                stats.swaps,
                stats.failures
            );
        }
    }

    log::info!(
        "✅ Alias ingestion finished: {} events, {} new devices, {} swaps, {} skipped, {} failures ({} transient)",
        stats.received,
        stats.new_devices,
        stats.swaps,
        stats.skipped,
        stats.failures,
        stats.transient_failures
    );

    stats
}
