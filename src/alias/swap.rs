//! Swap detection / alias update
//!
//! Called once per inbound event that carries both a serial number and a device UID.
//!
//! Policy per call:
//! 1. Unknown serial         -> create record, report new device
//! 2. Same UID as current    -> no write
//! 3. Different UID          -> retire current UID, install new one, report swap
//!
//! Writes are conditional on the record read in the same attempt. A lost race is
//! re-read and re-evaluated (bounded), so a UID installed by a concurrent writer is
//! retired rather than overwritten.

use super::error::{validate_identifier, IdentityError, StoreError};
use super::store::{bounded, AliasStore};
use super::types::{AliasOutcome, AliasRecord, WriteOutcome};
use crate::config::IdentityConfig;
use std::sync::Arc;
use std::time::Duration;

enum Attempt {
    Done(AliasOutcome),
    Conflict,
}

pub struct SwapDetector {
    store: Arc<dyn AliasStore>,
    config: IdentityConfig,
    timeout: Duration,
    now_fn: Arc<dyn Fn() -> i64 + Send + Sync>,
}

impl SwapDetector {
    pub fn new(store: Arc<dyn AliasStore>, config: &IdentityConfig) -> Self {
        Self {
            store,
            config: config.clone(),
            timeout: config.store_timeout(),
            now_fn: Arc::new(|| chrono::Utc::now().timestamp_millis()),
        }
    }

    /// Replace the clock (unix milliseconds), for deterministic tests
    pub fn with_clock(mut self, now_fn: Arc<dyn Fn() -> i64 + Send + Sync>) -> Self {
        self.now_fn = now_fn;
        self
    }

    pub async fn handle_device_alias(
        &self,
        serial_number: &str,
        device_uid: &str,
    ) -> Result<AliasOutcome, IdentityError> {
        validate_identifier("serial_number", serial_number)?;
        validate_identifier("device_uid", device_uid)?;

        let mut backoff = self.config.conflict_backoff();

        loop {
            match self.try_apply(serial_number, device_uid).await? {
                Attempt::Done(outcome) => return Ok(outcome),
                Attempt::Conflict => {
                    if backoff.sleep().await.is_err() {
                        log::warn!(
                            "❌ Alias update for {} still conflicting after {} attempts",
                            serial_number,
                            backoff.attempts_used() + 1
                        );
                        return Err(IdentityError::ConflictOnUpdate {
                            serial_number: serial_number.to_string(),
                            attempts: backoff.attempts_used() + 1,
                        });
                    }
                    log::debug!("Re-reading alias for {} after conflict", serial_number);
                }
            }
        }
    }

    async fn try_apply(&self, serial_number: &str, device_uid: &str) -> Result<Attempt, IdentityError> {
        let existing = bounded(
            "get_by_serial",
            self.timeout,
            self.store.get_by_serial(serial_number),
        )
        .await?;

        match existing {
            None => {
                self.ensure_unclaimed(serial_number, device_uid).await?;

                let record = AliasRecord::new(serial_number, device_uid, (self.now_fn)());
                let written = bounded(
                    "insert_if_absent",
                    self.timeout,
                    self.store.insert_if_absent(&record),
                )
                .await;

                match Self::settle(written)? {
                    WriteOutcome::Applied => {
                        log::info!("🆕 New device {} -> {}", serial_number, device_uid);
                        Ok(Attempt::Done(AliasOutcome::new_device()))
                    }
                    WriteOutcome::Conflict => Ok(Attempt::Conflict),
                }
            }
            Some(record) if record.device_uid == device_uid => {
                Ok(Attempt::Done(AliasOutcome::unchanged()))
            }
            Some(record) => {
                self.ensure_unclaimed(serial_number, device_uid).await?;

                let updated = record.with_swap(device_uid, (self.now_fn)());
                let written = bounded(
                    "compare_and_swap",
                    self.timeout,
                    self.store.compare_and_swap(&record, &updated),
                )
                .await;

                match Self::settle(written)? {
                    WriteOutcome::Applied => {
                        log::info!(
                            "🔄 Swap detected for {}: {} -> {}",
                            serial_number,
                            record.device_uid,
                            device_uid
                        );
                        Ok(Attempt::Done(AliasOutcome::swapped(record.device_uid)))
                    }
                    WriteOutcome::Conflict => Ok(Attempt::Conflict),
                }
            }
        }
    }

    /// A duplicate-UID rejection means someone else claimed the UID between our check
    /// and our write; treat it as a conflict so the next attempt reports the owner.
    fn settle(
        written: Result<WriteOutcome, IdentityError>,
    ) -> Result<WriteOutcome, IdentityError> {
        match written {
            Err(IdentityError::Store(StoreError::DuplicateDeviceUid(_))) => {
                Ok(WriteOutcome::Conflict)
            }
            other => other,
        }
    }

    /// Fail if the UID is current on, or was retired by, a different serial
    async fn ensure_unclaimed(&self, serial_number: &str, device_uid: &str) -> Result<(), IdentityError> {
        let owner = bounded(
            "get_by_device_uid",
            self.timeout,
            self.store.get_by_device_uid(device_uid),
        )
        .await?;

        match owner {
            Some(owner) if owner.serial_number != serial_number => {
                log::warn!(
                    "Refusing to bind {} to {}: owned by {}",
                    device_uid,
                    serial_number,
                    owner.serial_number
                );
                Err(IdentityError::DeviceUidClaimed {
                    device_uid: device_uid.to_string(),
                    serial_number: owner.serial_number,
                })
            }
            _ => Ok(()),
        }
    }
}
