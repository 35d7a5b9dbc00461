//! Administrative merge of two serial numbers
//!
//! The target keeps its current UID and absorbs every UID of the source into its
//! history; the source record is deleted and a tombstone recorded in the same write.
//!
//! Downstream identifier-keyed stores are NOT rewritten. Records written under the
//! source's UIDs stay where they are and are reached through the target's (now
//! larger) UID set by the fan-out aggregator.
//!
//! Every step is safe to repeat: the union is recomputed from current state, an
//! already-absorbed source produces no write, and a completed merge is recognised
//! from its tombstone.

use super::error::{validate_identifier, IdentityError};
use super::store::{bounded, AliasStore};
use super::types::{AliasRecord, MergeResult, MergeTombstone, WriteOutcome};
use crate::config::IdentityConfig;
use std::sync::Arc;
use std::time::Duration;

enum Attempt {
    Done(MergeResult),
    Conflict,
}

pub struct MergeOperator {
    store: Arc<dyn AliasStore>,
    config: IdentityConfig,
    timeout: Duration,
    now_fn: Arc<dyn Fn() -> i64 + Send + Sync>,
}

impl MergeOperator {
    pub fn new(store: Arc<dyn AliasStore>, config: &IdentityConfig) -> Self {
        Self {
            store,
            config: config.clone(),
            timeout: config.store_timeout(),
            now_fn: Arc::new(|| chrono::Utc::now().timestamp_millis()),
        }
    }

    pub fn with_clock(mut self, now_fn: Arc<dyn Fn() -> i64 + Send + Sync>) -> Self {
        self.now_fn = now_fn;
        self
    }

    /// Fold `source_serial` into `target_serial`
    ///
    /// Validation errors (`MergeTargetEqualsSource`, `MergeTargetNotFound`,
    /// `MergeSourceNotFound`) are raised before any write.
    pub async fn merge_devices(
        &self,
        source_serial: &str,
        target_serial: &str,
    ) -> Result<MergeResult, IdentityError> {
        validate_identifier("source_serial", source_serial)?;
        validate_identifier("target_serial", target_serial)?;

        if source_serial == target_serial {
            return Err(IdentityError::MergeTargetEqualsSource(source_serial.to_string()));
        }

        let mut backoff = self.config.conflict_backoff();
        let mut absorbed = Vec::new();

        loop {
            match self.try_merge(source_serial, target_serial, &mut absorbed).await? {
                Attempt::Done(result) => return Ok(result),
                Attempt::Conflict => {
                    if backoff.sleep().await.is_err() {
                        return Err(IdentityError::ConflictOnUpdate {
                            serial_number: target_serial.to_string(),
                            attempts: backoff.attempts_used() + 1,
                        });
                    }
                }
            }
        }
    }

    async fn try_merge(
        &self,
        source_serial: &str,
        target_serial: &str,
        absorbed: &mut Vec<String>,
    ) -> Result<Attempt, IdentityError> {
        let target = bounded(
            "get_by_serial",
            self.timeout,
            self.store.get_by_serial(target_serial),
        )
        .await?
        .ok_or_else(|| IdentityError::MergeTargetNotFound(target_serial.to_string()))?;

        let source = bounded(
            "get_by_serial",
            self.timeout,
            self.store.get_by_serial(source_serial),
        )
        .await?;

        let source = match source {
            Some(source) => source,
            None => return self.already_merged(source_serial, &target, absorbed).await,
        };

        let now = (self.now_fn)();
        let merged_target = match target.with_absorbed(&source, now) {
            Some(updated) => {
                let written = bounded(
                    "compare_and_swap",
                    self.timeout,
                    self.store.compare_and_swap(&target, &updated),
                )
                .await?;
                if written == WriteOutcome::Conflict {
                    log::debug!("Merge target {} changed underneath, retrying", target_serial);
                    return Ok(Attempt::Conflict);
                }
                for uid in source.all_device_uids() {
                    if !target.contains_device_uid(&uid) && !absorbed.contains(&uid) {
                        absorbed.push(uid);
                    }
                }
                updated
            }
            None => target,
        };

        let tombstone = MergeTombstone {
            source_serial: source.serial_number.clone(),
            target_serial: merged_target.serial_number.clone(),
            merged_device_uids: source.all_device_uids(),
            merged_at: now,
        };

        let deleted = bounded(
            "delete_merged",
            self.timeout,
            self.store.delete_merged(&source, &tombstone),
        )
        .await?;
        if deleted == WriteOutcome::Conflict {
            // Source swapped (or was merged elsewhere) after we read it; recompute
            log::debug!("Merge source {} changed underneath, retrying", source_serial);
            return Ok(Attempt::Conflict);
        }

        log::info!(
            "🔗 Merged {} into {} ({} UIDs absorbed, {} total)",
            source_serial,
            target_serial,
            absorbed.len(),
            merged_target.all_device_uids().len()
        );

        Ok(Attempt::Done(Self::result(
            source_serial,
            &merged_target,
            absorbed.clone(),
            false,
        )))
    }

    /// Source is gone: succeed only if a tombstone says it went into this target
    async fn already_merged(
        &self,
        source_serial: &str,
        target: &AliasRecord,
        absorbed: &[String],
    ) -> Result<Attempt, IdentityError> {
        let tombstone = bounded(
            "get_tombstone",
            self.timeout,
            self.store.get_tombstone(source_serial),
        )
        .await?;

        match tombstone {
            Some(t) if t.target_serial == target.serial_number => {
                // An earlier attempt of this call may have done the work
                let already_merged = absorbed.is_empty();
                if already_merged {
                    log::info!(
                        "Merge {} -> {} already applied at {}",
                        source_serial,
                        target.serial_number,
                        t.merged_at
                    );
                }
                Ok(Attempt::Done(Self::result(
                    source_serial,
                    target,
                    absorbed.to_vec(),
                    already_merged,
                )))
            }
            _ => Err(IdentityError::MergeSourceNotFound(source_serial.to_string())),
        }
    }

    fn result(
        source_serial: &str,
        target: &AliasRecord,
        absorbed_device_uids: Vec<String>,
        already_merged: bool,
    ) -> MergeResult {
        MergeResult {
            source_serial: source_serial.to_string(),
            target_serial: target.serial_number.clone(),
            device_uid: target.device_uid.clone(),
            all_device_uids: target.all_device_uids(),
            absorbed_device_uids,
            already_merged,
        }
    }
}
