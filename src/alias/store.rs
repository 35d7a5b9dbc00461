//! Alias store trait
//!
//! Defines the persistence contract the resolver, swap detector and merge operator
//! are written against. Backends hold no business rules: they only guarantee that
//! each write is atomic for a single record and honours its precondition.

use super::error::{IdentityError, StoreError};
use super::types::{AliasRecord, MergeTombstone, WriteOutcome};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// Keyed record store for alias records
///
/// Primary key: `serial_number`. Secondary lookup: `device_uid`.
///
/// Conditional writes compare the stored record against `expected` on three fields:
/// `serial_number`, `device_uid` and `version`. Any mismatch (including a missing
/// record) yields `WriteOutcome::Conflict` and leaves the store untouched.
#[async_trait]
pub trait AliasStore: Send + Sync {
    async fn get_by_serial(&self, serial_number: &str) -> Result<Option<AliasRecord>, StoreError>;

    /// Record whose current UID matches, else the record that retired this UID
    async fn get_by_device_uid(&self, device_uid: &str) -> Result<Option<AliasRecord>, StoreError>;

    /// Insert unless a record with the same serial number exists
    ///
    /// Returns `Err(StoreError::DuplicateDeviceUid)` if another record already has
    /// `record.device_uid` as its current UID.
    async fn insert_if_absent(&self, record: &AliasRecord) -> Result<WriteOutcome, StoreError>;

    /// Replace `expected` with `updated` if the stored record still equals `expected`
    async fn compare_and_swap(
        &self,
        expected: &AliasRecord,
        updated: &AliasRecord,
    ) -> Result<WriteOutcome, StoreError>;

    /// Delete `expected` and record `tombstone` in one step, guarded like `compare_and_swap`
    async fn delete_merged(
        &self,
        expected: &AliasRecord,
        tombstone: &MergeTombstone,
    ) -> Result<WriteOutcome, StoreError>;

    async fn get_tombstone(&self, source_serial: &str) -> Result<Option<MergeTombstone>, StoreError>;

    /// Most recently updated records first
    async fn list(&self, limit: usize) -> Result<Vec<AliasRecord>, StoreError>;

    /// Get backend type for logging
    fn backend_type(&self) -> &'static str;
}

/// Run a store call under a deadline, mapping both failure kinds to `IdentityError`
pub(crate) async fn bounded<T, F>(
    operation: &'static str,
    timeout: Duration,
    fut: F,
) -> Result<T, IdentityError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map_err(IdentityError::from),
        Err(_) => Err(IdentityError::Timeout {
            operation,
            after: timeout,
        }),
    }
}

/// Matches the three-field precondition shared by all conditional writes
pub(crate) fn precondition_holds(stored: &AliasRecord, expected: &AliasRecord) -> bool {
    stored.serial_number == expected.serial_number
        && stored.device_uid == expected.device_uid
        && stored.version == expected.version
}
