//! In-memory alias store
//!
//! Same semantics as the SQLite backend; every write takes the write lock so the
//! read-compare-write sequence of a conditional write is atomic.

use super::error::StoreError;
use super::store::{precondition_holds, AliasStore};
use super::types::{AliasRecord, MergeTombstone, WriteOutcome};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct MemoryState {
    records: HashMap<String, AliasRecord>,
    tombstones: HashMap<String, MergeTombstone>,
}

impl MemoryState {
    fn current_owner(&self, device_uid: &str) -> Option<&AliasRecord> {
        self.records.values().find(|r| r.device_uid == device_uid)
    }

    /// Another serial holding `device_uid`, as its current UID or a retired one
    fn claimed_elsewhere(&self, device_uid: &str, serial_number: &str) -> bool {
        self.records
            .values()
            .any(|r| r.serial_number != serial_number && r.contains_device_uid(device_uid))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryAliasStore {
    state: RwLock<MemoryState>,
}

impl InMemoryAliasStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.records.is_empty()
    }
}

#[async_trait]
impl AliasStore for InMemoryAliasStore {
    async fn get_by_serial(&self, serial_number: &str) -> Result<Option<AliasRecord>, StoreError> {
        Ok(self.state.read().await.records.get(serial_number).cloned())
    }

    async fn get_by_device_uid(&self, device_uid: &str) -> Result<Option<AliasRecord>, StoreError> {
        let state = self.state.read().await;

        if let Some(record) = state.current_owner(device_uid) {
            return Ok(Some(record.clone()));
        }

        Ok(state
            .records
            .values()
            .find(|r| r.previous_device_uids.iter().any(|d| d == device_uid))
            .cloned())
    }

    async fn insert_if_absent(&self, record: &AliasRecord) -> Result<WriteOutcome, StoreError> {
        let mut state = self.state.write().await;

        if state.records.contains_key(&record.serial_number) {
            return Ok(WriteOutcome::Conflict);
        }
        if state.claimed_elsewhere(&record.device_uid, &record.serial_number) {
            return Err(StoreError::DuplicateDeviceUid(record.device_uid.clone()));
        }

        state
            .records
            .insert(record.serial_number.clone(), record.clone());
        Ok(WriteOutcome::Applied)
    }

    async fn compare_and_swap(
        &self,
        expected: &AliasRecord,
        updated: &AliasRecord,
    ) -> Result<WriteOutcome, StoreError> {
        let mut state = self.state.write().await;

        match state.records.get(&expected.serial_number) {
            Some(stored) if precondition_holds(stored, expected) => {}
            _ => return Ok(WriteOutcome::Conflict),
        }

        if state.claimed_elsewhere(&updated.device_uid, &updated.serial_number) {
            return Err(StoreError::DuplicateDeviceUid(updated.device_uid.clone()));
        }

        state
            .records
            .insert(updated.serial_number.clone(), updated.clone());
        Ok(WriteOutcome::Applied)
    }

    async fn delete_merged(
        &self,
        expected: &AliasRecord,
        tombstone: &MergeTombstone,
    ) -> Result<WriteOutcome, StoreError> {
        let mut state = self.state.write().await;

        match state.records.get(&expected.serial_number) {
            Some(stored) if precondition_holds(stored, expected) => {}
            _ => return Ok(WriteOutcome::Conflict),
        }

        state.records.remove(&expected.serial_number);
        state
            .tombstones
            .insert(tombstone.source_serial.clone(), tombstone.clone());
        Ok(WriteOutcome::Applied)
    }

    async fn get_tombstone(&self, source_serial: &str) -> Result<Option<MergeTombstone>, StoreError> {
        Ok(self.state.read().await.tombstones.get(source_serial).cloned())
    }

    async fn list(&self, limit: usize) -> Result<Vec<AliasRecord>, StoreError> {
        let state = self.state.read().await;
        let mut records: Vec<AliasRecord> = state.records.values().cloned().collect();
        records.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.serial_number.cmp(&b.serial_number))
        });
        records.truncate(limit);
        Ok(records)
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
