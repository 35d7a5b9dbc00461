//! Alias record and the views derived from it

use serde::{Deserialize, Serialize};

/// Persistent mapping from a serial number to its current and historical device UIDs
///
/// Invariants maintained by every constructor here:
/// - `previous_device_uids` never contains `device_uid`
/// - `previous_device_uids` has no duplicates
///
/// `version` is the optimistic concurrency token checked by conditional writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasRecord {
    pub serial_number: String,
    pub device_uid: String,
    pub previous_device_uids: Vec<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub version: u64,
}

impl AliasRecord {
    /// Fresh record for a serial number seen for the first time
    pub fn new(serial_number: &str, device_uid: &str, now: i64) -> Self {
        Self {
            serial_number: serial_number.to_string(),
            device_uid: device_uid.to_string(),
            previous_device_uids: Vec::new(),
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    /// Current UID first, then previous UIDs in retirement order
    pub fn all_device_uids(&self) -> Vec<String> {
        let mut uids = Vec::with_capacity(1 + self.previous_device_uids.len());
        uids.push(self.device_uid.clone());
        uids.extend(self.previous_device_uids.iter().cloned());
        uids
    }

    pub fn contains_device_uid(&self, device_uid: &str) -> bool {
        self.device_uid == device_uid || self.previous_device_uids.iter().any(|d| d == device_uid)
    }

    /// Record after `new_device_uid` replaces the current UID
    ///
    /// The old current UID is retired (skipped if already retired). If the new UID was
    /// itself retired earlier on this serial it is pulled back out of the history.
    pub fn with_swap(&self, new_device_uid: &str, now: i64) -> Self {
        let mut previous: Vec<String> = self
            .previous_device_uids
            .iter()
            .filter(|d| d.as_str() != new_device_uid)
            .cloned()
            .collect();

        if !previous.contains(&self.device_uid) {
            previous.push(self.device_uid.clone());
        }

        Self {
            serial_number: self.serial_number.clone(),
            device_uid: new_device_uid.to_string(),
            previous_device_uids: previous,
            created_at: self.created_at,
            updated_at: now,
            version: self.version + 1,
        }
    }

    /// Record after absorbing every UID of `source` into the history
    ///
    /// The current UID is kept. Returns `None` when `source` contributes nothing new,
    /// so replays of a merge do not rewrite the record.
    pub fn with_absorbed(&self, source: &AliasRecord, now: i64) -> Option<Self> {
        let mut previous = self.previous_device_uids.clone();
        let mut changed = false;

        for uid in source.all_device_uids() {
            if uid != self.device_uid && !previous.contains(&uid) {
                previous.push(uid);
                changed = true;
            }
        }

        if !changed {
            return None;
        }

        Some(Self {
            serial_number: self.serial_number.clone(),
            device_uid: self.device_uid.clone(),
            previous_device_uids: previous,
            created_at: self.created_at,
            updated_at: now,
            version: self.version + 1,
        })
    }

    pub fn resolved(&self) -> ResolvedDevice {
        ResolvedDevice {
            serial_number: self.serial_number.clone(),
            device_uid: self.device_uid.clone(),
            all_device_uids: self.all_device_uids(),
        }
    }
}

/// Unified view returned by `resolve_device`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedDevice {
    pub serial_number: String,
    pub device_uid: String,
    pub all_device_uids: Vec<String>,
}

/// Result of reconciling one inbound `(serial_number, device_uid)` pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AliasOutcome {
    pub is_new_device: bool,
    pub is_swap: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_device_uid: Option<String>,
}

impl AliasOutcome {
    pub fn new_device() -> Self {
        Self {
            is_new_device: true,
            is_swap: false,
            old_device_uid: None,
        }
    }

    pub fn unchanged() -> Self {
        Self {
            is_new_device: false,
            is_swap: false,
            old_device_uid: None,
        }
    }

    pub fn swapped(old_device_uid: String) -> Self {
        Self {
            is_new_device: false,
            is_swap: true,
            old_device_uid: Some(old_device_uid),
        }
    }
}

/// Marker left behind when a source serial is folded into a target serial
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeTombstone {
    pub source_serial: String,
    pub target_serial: String,
    pub merged_device_uids: Vec<String>,
    pub merged_at: i64,
}

/// Outcome of `merge_devices`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeResult {
    pub source_serial: String,
    pub target_serial: String,
    /// Target's current UID, unchanged by the merge
    pub device_uid: String,
    pub all_device_uids: Vec<String>,
    /// UIDs that were new to the target in this run
    pub absorbed_device_uids: Vec<String>,
    /// True when a previous run already completed this merge
    pub already_merged: bool,
}

/// Outcome of a conditional write against the alias store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    /// Precondition failed: the record changed (or appeared/vanished) since it was read
    Conflict,
}
