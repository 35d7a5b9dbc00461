//! Error types for the alias store and the identity operations built on it

use std::time::Duration;

/// Failure inside a store backend
#[derive(Debug)]
pub enum StoreError {
    Database(String),
    Serialization(serde_json::Error),
    /// Another serial number already holds this UID as its current identifier
    DuplicateDeviceUid(String),
    Timeout(Duration),
    LockPoisoned,
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err)
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Database(e) => write!(f, "Database error: {}", e),
            StoreError::Serialization(e) => write!(f, "Serialization error: {}", e),
            StoreError::DuplicateDeviceUid(uid) => {
                write!(f, "Device UID {} is already current on another serial", uid)
            }
            StoreError::Timeout(after) => write!(f, "Query timed out after {}ms", after.as_millis()),
            StoreError::LockPoisoned => write!(f, "Store connection lock poisoned"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Errors surfaced by resolve / swap / merge / fan-out
#[derive(Debug)]
pub enum IdentityError {
    /// Neither a serial number nor a device UID matched
    NotFound(String),
    /// Conditional write kept losing to concurrent writers
    ConflictOnUpdate { serial_number: String, attempts: u32 },
    MergeTargetEqualsSource(String),
    MergeSourceNotFound(String),
    MergeTargetNotFound(String),
    /// The UID is (or was) bound to a different serial number
    DeviceUidClaimed { device_uid: String, serial_number: String },
    InvalidIdentifier(String),
    Timeout { operation: &'static str, after: Duration },
    /// A per-UID history query failed during fan-out
    FanoutShard { device_uid: String, source: StoreError },
    Store(StoreError),
}

impl IdentityError {
    /// Whether redelivering the same request may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            IdentityError::ConflictOnUpdate { .. }
            | IdentityError::Timeout { .. }
            | IdentityError::FanoutShard { .. } => true,
            IdentityError::Store(e) => matches!(
                e,
                StoreError::Database(_) | StoreError::Timeout(_) | StoreError::LockPoisoned
            ),
            _ => false,
        }
    }
}

impl From<StoreError> for IdentityError {
    fn from(err: StoreError) -> Self {
        IdentityError::Store(err)
    }
}

impl std::fmt::Display for IdentityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdentityError::NotFound(id) => write!(f, "Device not found: {}", id),
            IdentityError::ConflictOnUpdate { serial_number, attempts } => write!(
                f,
                "Concurrent update conflict on {} after {} attempts",
                serial_number, attempts
            ),
            IdentityError::MergeTargetEqualsSource(serial) => {
                write!(f, "Cannot merge {} into itself", serial)
            }
            IdentityError::MergeSourceNotFound(serial) => {
                write!(f, "Merge source not found: {}", serial)
            }
            IdentityError::MergeTargetNotFound(serial) => {
                write!(f, "Merge target not found: {}", serial)
            }
            IdentityError::DeviceUidClaimed { device_uid, serial_number } => write!(
                f,
                "Device UID {} belongs to serial {}",
                device_uid, serial_number
            ),
            IdentityError::InvalidIdentifier(msg) => write!(f, "Invalid identifier: {}", msg),
            IdentityError::Timeout { operation, after } => {
                write!(f, "{} timed out after {}ms", operation, after.as_millis())
            }
            IdentityError::FanoutShard { device_uid, source } => {
                write!(f, "History query for {} failed: {}", device_uid, source)
            }
            IdentityError::Store(e) => write!(f, "Store error: {}", e),
        }
    }
}

impl std::error::Error for IdentityError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IdentityError::FanoutShard { source, .. } => Some(source),
            IdentityError::Store(e) => Some(e),
            _ => None,
        }
    }
}

/// Reject empty or whitespace-only identifiers before they reach a store
pub(crate) fn validate_identifier(kind: &str, value: &str) -> Result<(), IdentityError> {
    if value.trim().is_empty() {
        return Err(IdentityError::InvalidIdentifier(format!(
            "{} must not be empty",
            kind
        )));
    }
    Ok(())
}
