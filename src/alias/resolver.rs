//! Read-only bidirectional lookup between serial numbers and device UIDs

use super::error::{validate_identifier, IdentityError};
use super::store::{bounded, AliasStore};
use super::types::{AliasRecord, ResolvedDevice};
use std::sync::Arc;
use std::time::Duration;

/// Resolver over an alias store
///
/// Never writes. Store errors are propagated as-is; only a missing record becomes
/// `IdentityError::NotFound`.
#[derive(Clone)]
pub struct Resolver {
    store: Arc<dyn AliasStore>,
    timeout: Duration,
}

impl Resolver {
    pub fn new(store: Arc<dyn AliasStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub async fn get_alias_by_serial(&self, serial_number: &str) -> Result<AliasRecord, IdentityError> {
        validate_identifier("serial_number", serial_number)?;
        bounded(
            "get_alias_by_serial",
            self.timeout,
            self.store.get_by_serial(serial_number),
        )
        .await?
        .ok_or_else(|| IdentityError::NotFound(serial_number.to_string()))
    }

    pub async fn get_alias_by_device_uid(&self, device_uid: &str) -> Result<AliasRecord, IdentityError> {
        validate_identifier("device_uid", device_uid)?;
        bounded(
            "get_alias_by_device_uid",
            self.timeout,
            self.store.get_by_device_uid(device_uid),
        )
        .await?
        .ok_or_else(|| IdentityError::NotFound(device_uid.to_string()))
    }

    /// Resolve either kind of identifier to the unified view
    ///
    /// Serial number lookup is tried first, then device UID (current or retired).
    pub async fn resolve_device(&self, identifier: &str) -> Result<ResolvedDevice, IdentityError> {
        validate_identifier("identifier", identifier)?;

        let by_serial = bounded(
            "resolve_device",
            self.timeout,
            self.store.get_by_serial(identifier),
        )
        .await?;
        if let Some(record) = by_serial {
            return Ok(record.resolved());
        }

        let by_uid = bounded(
            "resolve_device",
            self.timeout,
            self.store.get_by_device_uid(identifier),
        )
        .await?;
        match by_uid {
            Some(record) => {
                log::debug!(
                    "Resolved device UID {} to serial {}",
                    identifier,
                    record.serial_number
                );
                Ok(record.resolved())
            }
            None => Err(IdentityError::NotFound(identifier.to_string())),
        }
    }

    pub async fn get_device_uid_for_serial(&self, serial_number: &str) -> Result<String, IdentityError> {
        Ok(self.resolve_device(serial_number).await?.device_uid)
    }

    pub async fn get_serial_for_device_uid(&self, device_uid: &str) -> Result<String, IdentityError> {
        Ok(self.resolve_device(device_uid).await?.serial_number)
    }

    /// Every UID ever bound to the serial, current first
    ///
    /// An unknown serial yields an empty list, not an error.
    pub async fn get_all_device_uids_for_serial(
        &self,
        serial_number: &str,
    ) -> Result<Vec<String>, IdentityError> {
        match self.resolve_device(serial_number).await {
            Ok(resolved) => Ok(resolved.all_device_uids),
            Err(IdentityError::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}
