//! DeviceIdentity - the four operations exposed to handlers, ingestion and admin tooling
//!
//! - `resolve_device(identifier)`
//! - `handle_device_alias(serial_number, device_uid)`
//! - `merge_devices(source_serial, target_serial)`
//! - `get_all_device_uids_for_serial(serial_number)`
//!
//! plus `history`, the fan-out read every serial-number history query goes through.

use crate::alias::error::{IdentityError, StoreError};
use crate::alias::store::{bounded, AliasStore};
use crate::alias::{
    AliasOutcome, AliasRecord, InMemoryAliasStore, MergeOperator, MergeResult, ResolvedDevice,
    Resolver, SqliteAliasStore, SwapDetector,
};
use crate::config::IdentityConfig;
use crate::fanout::{DeviceHistoryStore, FanoutAggregator, FanoutResult};
use std::sync::Arc;
use std::time::Duration;

pub struct DeviceIdentity {
    store: Arc<dyn AliasStore>,
    timeout: Duration,
    resolver: Resolver,
    detector: Arc<SwapDetector>,
    merger: MergeOperator,
    fanout: FanoutAggregator,
}

impl DeviceIdentity {
    pub fn new(store: Arc<dyn AliasStore>, config: &IdentityConfig) -> Self {
        Self::new_with_timestamp_fn(
            store,
            config,
            Arc::new(|| chrono::Utc::now().timestamp_millis()),
        )
    }

    /// Create with a custom clock (unix milliseconds), used for deterministic tests
    pub fn new_with_timestamp_fn(
        store: Arc<dyn AliasStore>,
        config: &IdentityConfig,
        now_fn: Arc<dyn Fn() -> i64 + Send + Sync>,
    ) -> Self {
        let resolver = Resolver::new(store.clone(), config.store_timeout());
        let detector = SwapDetector::new(store.clone(), config).with_clock(now_fn.clone());
        let merger = MergeOperator::new(store.clone(), config).with_clock(now_fn);
        let fanout = FanoutAggregator::new(resolver.clone(), config);

        Self {
            store,
            timeout: config.store_timeout(),
            resolver,
            detector: Arc::new(detector),
            merger,
            fanout,
        }
    }

    /// Open the SQLite alias store at `config.db_path`
    pub fn open_sqlite(config: &IdentityConfig) -> Result<Self, StoreError> {
        let store = SqliteAliasStore::open(&config.db_path)?;
        Ok(Self::new(Arc::new(store), config))
    }

    pub fn in_memory(config: &IdentityConfig) -> Self {
        Self::new(Arc::new(InMemoryAliasStore::new()), config)
    }

    pub async fn resolve_device(&self, identifier: &str) -> Result<ResolvedDevice, IdentityError> {
        self.resolver.resolve_device(identifier).await
    }

    pub async fn handle_device_alias(
        &self,
        serial_number: &str,
        device_uid: &str,
    ) -> Result<AliasOutcome, IdentityError> {
        self.detector.handle_device_alias(serial_number, device_uid).await
    }

    /// Privileged: callers are expected to have authorised the request already
    pub async fn merge_devices(
        &self,
        source_serial: &str,
        target_serial: &str,
    ) -> Result<MergeResult, IdentityError> {
        self.merger.merge_devices(source_serial, target_serial).await
    }

    pub async fn get_all_device_uids_for_serial(
        &self,
        serial_number: &str,
    ) -> Result<Vec<String>, IdentityError> {
        self.resolver.get_all_device_uids_for_serial(serial_number).await
    }

    /// All of a serial number's records in `store`, across every UID it has had
    pub async fn history<S>(
        &self,
        serial_number: &str,
        store: &S,
        limit: Option<usize>,
    ) -> Result<FanoutResult<S::Item>, IdentityError>
    where
        S: DeviceHistoryStore + ?Sized,
    {
        self.fanout.query(serial_number, store, limit).await
    }

    pub async fn list_aliases(&self, limit: usize) -> Result<Vec<AliasRecord>, IdentityError> {
        bounded("list", self.timeout, self.store.list(limit)).await
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Shared handle for the ingestion loop
    pub fn detector(&self) -> Arc<SwapDetector> {
        Arc::clone(&self.detector)
    }

    pub fn backend_type(&self) -> &'static str {
        self.store.backend_type()
    }
}
