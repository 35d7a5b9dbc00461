//! Integration tests for device identity resolution and swap reconciliation
//!
//! Exercises the public DeviceIdentity surface end to end:
//! - Swap detection and resolution by serial, current UID and retired UID
//! - Administrative merges, including replays and validation failures
//! - Concurrent writers racing on one serial number, and on one UID, on both backends
//! - A UID retired by one serial between another serial's ownership check and write
//! - Store deadlines firing while SQLite is locked by another connection
//! - Conflict exhaustion against a store that never accepts a write
//! - Fan-out history reads across every UID a serial number has had
//! - SQLite persistence across reopen

#[cfg(test)]
mod identity_integration_tests {
    use async_trait::async_trait;
    use fleetid::alias::{
        AliasRecord, AliasStore, InMemoryAliasStore, MergeTombstone, SqliteAliasStore,
        StoreError, SwapDetector, WriteOutcome,
    };
    use fleetid::history::{HistoryEntry, HistoryKind, SqliteHistoryStore};
    use fleetid::ingest::{start_alias_ingestion, DeviceEvent};
    use fleetid::{DeviceIdentity, FanoutPolicy, IdentityConfig, IdentityError};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tempfile::tempdir;
    use tokio::sync::mpsc;

    fn fast_config() -> IdentityConfig {
        IdentityConfig {
            retry_initial_delay_ms: 1,
            retry_max_delay_ms: 5,
            ..IdentityConfig::default()
        }
    }

    fn identity_with_clock(store: Arc<dyn AliasStore>, config: &IdentityConfig) -> DeviceIdentity {
        let clock = Arc::new(AtomicI64::new(1_700_000_000_000));
        DeviceIdentity::new_with_timestamp_fn(
            store,
            config,
            Arc::new(move || clock.fetch_add(1, Ordering::SeqCst)),
        )
    }

    fn alert(record_id: &str, device_uid: &str, event_time: i64) -> HistoryEntry {
        HistoryEntry {
            kind: HistoryKind::Alert,
            record_id: record_id.to_string(),
            device_uid: device_uid.to_string(),
            event_time,
            payload: serde_json::json!({ "level": "warning" }),
        }
    }

    fn assert_well_formed(record: &AliasRecord) {
        assert!(
            !record.previous_device_uids.contains(&record.device_uid),
            "current UID must not also be retired: {:?}",
            record
        );
        let unique: HashSet<_> = record.previous_device_uids.iter().collect();
        assert_eq!(
            unique.len(),
            record.previous_device_uids.len(),
            "retired UIDs must be unique: {:?}",
            record
        );
    }

    #[tokio::test]
    async fn test_swap_is_resolvable_by_every_identifier() {
        let identity = identity_with_clock(Arc::new(InMemoryAliasStore::new()), &fast_config());

        let first = identity.handle_device_alias("SN-001", "dev:AAA").await.unwrap();
        assert!(first.is_new_device);

        let swap = identity.handle_device_alias("SN-001", "dev:BBB").await.unwrap();
        assert!(swap.is_swap);
        assert_eq!(swap.old_device_uid.as_deref(), Some("dev:AAA"));

        for identifier in ["SN-001", "dev:BBB", "dev:AAA"] {
            let resolved = identity.resolve_device(identifier).await.unwrap();
            assert_eq!(resolved.serial_number, "SN-001", "via {}", identifier);
            assert_eq!(resolved.device_uid, "dev:BBB", "via {}", identifier);
            assert_eq!(resolved.all_device_uids, vec!["dev:BBB", "dev:AAA"]);
        }

        assert!(matches!(
            identity.resolve_device("dev:ZZZ").await,
            Err(IdentityError::NotFound(_))
        ));
        assert!(identity
            .get_all_device_uids_for_serial("SN-404")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_replayed_events_do_not_write() {
        let identity = identity_with_clock(Arc::new(InMemoryAliasStore::new()), &fast_config());

        identity.handle_device_alias("SN-001", "dev:AAA").await.unwrap();
        identity.handle_device_alias("SN-001", "dev:BBB").await.unwrap();
        let before = identity.list_aliases(10).await.unwrap();

        for _ in 0..3 {
            let replay = identity.handle_device_alias("SN-001", "dev:BBB").await.unwrap();
            assert!(!replay.is_new_device);
            assert!(!replay.is_swap);
            assert_eq!(replay.old_device_uid, None);
        }

        assert_eq!(identity.list_aliases(10).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_uid_cannot_move_to_another_serial() {
        let identity = identity_with_clock(Arc::new(InMemoryAliasStore::new()), &fast_config());

        identity.handle_device_alias("SN-001", "dev:AAA").await.unwrap();
        identity.handle_device_alias("SN-001", "dev:BBB").await.unwrap();

        // Current on SN-001
        let err = identity.handle_device_alias("SN-002", "dev:BBB").await.unwrap_err();
        assert!(matches!(err, IdentityError::DeviceUidClaimed { ref serial_number, .. } if serial_number == "SN-001"));

        // Retired by SN-001
        let err = identity.handle_device_alias("SN-002", "dev:AAA").await.unwrap_err();
        assert!(matches!(err, IdentityError::DeviceUidClaimed { .. }));
        assert!(!err.is_transient());

        assert!(matches!(
            identity.resolve_device("SN-002").await,
            Err(IdentityError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_merge_folds_source_into_target() {
        let identity = identity_with_clock(Arc::new(InMemoryAliasStore::new()), &fast_config());

        identity.handle_device_alias("SN-001", "dev:AAA").await.unwrap();
        identity.handle_device_alias("SN-001", "dev:BBB").await.unwrap();
        identity.handle_device_alias("SN-002", "dev:CCC").await.unwrap();

        let merged = identity.merge_devices("SN-002", "SN-001").await.unwrap();
        assert_eq!(merged.device_uid, "dev:BBB");
        assert_eq!(merged.all_device_uids, vec!["dev:BBB", "dev:AAA", "dev:CCC"]);
        assert_eq!(merged.absorbed_device_uids, vec!["dev:CCC"]);
        assert!(!merged.already_merged);

        assert!(matches!(
            identity.resolve_device("SN-002").await,
            Err(IdentityError::NotFound(_))
        ));
        let via_source_uid = identity.resolve_device("dev:CCC").await.unwrap();
        assert_eq!(via_source_uid.serial_number, "SN-001");
        assert_eq!(via_source_uid.device_uid, "dev:BBB");

        let replay = identity.merge_devices("SN-002", "SN-001").await.unwrap();
        assert!(replay.already_merged);
        assert!(replay.absorbed_device_uids.is_empty());
        assert_eq!(replay.all_device_uids, merged.all_device_uids);

        let aliases = identity.list_aliases(10).await.unwrap();
        assert_eq!(aliases.len(), 1);
        assert_well_formed(&aliases[0]);
    }

    #[tokio::test]
    async fn test_merge_validation_errors() {
        let identity = identity_with_clock(Arc::new(InMemoryAliasStore::new()), &fast_config());
        identity.handle_device_alias("SN-001", "dev:AAA").await.unwrap();

        assert!(matches!(
            identity.merge_devices("SN-001", "SN-001").await,
            Err(IdentityError::MergeTargetEqualsSource(_))
        ));
        assert!(matches!(
            identity.merge_devices("SN-001", "SN-404").await,
            Err(IdentityError::MergeTargetNotFound(_))
        ));
        assert!(matches!(
            identity.merge_devices("SN-404", "SN-001").await,
            Err(IdentityError::MergeSourceNotFound(_))
        ));
        assert!(matches!(
            identity.handle_device_alias("  ", "dev:AAA").await,
            Err(IdentityError::InvalidIdentifier(_))
        ));

        // Nothing was written by the rejected calls
        let aliases = identity.list_aliases(10).await.unwrap();
        assert_eq!(aliases.len(), 1);
        assert_eq!(aliases[0].version, 1);
    }

    fn race_config() -> IdentityConfig {
        IdentityConfig {
            conflict_attempts: 64,
            ..fast_config()
        }
    }

    fn sqlite_identity(dir: &tempfile::TempDir, config: IdentityConfig) -> DeviceIdentity {
        let config = IdentityConfig {
            db_path: dir.path().join("fleetid.db").to_string_lossy().to_string(),
            ..config
        };
        DeviceIdentity::open_sqlite(&config).unwrap()
    }

    async fn assert_concurrent_swaps_keep_every_uid(identity: Arc<DeviceIdentity>) {
        let uids: Vec<String> = (0..16).map(|i| format!("dev:{:03}", i)).collect();

        let handles: Vec<_> = uids
            .iter()
            .cloned()
            .map(|uid| {
                let identity = Arc::clone(&identity);
                tokio::spawn(async move { identity.handle_device_alias("SN-RACE", &uid).await })
            })
            .collect();

        let mut new_devices = 0;
        for handle in handles {
            let outcome = handle.await.unwrap().unwrap();
            if outcome.is_new_device {
                new_devices += 1;
            }
        }
        assert_eq!(new_devices, 1);

        let resolved = identity.resolve_device("SN-RACE").await.unwrap();
        let seen: HashSet<String> = resolved.all_device_uids.iter().cloned().collect();
        let expected: HashSet<String> = uids.iter().cloned().collect();
        assert_eq!(seen, expected);

        let record = identity.resolver().get_alias_by_serial("SN-RACE").await.unwrap();
        assert_well_formed(&record);
        assert_eq!(record.previous_device_uids.len(), 15);
    }

    async fn assert_racing_serials_cannot_share_a_uid(identity: Arc<DeviceIdentity>) {
        let serials: Vec<String> = (0..8).map(|i| format!("SN-{}", i)).collect();

        let handles: Vec<_> = serials
            .iter()
            .cloned()
            .map(|serial| {
                let identity = Arc::clone(&identity);
                tokio::spawn(async move { identity.handle_device_alias(&serial, "dev:SHARED").await })
            })
            .collect();

        let mut ok = 0;
        let mut claimed = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(outcome) => {
                    assert!(outcome.is_new_device);
                    ok += 1;
                }
                Err(IdentityError::DeviceUidClaimed { .. }) => claimed += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!((ok, claimed), (1, 7));
        assert_eq!(identity.list_aliases(10).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_swaps_keep_every_uid() {
        let identity = Arc::new(DeviceIdentity::in_memory(&race_config()));
        assert_concurrent_swaps_keep_every_uid(identity).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_swaps_keep_every_uid_sqlite() {
        let dir = tempdir().unwrap();
        let identity = Arc::new(sqlite_identity(&dir, race_config()));
        assert_concurrent_swaps_keep_every_uid(identity).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_serials_cannot_share_a_uid() {
        let identity = Arc::new(DeviceIdentity::in_memory(&race_config()));
        assert_racing_serials_cannot_share_a_uid(identity).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_serials_cannot_share_a_uid_sqlite() {
        let dir = tempdir().unwrap();
        let identity = Arc::new(sqlite_identity(&dir, race_config()));
        assert_racing_serials_cannot_share_a_uid(identity).await;
    }

    /// Delegates to `inner`, but the first lookup of `trigger` also moves `owner`
    /// through `swaps` before the lookup result is handed back, so the caller acts on
    /// an ownership check that is already stale.
    struct SwapsDuringLookup {
        inner: Arc<dyn AliasStore>,
        trigger: String,
        owner: String,
        swaps: Vec<String>,
        armed: AtomicBool,
    }

    impl SwapsDuringLookup {
        async fn run_swaps(&self) {
            for (i, uid) in self.swaps.iter().enumerate() {
                let current = self.inner.get_by_serial(&self.owner).await.unwrap().unwrap();
                let updated = current.with_swap(uid, 1_800_000_000_000 + i as i64);
                assert_eq!(
                    self.inner.compare_and_swap(&current, &updated).await.unwrap(),
                    WriteOutcome::Applied
                );
            }
        }
    }

    #[async_trait]
    impl AliasStore for SwapsDuringLookup {
        async fn get_by_serial(&self, serial_number: &str) -> Result<Option<AliasRecord>, StoreError> {
            self.inner.get_by_serial(serial_number).await
        }

        async fn get_by_device_uid(&self, device_uid: &str) -> Result<Option<AliasRecord>, StoreError> {
            let seen = self.inner.get_by_device_uid(device_uid).await?;
            if device_uid == self.trigger && self.armed.swap(false, Ordering::SeqCst) {
                self.run_swaps().await;
            }
            Ok(seen)
        }

        async fn insert_if_absent(&self, record: &AliasRecord) -> Result<WriteOutcome, StoreError> {
            self.inner.insert_if_absent(record).await
        }

        async fn compare_and_swap(
            &self,
            expected: &AliasRecord,
            updated: &AliasRecord,
        ) -> Result<WriteOutcome, StoreError> {
            self.inner.compare_and_swap(expected, updated).await
        }

        async fn delete_merged(
            &self,
            expected: &AliasRecord,
            tombstone: &MergeTombstone,
        ) -> Result<WriteOutcome, StoreError> {
            self.inner.delete_merged(expected, tombstone).await
        }

        async fn get_tombstone(&self, source_serial: &str) -> Result<Option<MergeTombstone>, StoreError> {
            self.inner.get_tombstone(source_serial).await
        }

        async fn list(&self, limit: usize) -> Result<Vec<AliasRecord>, StoreError> {
            self.inner.list(limit).await
        }

        fn backend_type(&self) -> &'static str {
            self.inner.backend_type()
        }
    }

    fn swaps_during_lookup(inner: Arc<dyn AliasStore>, trigger: &str) -> Arc<SwapsDuringLookup> {
        Arc::new(SwapsDuringLookup {
            inner,
            trigger: trigger.to_string(),
            owner: "SN-001".to_string(),
            swaps: vec![trigger.to_string(), format!("{}-next", trigger)],
            armed: AtomicBool::new(true),
        })
    }

    /// SN-001 takes and then retires a UID between SN-002's ownership check and its write
    async fn assert_uid_retired_mid_claim_stays_put(inner: Arc<dyn AliasStore>) {
        let seed = identity_with_clock(Arc::clone(&inner), &fast_config());
        seed.handle_device_alias("SN-001", "dev:D0").await.unwrap();
        seed.handle_device_alias("SN-002", "dev:X").await.unwrap();

        // New serial claiming the UID (insert path)
        let store = swaps_during_lookup(Arc::clone(&inner), "dev:D");
        let identity = identity_with_clock(store, &fast_config());
        let err = identity.handle_device_alias("SN-003", "dev:D").await.unwrap_err();
        assert!(
            matches!(err, IdentityError::DeviceUidClaimed { ref serial_number, .. } if serial_number == "SN-001"),
            "unexpected result: {:?}",
            err
        );

        // Known serial swapping onto the UID (compare-and-swap path)
        let store = swaps_during_lookup(Arc::clone(&inner), "dev:F");
        let identity = identity_with_clock(store, &fast_config());
        let err = identity.handle_device_alias("SN-002", "dev:F").await.unwrap_err();
        assert!(matches!(err, IdentityError::DeviceUidClaimed { .. }), "unexpected result: {:?}", err);

        let owner = seed.resolver().get_alias_by_serial("SN-001").await.unwrap();
        assert_eq!(
            owner.all_device_uids(),
            vec!["dev:F-next", "dev:D0", "dev:D", "dev:D-next", "dev:F"]
        );
        for uid in ["dev:D", "dev:F"] {
            assert_eq!(seed.resolve_device(uid).await.unwrap().serial_number, "SN-001");
        }
        assert_eq!(seed.resolve_device("SN-002").await.unwrap().device_uid, "dev:X");
        assert!(matches!(
            seed.resolve_device("SN-003").await,
            Err(IdentityError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_uid_retired_mid_claim_stays_put() {
        assert_uid_retired_mid_claim_stays_put(Arc::new(InMemoryAliasStore::new())).await;
    }

    #[tokio::test]
    async fn test_uid_retired_mid_claim_stays_put_sqlite() {
        let dir = tempdir().unwrap();
        let store = SqliteAliasStore::open(dir.path().join("fleetid.db")).unwrap();
        assert_uid_retired_mid_claim_stays_put(Arc::new(store)).await;
    }

    #[tokio::test]
    async fn test_store_deadline_fires_while_database_is_locked() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("fleetid.db");
        let config = IdentityConfig {
            db_path: db_path.to_string_lossy().to_string(),
            store_timeout_ms: 50,
            ..fast_config()
        };
        let identity = DeviceIdentity::open_sqlite(&config).unwrap();
        identity.handle_device_alias("SN-001", "dev:AAA").await.unwrap();

        // Another process holding the write lock
        let holder = rusqlite::Connection::open(&db_path).unwrap();
        holder.execute_batch("BEGIN EXCLUSIVE").unwrap();

        let started = Instant::now();
        let err = identity.handle_device_alias("SN-001", "dev:BBB").await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(2), "took {:?}", started.elapsed());
        assert!(
            matches!(err, IdentityError::Timeout { operation: "compare_and_swap", .. }),
            "unexpected result: {:?}",
            err
        );
        assert!(err.is_transient());

        holder.execute_batch("ROLLBACK").unwrap();
    }

    /// Accepts inserts but loses every conditional update
    struct AlwaysConflicting {
        inner: InMemoryAliasStore,
    }

    #[async_trait]
    impl AliasStore for AlwaysConflicting {
        async fn get_by_serial(&self, serial_number: &str) -> Result<Option<AliasRecord>, StoreError> {
            self.inner.get_by_serial(serial_number).await
        }

        async fn get_by_device_uid(&self, device_uid: &str) -> Result<Option<AliasRecord>, StoreError> {
            self.inner.get_by_device_uid(device_uid).await
        }

        async fn insert_if_absent(&self, record: &AliasRecord) -> Result<WriteOutcome, StoreError> {
            self.inner.insert_if_absent(record).await
        }

        async fn compare_and_swap(
            &self,
            _expected: &AliasRecord,
            _updated: &AliasRecord,
        ) -> Result<WriteOutcome, StoreError> {
            Ok(WriteOutcome::Conflict)
        }

        async fn delete_merged(
            &self,
            _expected: &AliasRecord,
            _tombstone: &MergeTombstone,
        ) -> Result<WriteOutcome, StoreError> {
            Ok(WriteOutcome::Conflict)
        }

        async fn get_tombstone(&self, source_serial: &str) -> Result<Option<MergeTombstone>, StoreError> {
            self.inner.get_tombstone(source_serial).await
        }

        async fn list(&self, limit: usize) -> Result<Vec<AliasRecord>, StoreError> {
            self.inner.list(limit).await
        }

        fn backend_type(&self) -> &'static str {
            "always-conflicting"
        }
    }

    #[tokio::test]
    async fn test_conflicts_are_bounded() {
        let config = fast_config();
        let store = Arc::new(AlwaysConflicting {
            inner: InMemoryAliasStore::new(),
        });
        let identity = identity_with_clock(store, &config);

        identity.handle_device_alias("SN-001", "dev:AAA").await.unwrap();

        let err = identity.handle_device_alias("SN-001", "dev:BBB").await.unwrap_err();
        match &err {
            IdentityError::ConflictOnUpdate { serial_number, attempts } => {
                assert_eq!(serial_number, "SN-001");
                assert_eq!(*attempts, config.conflict_attempts);
            }
            other => panic!("expected ConflictOnUpdate, got {:?}", other),
        }
        assert!(err.is_transient());

        // The losing swap left the record untouched
        let resolved = identity.resolve_device("SN-001").await.unwrap();
        assert_eq!(resolved.all_device_uids, vec!["dev:AAA"]);
    }

    #[tokio::test]
    async fn test_ingestion_counts_transient_failures_separately() {
        let store = Arc::new(AlwaysConflicting {
            inner: InMemoryAliasStore::new(),
        });
        let detector = Arc::new(SwapDetector::new(store, &fast_config()));
        let (tx, rx) = mpsc::channel(8);
        let handle = tokio::spawn(start_alias_ingestion(rx, detector, None));

        for event in [
            DeviceEvent::new("SN-001", "dev:AAA"),
            DeviceEvent::new("SN-001", "dev:BBB"), // loses every update
            DeviceEvent::new("SN-002", "dev:AAA"), // owned by SN-001
        ] {
            tx.send(event).await.unwrap();
        }
        drop(tx);

        let stats = handle.await.unwrap();
        assert_eq!(stats.received, 3);
        assert_eq!(stats.new_devices, 1);
        assert_eq!(stats.failures, 2);
        assert_eq!(stats.transient_failures, 1);
    }

    #[tokio::test]
    async fn test_history_spans_merged_and_retired_uids() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("fleetid.db");
        let config = IdentityConfig {
            db_path: db_path.to_string_lossy().to_string(),
            ..fast_config()
        };

        let identity = DeviceIdentity::open_sqlite(&config).unwrap();
        let alerts = SqliteHistoryStore::open(&db_path, HistoryKind::Alert).unwrap();
        let journeys = alerts.for_kind(HistoryKind::Journey);

        identity.handle_device_alias("SN-001", "dev:AAA").await.unwrap();
        identity.handle_device_alias("SN-001", "dev:BBB").await.unwrap();
        identity.handle_device_alias("SN-002", "dev:CCC").await.unwrap();

        for entry in [
            alert("a-1", "dev:AAA", 100),
            alert("a-2", "dev:BBB", 300),
            alert("a-3", "dev:CCC", 200),
            alert("a-4", "dev:CCC", 300),
            alert("a-5", "dev:OTHER", 999),
        ] {
            assert!(alerts.append(&entry).unwrap());
        }
        // Redelivery of a stored record is ignored
        assert!(!alerts.append(&alert("a-1", "dev:AAA", 100)).unwrap());

        let before = identity.history("SN-001", &alerts, None).await.unwrap();
        let ids: Vec<_> = before.items.iter().map(|e| e.record_id.as_str()).collect();
        assert_eq!(ids, vec!["a-2", "a-1"]);

        identity.merge_devices("SN-002", "SN-001").await.unwrap();

        let after = identity.history("SN-001", &alerts, None).await.unwrap();
        assert_eq!(after.device_uids, vec!["dev:BBB", "dev:AAA", "dev:CCC"]);
        assert!(!after.degraded);
        let ids: Vec<_> = after.items.iter().map(|e| e.record_id.as_str()).collect();
        assert_eq!(ids, vec!["a-2", "a-4", "a-3", "a-1"]);

        let limited = identity.history("SN-001", &alerts, Some(2)).await.unwrap();
        let ids: Vec<_> = limited.items.iter().map(|e| e.record_id.as_str()).collect();
        assert_eq!(ids, vec!["a-2", "a-4"]);

        let empty = identity.history("SN-001", &journeys, None).await.unwrap();
        assert!(empty.items.is_empty());
        assert!(!empty.degraded);

        let unknown = identity.history("SN-404", &alerts, None).await.unwrap();
        assert!(unknown.device_uids.is_empty());
        assert!(unknown.items.is_empty());
    }

    #[tokio::test]
    async fn test_sqlite_state_survives_reopen() {
        let dir = tempdir().unwrap();
        let config = IdentityConfig {
            db_path: dir.path().join("nested/fleetid.db").to_string_lossy().to_string(),
            fanout_policy: FanoutPolicy::FailFast,
            ..fast_config()
        };

        {
            let identity = DeviceIdentity::open_sqlite(&config).unwrap();
            assert_eq!(identity.backend_type(), "SQLite");
            identity.handle_device_alias("SN-001", "dev:AAA").await.unwrap();
            identity.handle_device_alias("SN-001", "dev:BBB").await.unwrap();
            identity.handle_device_alias("SN-002", "dev:CCC").await.unwrap();
            identity.merge_devices("SN-002", "SN-001").await.unwrap();
        }

        let reopened = DeviceIdentity::open_sqlite(&config).unwrap();
        let resolved = reopened.resolve_device("dev:AAA").await.unwrap();
        assert_eq!(resolved.serial_number, "SN-001");
        assert_eq!(resolved.all_device_uids, vec!["dev:BBB", "dev:AAA", "dev:CCC"]);

        let replay = reopened.merge_devices("SN-002", "SN-001").await.unwrap();
        assert!(replay.already_merged);

        let again = reopened.handle_device_alias("SN-001", "dev:BBB").await.unwrap();
        assert!(!again.is_swap && !again.is_new_device);
    }
}
