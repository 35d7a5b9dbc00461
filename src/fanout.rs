//! Fan-out query aggregator
//!
//! Answers "all history of serial S" against stores keyed by device UID:
//!
//! ```text
//! serial → Resolver → [uid_1 .. uid_n] → n store queries in flight → merge → sort → truncate
//! ```
//!
//! All per-UID queries are issued at once and each runs under its own deadline.
//! How much they actually overlap is up to the store: `SqliteHistoryStore` serves
//! them one at a time over its single connection.
//!
//! Per-UID queries complete in arbitrary order; the merged result is always sorted
//! by descending event time, ties broken by ascending record id.

use crate::alias::error::{IdentityError, StoreError};
use crate::alias::resolver::Resolver;
use crate::config::IdentityConfig;
use async_trait::async_trait;
use futures::future::join_all;
use std::str::FromStr;
use std::time::Duration;

/// Behaviour when one of several per-UID queries fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanoutPolicy {
    /// Return the healthy shards' items and flag the result as degraded
    Partial,
    /// Fail the whole aggregate on the first shard error
    FailFast,
}

impl FanoutPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FanoutPolicy::Partial => "partial",
            FanoutPolicy::FailFast => "fail_fast",
        }
    }
}

impl FromStr for FanoutPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "partial" => Ok(FanoutPolicy::Partial),
            "fail_fast" | "fail-fast" | "failfast" => Ok(FanoutPolicy::FailFast),
            other => Err(format!(
                "FANOUT_POLICY must be 'partial' or 'fail_fast', got '{}'",
                other
            )),
        }
    }
}

/// Items that can be merged across shards into one ordered view
pub trait TimeOrdered {
    fn event_time(&self) -> i64;
    fn record_id(&self) -> &str;
}

/// A store whose records are keyed by device UID
#[async_trait]
pub trait DeviceHistoryStore: Send + Sync {
    type Item: TimeOrdered + Send;

    /// Newest first, at most `limit` items
    async fn query_by_device_uid(
        &self,
        device_uid: &str,
        limit: usize,
    ) -> Result<Vec<Self::Item>, StoreError>;

    fn store_name(&self) -> &'static str;
}

#[derive(Debug, Clone, PartialEq)]
pub struct FanoutResult<T> {
    pub serial_number: String,
    /// UIDs queried, current first
    pub device_uids: Vec<String>,
    pub items: Vec<T>,
    /// True when at least one shard failed and its items are missing
    pub degraded: bool,
    pub failed_device_uids: Vec<String>,
}

impl<T> FanoutResult<T> {
    fn empty(serial_number: &str, device_uids: Vec<String>) -> Self {
        Self {
            serial_number: serial_number.to_string(),
            device_uids,
            items: Vec::new(),
            degraded: false,
            failed_device_uids: Vec::new(),
        }
    }
}

/// Deterministic merge order: newest first, then record id
pub fn sort_newest_first<T: TimeOrdered>(items: &mut [T]) {
    items.sort_by(|a, b| {
        b.event_time()
            .cmp(&a.event_time())
            .then_with(|| a.record_id().cmp(b.record_id()))
    });
}

#[derive(Clone)]
pub struct FanoutAggregator {
    resolver: Resolver,
    policy: FanoutPolicy,
    timeout: Duration,
    default_limit: usize,
}

impl FanoutAggregator {
    pub fn new(resolver: Resolver, config: &IdentityConfig) -> Self {
        Self {
            resolver,
            policy: config.fanout_policy,
            timeout: config.store_timeout(),
            default_limit: config.fanout_default_limit,
        }
    }

    pub fn with_policy(mut self, policy: FanoutPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> FanoutPolicy {
        self.policy
    }

    /// Query `store` once per UID of `serial_number` and merge the results
    ///
    /// An unknown serial yields an empty, non-degraded result. Under
    /// `FanoutPolicy::Partial` the call still fails if every shard failed.
    pub async fn query<S>(
        &self,
        serial_number: &str,
        store: &S,
        limit: Option<usize>,
    ) -> Result<FanoutResult<S::Item>, IdentityError>
    where
        S: DeviceHistoryStore + ?Sized,
    {
        let limit = limit.unwrap_or(self.default_limit);
        let device_uids = self
            .resolver
            .get_all_device_uids_for_serial(serial_number)
            .await?;

        if device_uids.is_empty() || limit == 0 {
            return Ok(FanoutResult::empty(serial_number, device_uids));
        }

        let timeout = self.timeout;
        let shard_futures: Vec<_> = device_uids
            .iter()
            .map(|uid| async move {
                let outcome =
                    match tokio::time::timeout(timeout, store.query_by_device_uid(uid, limit)).await {
                        Ok(result) => result,
                        Err(_) => Err(StoreError::Timeout(timeout)),
                    };
                (uid, outcome)
            })
            .collect();

        let shard_results = join_all(shard_futures).await;

        let mut items = Vec::new();
        let mut failed_device_uids = Vec::new();
        let mut last_failure = None;

        for (uid, outcome) in shard_results {
            match outcome {
                Ok(batch) => items.extend(batch),
                Err(e) => match self.policy {
                    FanoutPolicy::FailFast => {
                        log::error!(
                            "❌ {} query for {} ({}) failed: {}",
                            store.store_name(),
                            serial_number,
                            uid,
                            e
                        );
                        return Err(IdentityError::FanoutShard {
                            device_uid: uid.clone(),
                            source: e,
                        });
                    }
                    FanoutPolicy::Partial => {
                        log::warn!(
                            "⚠️  {} query for {} ({}) failed, returning partial result: {}",
                            store.store_name(),
                            serial_number,
                            uid,
                            e
                        );
                        failed_device_uids.push(uid.clone());
                        last_failure = Some((uid.clone(), e));
                    }
                },
            }
        }

        if failed_device_uids.len() == device_uids.len() {
            if let Some((device_uid, source)) = last_failure {
                return Err(IdentityError::FanoutShard { device_uid, source });
            }
        }

        sort_newest_first(&mut items);
        items.truncate(limit);

        log::debug!(
            "{} fan-out for {}: {} UIDs, {} items, {} failed",
            store.store_name(),
            serial_number,
            device_uids.len(),
            items.len(),
            failed_device_uids.len()
        );

        Ok(FanoutResult {
            serial_number: serial_number.to_string(),
            device_uids,
            items,
            degraded: !failed_device_uids.is_empty(),
            failed_device_uids,
        })
    }
}
