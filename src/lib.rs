//! fleetid - stable device identity across connectivity-module swaps
//!
//! Serial numbers are the external identity of a unit. Device UIDs are assigned by
//! the device-management platform and change whenever the module is replaced.
//! Every other subsystem keys its records by device UID, so this crate keeps the
//! serial → UID history and provides the fan-out read that reassembles a serial
//! number's complete history.

pub mod alias;
pub mod config;
pub mod fanout;
pub mod history;
pub mod identity;
pub mod ingest;
pub mod retry;
pub mod sqlite_pragma;

pub use alias::{AliasOutcome, AliasRecord, AliasStore, IdentityError, MergeResult, ResolvedDevice, StoreError};
pub use config::IdentityConfig;
pub use fanout::{DeviceHistoryStore, FanoutAggregator, FanoutPolicy, FanoutResult, TimeOrdered};
pub use identity::DeviceIdentity;
