//! Device history records (alerts, commands, journeys, locations)
//!
//! Keyed by device UID, never by serial number. Reads for a serial number go
//! through `fanout::FanoutAggregator`, which expands the serial to every UID it
//! has ever had. Merges never rewrite these rows.

pub mod sqlite_store;
pub mod types;

pub use sqlite_store::SqliteHistoryStore;
pub use types::{HistoryEntry, HistoryKind};
