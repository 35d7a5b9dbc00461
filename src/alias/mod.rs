//! Device alias core - serial number <-> device UID reconciliation
//!
//! A unit's serial number is stable; its device UID changes whenever the
//! connectivity module is replaced. Everything downstream is keyed by device UID,
//! so this module keeps the full UID history per serial number.
//!
//! # Architecture
//!
//! ```text
//! inbound event (serial, uid) → SwapDetector ──┐
//!                                              ├→ AliasStore (memory | SQLite)
//! admin merge  → MergeOperator ────────────────┤
//!                                              │
//! API handlers → Resolver ─────────────────────┘ → UID set → fan-out
//! ```

pub mod error;
pub mod memory_store;
pub mod merge;
pub mod resolver;
pub mod sqlite_store;
pub mod store;
pub mod swap;
pub mod types;

pub use error::{IdentityError, StoreError};
pub use memory_store::InMemoryAliasStore;
pub use merge::MergeOperator;
pub use resolver::Resolver;
pub use sqlite_store::SqliteAliasStore;
pub use store::AliasStore;
pub use swap::SwapDetector;
pub use types::{AliasOutcome, AliasRecord, MergeResult, MergeTombstone, ResolvedDevice, WriteOutcome};
