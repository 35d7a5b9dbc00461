pub mod event;
pub mod ingestion;

pub use event::DeviceEvent;
pub use ingestion::{process_event, start_alias_ingestion, EventDisposition, IdentitySignal, IngestStats};
