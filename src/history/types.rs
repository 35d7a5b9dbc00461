use crate::fanout::TimeOrdered;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Identifier-keyed record families that need fan-out by serial number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    Alert,
    Command,
    Journey,
    Location,
}

impl HistoryKind {
    pub const ALL: [HistoryKind; 4] = [
        HistoryKind::Alert,
        HistoryKind::Command,
        HistoryKind::Journey,
        HistoryKind::Location,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryKind::Alert => "alert",
            HistoryKind::Command => "command",
            HistoryKind::Journey => "journey",
            HistoryKind::Location => "location",
        }
    }
}

impl FromStr for HistoryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().trim_end_matches('s') {
            "alert" => Ok(HistoryKind::Alert),
            "command" => Ok(HistoryKind::Command),
            "journey" => Ok(HistoryKind::Journey),
            "location" => Ok(HistoryKind::Location),
            other => Err(format!("Unknown history kind: {}", other)),
        }
    }
}

impl std::fmt::Display for HistoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One stored record, keyed by the device UID that produced it
///
/// `payload` is opaque here; its schema belongs to the owning subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub kind: HistoryKind,
    pub record_id: String,
    pub device_uid: String,
    /// Unix milliseconds
    pub event_time: i64,
    pub payload: serde_json::Value,
}

impl TimeOrdered for HistoryEntry {
    fn event_time(&self) -> i64 {
        self.event_time
    }

    fn record_id(&self) -> &str {
        &self.record_id
    }
}
