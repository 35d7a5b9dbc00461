//! Inbound device event envelope
//!
//! Only the identity fields are interpreted. Note bodies (track, alert, command
//! acknowledgements) pass through untouched.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEvent {
    /// Serial number printed on the unit
    #[serde(default, alias = "sn")]
    pub serial_number: Option<String>,

    /// Platform-assigned device UID of the installed module
    #[serde(default, alias = "device")]
    pub device_uid: Option<String>,

    #[serde(default, alias = "event")]
    pub event_uid: Option<String>,

    /// Note file the event arrived on, e.g. `track.qo`
    #[serde(default)]
    pub file: Option<String>,

    /// Unix seconds as reported by the device
    #[serde(default)]
    pub when: Option<i64>,

    #[serde(default)]
    pub body: serde_json::Value,
}

impl DeviceEvent {
    pub fn new(serial_number: &str, device_uid: &str) -> Self {
        Self {
            serial_number: Some(serial_number.to_string()),
            device_uid: Some(device_uid.to_string()),
            event_uid: None,
            file: None,
            when: None,
            body: serde_json::Value::Null,
        }
    }

    pub fn from_jsonl(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }

    /// `(serial_number, device_uid)` when both are present and non-blank
    pub fn alias_pair(&self) -> Option<(&str, &str)> {
        let serial = self.serial_number.as_deref().map(str::trim)?;
        let uid = self.device_uid.as_deref().map(str::trim)?;
        if serial.is_empty() || uid.is_empty() {
            return None;
        }
        Some((serial, uid))
    }
}
