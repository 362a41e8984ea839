//! JSON payloads exchanged with the fleet backend.
//!
//! Field names follow the backend contract exactly; everything on the wire is
//! a UTF-8 JSON object.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Response on the token-creation accepted topic.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    #[serde(rename = "certificateOwnershipToken")]
    pub certificate_ownership_token: String,
}

/// Request published to the registration topic.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrationRequest {
    pub parameters: RegistrationParameters,
    #[serde(rename = "certificateOwnershipToken")]
    pub certificate_ownership_token: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistrationParameters {
    #[serde(rename = "SerialNumber")]
    pub serial_number: String,
    #[serde(rename = "ThingName")]
    pub thing_name: String,
}

/// Response on the registration accepted topic. The backend may include the
/// name it actually assigned.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationResponse {
    #[serde(rename = "thingName")]
    pub thing_name: Option<String>,
}

/// Liveness message published under the device namespace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Heartbeat {
    pub device_id: String,
    /// Unix seconds at publish time.
    pub timestamp: u64,
    /// Loop sequence number; `-1` for manual one-shots.
    pub count: i64,
    pub status: String,
    #[serde(rename = "type")]
    pub kind: HeartbeatKind,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HeartbeatKind {
    Automatic,
    Manual,
}

impl Heartbeat {
    pub fn automatic(device_id: &str, timestamp: u64, count: u64) -> Self {
        Self {
            device_id: device_id.to_string(),
            timestamp,
            count: count as i64,
            status: "active".into(),
            kind: HeartbeatKind::Automatic,
        }
    }

    pub fn manual(device_id: &str, timestamp: u64) -> Self {
        Self {
            device_id: device_id.to_string(),
            timestamp,
            count: -1,
            status: "active".into(),
            kind: HeartbeatKind::Manual,
        }
    }
}

/// Stamp a `timestamp` field with `now` when it is absent or numerically zero.
/// Every other field, and any already-set timestamp, passes through untouched.
pub fn stamp_timestamp(payload: &mut Value, now: u64) {
    if let Some(obj) = payload.as_object_mut() {
        let needs_stamp = match obj.get("timestamp") {
            None => true,
            Some(value) => value.as_f64() == Some(0.0),
        };
        if needs_stamp {
            obj.insert("timestamp".into(), Value::from(now));
        }
    }
}
