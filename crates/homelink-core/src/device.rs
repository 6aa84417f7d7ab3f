//! Device identity, connection info and runtime state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Device identifier.
pub type DeviceId = String;

/// Connection info for a single device, resolved through the device
/// directory. Read-only to this core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Device ID
    pub device_id: DeviceId,
    /// LAN address, if the device has been seen locally
    pub local_ip: Option<String>,
    /// Per-device symmetric key for local payload encryption
    pub device_key: String,
    /// Whether the device supports the local transport at all
    pub local_capable: bool,
}

impl DeviceInfo {
    /// Create connection info for a device.
    pub fn new(device_id: impl Into<DeviceId>, device_key: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            local_ip: None,
            device_key: device_key.into(),
            local_capable: false,
        }
    }

    /// Set the LAN address.
    pub fn with_local_ip(mut self, ip: impl Into<String>) -> Self {
        self.local_ip = Some(ip.into());
        self
    }

    /// Mark the device as reachable over the local transport.
    pub fn with_local_capable(mut self, capable: bool) -> Self {
        self.local_capable = capable;
        self
    }
}

/// Mutable runtime state of one device, merged from inbound snapshots.
///
/// The state store is owned by the embedding application; this core only
/// merges fields into states that already exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceState {
    /// Device ID
    pub device_id: DeviceId,
    /// Whether the device is currently reachable
    pub online: bool,
    /// Last merged parameter set
    pub params: Map<String, Value>,
    /// Timestamp of the last merge
    pub updated_at: DateTime<Utc>,
}

impl DeviceState {
    /// Create an empty state for a device.
    pub fn new(device_id: impl Into<DeviceId>) -> Self {
        Self {
            device_id: device_id.into(),
            online: false,
            params: Map::new(),
            updated_at: Utc::now(),
        }
    }

    /// Merge a parameter object into the state, overwriting existing keys.
    ///
    /// Non-object snapshots are ignored; partial updates are the normal
    /// case, so keys absent from the snapshot are left untouched.
    pub fn merge_params(&mut self, params: &Value) {
        if let Some(incoming) = params.as_object() {
            for (key, value) in incoming {
                self.params.insert(key.clone(), value.clone());
            }
            self.updated_at = Utc::now();
        }
    }

    /// Read a single merged parameter.
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }
}
