//! Inbound message decoding, correlation and state merging.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use homelink_codec::EncryptedPayload;
use homelink_core::{CorrelationTable, DeviceDirectory, DeviceId, SnapshotCache};

use crate::state::StateRegistry;

/// Push message arriving over the cloud channel.
///
/// One wire shape covers both command acknowledgments (sequence + error)
/// and state push updates (device id + params); either half may be absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudMessage {
    /// Correlation sequence, present on acknowledgments
    #[serde(default)]
    pub sequence: Option<u64>,
    /// Device the message concerns
    #[serde(default)]
    pub device_id: Option<DeviceId>,
    /// Device-reported error code; 0 is success
    #[serde(default)]
    pub error: Option<i64>,
    /// State snapshot parameters
    #[serde(default)]
    pub params: Option<Value>,
}

/// Reply to a command sent over the local transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalResponse {
    /// Echoed correlation sequence, a string on the local wire
    #[serde(default)]
    pub sequence: Option<String>,
    /// Device-reported error code; 0 is success
    #[serde(default)]
    pub error: i64,
}

/// State announcement from local discovery.
///
/// The announce record is size-limited, so state arrives split across up
/// to four `data` fragments, with an `iv` field when encrypted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalAnnounce {
    /// Announcing device
    pub device_id: DeviceId,
    /// Announce sequence, if the device correlates one
    #[serde(default)]
    pub sequence: Option<u64>,
    /// Whether the payload fragments are encrypted
    #[serde(default)]
    pub encrypted: bool,
    /// Payload fragments
    #[serde(flatten)]
    pub payload: EncryptedPayload,
}

/// One device entry in a bulk-refresh response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotEntry {
    /// Device ID
    pub device_id: DeviceId,
    /// Reachability as reported by the refresh endpoint
    #[serde(default)]
    pub online: Option<bool>,
    /// State snapshot parameters
    #[serde(default)]
    pub params: Value,
}

/// State snapshot routed into the merge path.
enum SnapshotPayload<'a> {
    Plain(&'a Value),
    Encrypted(&'a EncryptedPayload),
}

/// Decodes responses from every transport and merges device state.
///
/// Entry points may be invoked concurrently from distinct transport
/// listener tasks; every state merge runs inside one critical section, so
/// partial merges to the same device never interleave.
pub struct InboundProcessor {
    correlation: Arc<CorrelationTable>,
    states: Arc<StateRegistry>,
    directory: Arc<dyn DeviceDirectory>,
    cache: Arc<dyn SnapshotCache>,
    merge_lock: Mutex<()>,
}

impl InboundProcessor {
    /// Create a processor over the shared correlation table, the state
    /// store and the external collaborators.
    pub fn new(
        correlation: Arc<CorrelationTable>,
        states: Arc<StateRegistry>,
        directory: Arc<dyn DeviceDirectory>,
        cache: Arc<dyn SnapshotCache>,
    ) -> Self {
        Self {
            correlation,
            states,
            directory,
            cache,
            merge_lock: Mutex::new(()),
        }
    }

    /// Handle a raw message from the cloud channel.
    pub async fn on_cloud_message(&self, raw: &str) {
        let msg: CloudMessage = match serde_json::from_str(raw) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("discarding malformed cloud message: {}", e);
                return;
            }
        };

        if let Some(error) = msg.error.filter(|&code| code != 0) {
            warn!(?msg.device_id, error, "cloud reported device error");
        }

        if let Some(sequence) = msg.sequence {
            if let Some(kind) = self.correlation.acknowledge(sequence) {
                debug!(sequence, kind, "cloud acknowledgment");
            }
        }

        if let (Some(device_id), Some(params)) = (msg.device_id, msg.params) {
            self.process_state(&device_id, SnapshotPayload::Plain(&params))
                .await;
        }
    }

    /// Handle a raw reply from a device's local endpoint.
    pub async fn on_local_response(&self, raw: &str) {
        let response: LocalResponse = match serde_json::from_str(raw) {
            Ok(response) => response,
            Err(e) => {
                warn!("discarding malformed local response: {}", e);
                return;
            }
        };

        let Some(sequence) = response
            .sequence
            .as_deref()
            .and_then(|s| s.parse::<u64>().ok())
        else {
            debug!("local response without usable sequence, ignoring");
            return;
        };

        if response.error != 0 {
            warn!(sequence, error = response.error, "device rejected command");
        }
        if let Some(kind) = self.correlation.acknowledge(sequence) {
            debug!(sequence, kind, "local acknowledgment");
        }
    }

    /// Handle a state announcement from local discovery.
    pub async fn on_local_announce(&self, event: &LocalAnnounce) {
        if let Some(sequence) = event.sequence {
            if let Some(kind) = self.correlation.acknowledge(sequence) {
                debug!(sequence, kind, "announce acknowledgment");
            }
        }

        if event.encrypted {
            self.process_state(&event.device_id, SnapshotPayload::Encrypted(&event.payload))
                .await;
            return;
        }

        // Unencrypted announces carry plain JSON, fragmented the same way.
        let raw = event.payload.joined_data();
        if raw.is_empty() {
            return;
        }
        match serde_json::from_str::<Value>(&raw) {
            Ok(params) => {
                self.process_state(&event.device_id, SnapshotPayload::Plain(&params))
                    .await;
            }
            Err(e) => {
                warn!(device_id = %event.device_id, "discarding malformed announce: {}", e);
            }
        }
    }

    /// Handle a raw bulk-refresh response.
    ///
    /// Devices with no known state are bootstrapped from the snapshot
    /// cache and registered before merging, so previously un-provisioned
    /// devices become usable immediately.
    pub async fn on_bulk_refresh(&self, raw: &str) {
        let entries: Vec<SnapshotEntry> = match serde_json::from_str(raw) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("discarding malformed bulk refresh payload: {}", e);
                return;
            }
        };

        for entry in entries {
            if !self.states.contains(&entry.device_id) {
                let seed = self.cache.get_or_create(&entry.device_id).await;
                self.states.insert(seed);
                debug!(device_id = %entry.device_id, "bootstrapped state for new device");
            }

            self.process_state(&entry.device_id, SnapshotPayload::Plain(&entry.params))
                .await;

            if entry.online == Some(false) {
                let _ = self.states.update(&entry.device_id, |state| {
                    state.online = false;
                });
            }
        }
    }

    /// Merge one snapshot into the device's state and notify its listener.
    ///
    /// All merges across all devices share one critical section, trading
    /// throughput for the guarantee that no two snapshots interleave their
    /// field writes on the same state object.
    async fn process_state(&self, device_id: &str, payload: SnapshotPayload<'_>) {
        let _merges = self.merge_lock.lock().await;

        // Unknown devices are not an error, just not yet represented.
        if !self.states.contains(device_id) {
            debug!(device_id, "ignoring state for unknown device");
            return;
        }

        let params = match payload {
            SnapshotPayload::Plain(params) => params.clone(),
            SnapshotPayload::Encrypted(encrypted) => {
                let Some(info) = self.directory.device_info(device_id) else {
                    warn!(device_id, "no key for encrypted state, dropping");
                    return;
                };
                let text = match homelink_codec::decrypt(encrypted, &info.device_key) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(device_id, "dropping undecryptable state: {}", e);
                        return;
                    }
                };
                match serde_json::from_str(&text) {
                    Ok(params) => params,
                    Err(e) => {
                        warn!(device_id, "decrypted state is not valid JSON: {}", e);
                        return;
                    }
                }
            }
        };

        let updated = self.states.update(device_id, |state| {
            state.merge_params(&params);
            state.online = true;
        });

        if let Some(state) = updated {
            if let Some(listener) = self.states.listener(device_id) {
                listener.state_changed(&state);
            }
        }
    }
}
