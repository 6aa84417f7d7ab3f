//! Collaborator traits implemented outside this core.
//!
//! Discovery, configuration loading and on-disk caching live in the
//! embedding application; the core consumes them through these seams.

use async_trait::async_trait;

use crate::device::{DeviceId, DeviceInfo, DeviceState};

/// Read-only lookup of per-device connection info.
pub trait DeviceDirectory: Send + Sync {
    /// Resolve connection info for a device, if it is known.
    fn device_info(&self, device_id: &str) -> Option<DeviceInfo>;
}

/// Sink receiving merged state updates for one device.
///
/// Listener absence is not an error; the state store remains authoritative
/// whether or not anyone is subscribed.
pub trait StateListener: Send + Sync {
    /// Called after a snapshot has been merged into the device's state.
    fn state_changed(&self, state: &DeviceState);
}

/// Opaque persistence used to bootstrap devices first seen in a bulk
/// refresh, so previously un-provisioned devices become usable at once.
#[async_trait]
pub trait SnapshotCache: Send + Sync {
    /// Fetch or create the cached snapshot for a device.
    async fn get_or_create(&self, device_id: &DeviceId) -> DeviceState;
}
