//! In-memory device state store and listener registry.

use std::sync::Arc;

use dashmap::DashMap;

use homelink_core::{DeviceId, DeviceState, StateListener};

/// Shared store of per-device runtime state.
///
/// The store is owned by the embedding application. The inbound processor
/// merges into states that already exist; the one bootstrap exception is
/// the bulk-refresh self-heal path, which registers a cached seed state
/// before merging.
#[derive(Default)]
pub struct StateRegistry {
    states: DashMap<DeviceId, DeviceState>,
    listeners: DashMap<DeviceId, Arc<dyn StateListener>>,
}

impl StateRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device state, replacing any previous one.
    pub fn insert(&self, state: DeviceState) {
        self.states.insert(state.device_id.clone(), state);
    }

    /// Copy out a device's current state.
    pub fn get(&self, device_id: &str) -> Option<DeviceState> {
        self.states.get(device_id).map(|state| state.clone())
    }

    /// Whether a device is represented.
    pub fn contains(&self, device_id: &str) -> bool {
        self.states.contains_key(device_id)
    }

    /// Remove a device's state.
    pub fn remove(&self, device_id: &str) {
        self.states.remove(device_id);
    }

    /// Number of represented devices.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Mutate a stored state in place, returning the updated copy.
    ///
    /// Returns `None` without calling `apply` when the device is unknown.
    pub fn update<F>(&self, device_id: &str, apply: F) -> Option<DeviceState>
    where
        F: FnOnce(&mut DeviceState),
    {
        let mut entry = self.states.get_mut(device_id)?;
        apply(entry.value_mut());
        Some(entry.clone())
    }

    /// Register the listener receiving state updates for a device.
    pub fn register_listener(&self, device_id: impl Into<DeviceId>, listener: Arc<dyn StateListener>) {
        self.listeners.insert(device_id.into(), listener);
    }

    /// Drop the listener for a device.
    pub fn unregister_listener(&self, device_id: &str) {
        self.listeners.remove(device_id);
    }

    /// Look up the listener for a device, if one is registered.
    pub fn listener(&self, device_id: &str) -> Option<Arc<dyn StateListener>> {
        self.listeners
            .get(device_id)
            .map(|listener| listener.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    struct Recording {
        seen: Mutex<Vec<DeviceId>>,
    }

    impl StateListener for Recording {
        fn state_changed(&self, state: &DeviceState) {
            self.seen.lock().unwrap().push(state.device_id.clone());
        }
    }

    #[test]
    fn test_insert_and_get() {
        let registry = StateRegistry::new();
        registry.insert(DeviceState::new("dev1"));

        assert!(registry.contains("dev1"));
        assert_eq!(registry.get("dev1").unwrap().device_id, "dev1");
        assert!(registry.get("dev2").is_none());
    }

    #[test]
    fn test_update_unknown_device_is_noop() {
        let registry = StateRegistry::new();
        let updated = registry.update("ghost", |state| {
            state.online = true;
        });
        assert!(updated.is_none());
    }

    #[test]
    fn test_update_returns_fresh_copy() {
        let registry = StateRegistry::new();
        registry.insert(DeviceState::new("dev1"));

        let updated = registry
            .update("dev1", |state| {
                state.merge_params(&json!({"switch": "on"}));
            })
            .unwrap();

        assert_eq!(updated.param("switch"), Some(&json!("on")));
        assert_eq!(registry.get("dev1").unwrap().param("switch"), Some(&json!("on")));
    }

    #[test]
    fn test_listener_registration_roundtrip() {
        let registry = StateRegistry::new();
        let listener = Arc::new(Recording {
            seen: Mutex::new(Vec::new()),
        });

        registry.register_listener("dev1", listener.clone());
        assert!(registry.listener("dev1").is_some());
        assert!(registry.listener("dev2").is_none());

        registry.unregister_listener("dev1");
        assert!(registry.listener("dev1").is_none());
    }
}
