//! Device registry.
//!
//! Every device lives in its own slot behind its own lock. The slot also owns
//! the device's offline queue and drain flag, so "is the device online" and
//! "park the mutation" are decided under one lock acquisition.

use crate::error::{SyncError, SyncResult};
use mobisync_protocol::{
    Device, DeviceId, DeviceInfo, OfflineQueueEntry, OfflineSettings, Platform, UserId,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Per-device state guarded by one lock.
#[derive(Debug)]
pub(crate) struct DeviceSlot {
    pub(crate) device: Device,
    pub(crate) queue: Option<OfflineQueueEntry>,
    pub(crate) draining: bool,
}

impl DeviceSlot {
    fn queue_len(&self) -> usize {
        self.queue.as_ref().map_or(0, OfflineQueueEntry::len)
    }
}

/// Outcome of a registration.
#[derive(Debug, Clone)]
pub struct Registration {
    /// The stored device record.
    pub device: Device,
    /// True on first registration, false when an existing record was updated.
    pub created: bool,
}

/// Outcome of a connectivity change.
#[derive(Debug, Clone)]
pub struct ConnectivityChange {
    /// The device after the change.
    pub device: Device,
    /// True if the device went from offline to online.
    pub reconnected: bool,
    /// True if the offline queue should now be drained.
    pub drain_requested: bool,
}

/// Owns device identity, connectivity and preferences.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    slots: RwLock<HashMap<DeviceId, Arc<Mutex<DeviceSlot>>>>,
}

impl DeviceRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a device, or updates it if the ID is already known.
    pub fn register(&self, platform: Platform, user_id: UserId, info: DeviceInfo) -> Registration {
        let mut slots = self.slots.write();

        if let Some(slot) = slots.get(&info.device_id) {
            let mut slot = slot.lock();
            slot.device.reregister(platform, user_id, info);
            debug!(device_id = %slot.device.device_id, "device re-registered");
            return Registration {
                device: slot.device.clone(),
                created: false,
            };
        }

        let device = Device::register(platform, user_id, info);
        info!(
            device_id = %device.device_id,
            user_id = %device.user_id,
            platform = device.platform.as_str(),
            "device registered"
        );
        slots.insert(
            device.device_id.clone(),
            Arc::new(Mutex::new(DeviceSlot {
                device: device.clone(),
                queue: None,
                draining: false,
            })),
        );

        Registration {
            device,
            created: true,
        }
    }

    /// Returns a device.
    pub fn get(&self, device_id: &DeviceId) -> SyncResult<Device> {
        self.with_slot(device_id, |slot| slot.device.clone())
    }

    /// Returns true if the device is registered.
    pub fn contains(&self, device_id: &DeviceId) -> bool {
        self.slots.read().contains_key(device_id)
    }

    /// Returns all devices of a user, ordered by device ID.
    pub fn devices_for_user(&self, user_id: &UserId) -> Vec<Device> {
        let slots: Vec<_> = self.slots.read().values().cloned().collect();
        let mut devices: Vec<Device> = slots
            .iter()
            .map(|slot| slot.lock().device.clone())
            .filter(|device| &device.user_id == user_id)
            .collect();
        devices.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        devices
    }

    /// Returns the number of registered devices.
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    /// Returns true if no device is registered.
    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    /// Sets the online flag.
    pub fn set_online(&self, device_id: &DeviceId, online: bool) -> SyncResult<ConnectivityChange> {
        self.with_slot(device_id, |slot| {
            let was_online = slot.device.online;
            slot.device.online = online;
            slot.device.last_seen = mobisync_protocol::now_millis();

            let reconnected = !was_online && online;
            let drain_requested =
                reconnected && slot.queue_len() > 0 && slot.device.drains_on_reconnect();

            if was_online != online {
                info!(
                    device_id = %device_id,
                    online,
                    queued = slot.queue_len(),
                    "device connectivity changed"
                );
            }

            ConnectivityChange {
                device: slot.device.clone(),
                reconnected,
                drain_requested,
            }
        })
    }

    /// Enables offline mode with the given settings.
    ///
    /// Returns the device and whether offline mode was newly enabled.
    pub fn enable_offline_mode(
        &self,
        device_id: &DeviceId,
        settings: OfflineSettings,
    ) -> SyncResult<(Device, bool)> {
        self.with_slot(device_id, |slot| {
            let newly_enabled = !slot.device.preferences.offline_mode;
            slot.device.preferences.offline_mode = true;
            slot.device.offline_settings = Some(settings);
            (slot.device.clone(), newly_enabled)
        })
    }

    /// Runs `f` with the device's slot locked.
    pub(crate) fn with_slot<R>(
        &self,
        device_id: &DeviceId,
        f: impl FnOnce(&mut DeviceSlot) -> R,
    ) -> SyncResult<R> {
        let slot = self.slot(device_id)?;
        let mut guard = slot.lock();
        Ok(f(&mut guard))
    }

    /// Returns the shared slot of a device.
    pub(crate) fn slot(&self, device_id: &DeviceId) -> SyncResult<Arc<Mutex<DeviceSlot>>> {
        self.slots
            .read()
            .get(device_id)
            .cloned()
            .ok_or_else(|| SyncError::DeviceNotFound(device_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mobisync_protocol::{OfflineOperation, OperationId, OperationKind, Priority};

    fn device_id(id: &str) -> DeviceId {
        DeviceId::new(id).unwrap()
    }

    fn user_id(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    #[test]
    fn register_is_idempotent() {
        let registry = DeviceRegistry::new();
        let first = registry.register(Platform::Ios, user_id("u1"), DeviceInfo::new(device_id("d1")));
        assert!(first.created);

        let second = registry.register(
            Platform::Ios,
            user_id("u1"),
            DeviceInfo::new(device_id("d1")).with_push_token("tok"),
        );
        assert!(!second.created);
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.get(&device_id("d1")).unwrap().push_token.as_deref(),
            Some("tok")
        );
    }

    #[test]
    fn unknown_device_is_an_error() {
        let registry = DeviceRegistry::new();
        assert_eq!(
            registry.get(&device_id("nope")).unwrap_err(),
            SyncError::DeviceNotFound(device_id("nope"))
        );
        assert!(registry.set_online(&device_id("nope"), true).is_err());
    }

    #[test]
    fn devices_for_user_filters_and_sorts() {
        let registry = DeviceRegistry::new();
        registry.register(Platform::Ios, user_id("u1"), DeviceInfo::new(device_id("b")));
        registry.register(Platform::Web, user_id("u2"), DeviceInfo::new(device_id("c")));
        registry.register(Platform::Android, user_id("u1"), DeviceInfo::new(device_id("a")));

        let ids: Vec<_> = registry
            .devices_for_user(&user_id("u1"))
            .into_iter()
            .map(|d| d.device_id.to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(registry.devices_for_user(&user_id("u3")).is_empty());
    }

    #[test]
    fn reconnect_requests_drain_only_with_queued_work() {
        let registry = DeviceRegistry::new();
        let id = device_id("d1");
        registry.register(
            Platform::Ios,
            user_id("u1"),
            DeviceInfo::new(id.clone()).with_online(false),
        );

        let change = registry.set_online(&id, true).unwrap();
        assert!(change.reconnected);
        assert!(!change.drain_requested);

        registry.set_online(&id, false).unwrap();
        registry
            .with_slot(&id, |slot| {
                let queue = slot.queue.get_or_insert_with(|| OfflineQueueEntry::new(id.clone()));
                let entry = queue.allocate_id();
                queue
                    .enqueue(OfflineOperation {
                        id: entry,
                        kind: OperationKind::Update,
                        data_type: "character".into(),
                        data_id: "c1".into(),
                        data: None,
                        priority: Priority::Medium,
                        timestamp: 0,
                        dependencies: vec![],
                        origin: OperationId(1),
                    })
                    .unwrap();
            })
            .unwrap();

        let change = registry.set_online(&id, true).unwrap();
        assert!(change.drain_requested);

        // Already online: no transition, no drain.
        let change = registry.set_online(&id, true).unwrap();
        assert!(!change.reconnected);
        assert!(!change.drain_requested);
    }

    #[test]
    fn enable_offline_mode_reports_first_enable() {
        let registry = DeviceRegistry::new();
        let id = device_id("d1");
        registry.register(
            Platform::Ios,
            user_id("u1"),
            DeviceInfo::new(id.clone()).with_online(false),
        );
        let (device, newly_enabled) = registry
            .enable_offline_mode(
                &id,
                OfflineSettings {
                    max_queue_size: Some(2),
                    sync_on_reconnect: false,
                },
            )
            .unwrap();
        assert!(newly_enabled);
        assert!(device.preferences.offline_mode);

        let (_, newly_enabled) = registry
            .enable_offline_mode(&id, OfflineSettings::default())
            .unwrap();
        assert!(!newly_enabled);
    }
}
