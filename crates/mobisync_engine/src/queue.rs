//! Offline queue operations over the device registry.

use crate::error::{SyncError, SyncResult};
use crate::registry::{DeviceRegistry, DeviceSlot};
use mobisync_protocol::{DeviceId, OfflineOpId, OfflineOperation, OfflineQueueEntry};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

/// Per-device FIFO of mutations captured while the device is offline.
///
/// Queues live inside the registry's device slots; this type holds the queue
/// rules (size limit, lazy creation, drain gate).
#[derive(Debug)]
pub struct OfflineQueue {
    registry: Arc<DeviceRegistry>,
    default_limit: usize,
}

impl OfflineQueue {
    /// Creates a queue facade with the default per-device limit.
    pub fn new(registry: Arc<DeviceRegistry>, default_limit: usize) -> Self {
        Self {
            registry,
            default_limit,
        }
    }

    /// Appends an entry built from a freshly allocated entry ID.
    pub fn enqueue(
        &self,
        device_id: &DeviceId,
        build: impl FnOnce(OfflineOpId) -> OfflineOperation,
    ) -> SyncResult<OfflineOpId> {
        self.registry
            .with_slot(device_id, |slot| self.enqueue_locked(slot, build))?
    }

    /// Appends an entry to a slot that is already locked.
    pub(crate) fn enqueue_locked(
        &self,
        slot: &mut DeviceSlot,
        build: impl FnOnce(OfflineOpId) -> OfflineOperation,
    ) -> SyncResult<OfflineOpId> {
        let limit = slot
            .device
            .offline_settings
            .as_ref()
            .and_then(|settings| settings.max_queue_size)
            .unwrap_or(self.default_limit);

        let device_id = slot.device.device_id.clone();
        let queue = slot
            .queue
            .get_or_insert_with(|| OfflineQueueEntry::new(device_id.clone()));

        if queue.len() >= limit {
            warn!(device_id = %device_id, limit, "offline queue full, rejecting mutation");
            return Err(SyncError::QueueOverflow { device_id, limit });
        }

        let id = queue.allocate_id();
        let operation = build(id);
        queue.enqueue(operation)?;
        debug!(
            device_id = %device_id,
            entry = %id,
            queued = queue.len(),
            bytes = queue.total_bytes(),
            "mutation queued offline"
        );
        Ok(id)
    }

    /// Returns entries whose dependencies have all completed, in insertion order.
    pub fn peek_ready(&self, device_id: &DeviceId) -> SyncResult<Vec<OfflineOperation>> {
        self.registry.with_slot(device_id, |slot| {
            slot.queue
                .as_ref()
                .map(|queue| queue.peek_ready().into_iter().cloned().collect())
                .unwrap_or_default()
        })
    }

    /// Removes an entry whose replay completed, unblocking its dependents.
    pub fn complete(
        &self,
        device_id: &DeviceId,
        entry: OfflineOpId,
    ) -> SyncResult<Option<OfflineOperation>> {
        self.registry.with_slot(device_id, |slot| {
            slot.queue.as_mut().and_then(|queue| queue.complete(entry))
        })
    }

    /// Returns the queued entries that depend directly on `entry`.
    pub fn dependents(
        &self,
        device_id: &DeviceId,
        entry: OfflineOpId,
    ) -> SyncResult<Vec<OfflineOperation>> {
        self.registry.with_slot(device_id, |slot| {
            let Some(queue) = slot.queue.as_ref() else {
                return Vec::new();
            };
            queue
                .dependents(entry)
                .into_iter()
                .filter_map(|id| queue.get(id).cloned())
                .collect()
        })
    }

    /// Removes an entry without completing it.
    pub fn remove(
        &self,
        device_id: &DeviceId,
        entry: OfflineOpId,
    ) -> SyncResult<Option<OfflineOperation>> {
        self.registry.with_slot(device_id, |slot| {
            slot.queue.as_mut().and_then(|queue| queue.remove(entry))
        })
    }

    /// Returns a copy of the device's queue, if one was ever created.
    pub fn snapshot(&self, device_id: &DeviceId) -> SyncResult<Option<OfflineQueueEntry>> {
        self.registry
            .with_slot(device_id, |slot| slot.queue.clone())
    }

    /// Removes every entry and returns them in insertion order.
    ///
    /// The queue itself is kept.
    pub fn clear(&self, device_id: &DeviceId) -> SyncResult<Vec<OfflineOperation>> {
        self.registry.with_slot(device_id, |slot| {
            let Some(queue) = slot.queue.as_mut() else {
                return Vec::new();
            };
            let dropped: Vec<_> = queue.iter().cloned().collect();
            queue.clear();
            dropped
        })
    }

    /// Marks a drain as running for the device.
    ///
    /// Fails with `DrainInProgress` if one is already running. The flag is
    /// cleared when the returned guard is dropped.
    pub fn begin_drain(&self, device_id: &DeviceId) -> SyncResult<DrainGuard> {
        let slot = self.registry.slot(device_id)?;
        {
            let mut guard = slot.lock();
            if guard.draining {
                return Err(SyncError::DrainInProgress(device_id.clone()));
            }
            guard.draining = true;
        }
        Ok(DrainGuard { slot })
    }

    /// Returns true if a drain is running for the device.
    pub fn is_draining(&self, device_id: &DeviceId) -> SyncResult<bool> {
        self.registry.with_slot(device_id, |slot| slot.draining)
    }
}

/// Clears a device's drain flag when dropped.
#[derive(Debug)]
pub struct DrainGuard {
    slot: Arc<Mutex<DeviceSlot>>,
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        self.slot.lock().draining = false;
    }
}
