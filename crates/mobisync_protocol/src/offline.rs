//! Per-device offline queue.

use crate::error::{ProtocolError, ProtocolResult};
use crate::ids::{now_millis, DeviceId, OfflineOpId, OperationId};
use crate::operation::{OperationKind, Priority};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};

/// A mutation captured while its device was offline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineOperation {
    /// Entry ID, unique within the device's queue.
    pub id: OfflineOpId,
    /// Mutation kind.
    pub kind: OperationKind,
    /// Opaque entity type tag.
    pub data_type: String,
    /// Opaque entity identifier.
    pub data_id: String,
    /// Opaque payload.
    pub data: Option<Vec<u8>>,
    /// Priority carried over to the replayed operation.
    pub priority: Priority,
    /// Capture time (ms since epoch).
    pub timestamp: u64,
    /// Entries of the same queue that must complete first.
    pub dependencies: Vec<OfflineOpId>,
    /// The operation that was parked into this entry.
    pub origin: OperationId,
}

impl OfflineOperation {
    /// Returns the payload size in bytes.
    pub fn payload_size(&self) -> u64 {
        self.data.as_ref().map(|d| d.len() as u64).unwrap_or(0)
    }
}

/// The ordered backlog of one device.
///
/// # Invariants
///
/// - Entries are kept in insertion order
/// - The queue only shrinks through `complete`, `remove` or `clear`
/// - An entry is ready only when every dependency has completed; a dependency
///   that was removed without completing keeps its dependents blocked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineQueueEntry {
    /// Owning device.
    pub device_id: DeviceId,
    /// Pending entries in insertion order.
    operations: VecDeque<OfflineOperation>,
    /// Next entry ID.
    next_id: u64,
    /// Running payload byte total.
    total_bytes: u64,
    /// Entries that left the queue by completing.
    completed: BTreeSet<OfflineOpId>,
    /// Creation time (ms since epoch).
    pub created_at: u64,
}

impl OfflineQueueEntry {
    /// Creates an empty queue for a device.
    pub fn new(device_id: DeviceId) -> Self {
        Self {
            device_id,
            operations: VecDeque::new(),
            next_id: 1,
            total_bytes: 0,
            completed: BTreeSet::new(),
            created_at: now_millis(),
        }
    }

    /// Reserves the ID for the next entry.
    pub fn allocate_id(&mut self) -> OfflineOpId {
        let id = OfflineOpId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Appends an entry.
    ///
    /// Every dependency must be queued or already completed.
    pub fn enqueue(&mut self, operation: OfflineOperation) -> ProtocolResult<()> {
        if let Some(dep) = operation
            .dependencies
            .iter()
            .find(|dep| !self.contains(**dep) && !self.is_completed(**dep))
        {
            return Err(ProtocolError::InvalidDependency {
                id: operation.id.0,
                dependency: dep.0,
            });
        }

        self.next_id = self.next_id.max(operation.id.0 + 1);
        self.total_bytes += operation.payload_size();
        self.operations.push_back(operation);
        Ok(())
    }

    /// Returns true if every dependency of the entry has completed.
    pub fn is_ready(&self, operation: &OfflineOperation) -> bool {
        operation
            .dependencies
            .iter()
            .all(|dep| self.completed.contains(dep))
    }

    /// Returns true if the entry left the queue by completing.
    pub fn is_completed(&self, id: OfflineOpId) -> bool {
        self.completed.contains(&id)
    }

    /// Returns the queued entries that depend directly on `id`.
    pub fn dependents(&self, id: OfflineOpId) -> Vec<OfflineOpId> {
        self.operations
            .iter()
            .filter(|op| op.dependencies.contains(&id))
            .map(|op| op.id)
            .collect()
    }

    /// Returns ready entries in insertion order.
    pub fn peek_ready(&self) -> Vec<&OfflineOperation> {
        self.operations.iter().filter(|op| self.is_ready(op)).collect()
    }

    /// Removes an entry that was replayed successfully and unblocks its
    /// dependents.
    pub fn complete(&mut self, id: OfflineOpId) -> Option<OfflineOperation> {
        let removed = self.remove(id)?;
        self.completed.insert(id);
        Some(removed)
    }

    /// Removes an entry without completing it.
    pub fn remove(&mut self, id: OfflineOpId) -> Option<OfflineOperation> {
        let index = self.operations.iter().position(|op| op.id == id)?;
        let removed = self.operations.remove(index)?;
        self.total_bytes = self.total_bytes.saturating_sub(removed.payload_size());
        Some(removed)
    }

    /// Removes all entries, returning how many were dropped.
    pub fn clear(&mut self) -> usize {
        let count = self.operations.len();
        self.operations.clear();
        self.total_bytes = 0;
        count
    }

    /// Returns the entry with the given ID.
    pub fn get(&self, id: OfflineOpId) -> Option<&OfflineOperation> {
        self.operations.iter().find(|op| op.id == id)
    }

    /// Returns true if an entry with the given ID is queued.
    pub fn contains(&self, id: OfflineOpId) -> bool {
        self.operations.iter().any(|op| op.id == id)
    }

    /// Returns all entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &OfflineOperation> {
        self.operations.iter()
    }

    /// Returns the number of queued entries.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Returns the total payload bytes queued.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }
}
