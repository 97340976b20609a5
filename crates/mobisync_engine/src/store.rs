//! Logical operation table.

use crate::error::{SyncError, SyncResult};
use mobisync_protocol::{DeviceId, OfflineOpId, OperationId, SyncOperation, SyncStatus};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Default)]
struct Tables {
    operations: HashMap<OperationId, SyncOperation>,
    by_device: HashMap<DeviceId, BTreeSet<OperationId>>,
    payloads: HashMap<OperationId, Vec<u8>>,
}

/// Operations keyed by ID with a secondary index by device.
///
/// Payloads are held separately and released once an operation is terminal.
#[derive(Debug, Default)]
pub struct OperationStore {
    tables: RwLock<Tables>,
}

impl OperationStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new operation and its payload.
    pub fn insert(&self, operation: SyncOperation, payload: Option<Vec<u8>>) {
        let mut tables = self.tables.write();
        let id = operation.id;
        tables
            .by_device
            .entry(operation.device_id.clone())
            .or_default()
            .insert(id);
        if let Some(payload) = payload {
            tables.payloads.insert(id, payload);
        }
        tables.operations.insert(id, operation);
    }

    /// Returns a copy of an operation.
    pub fn get(&self, id: OperationId) -> SyncResult<SyncOperation> {
        self.tables
            .read()
            .operations
            .get(&id)
            .cloned()
            .ok_or(SyncError::OperationNotFound(id))
    }

    /// Lists operations ordered by ID, optionally for one device.
    pub fn list(&self, device_id: Option<&DeviceId>) -> Vec<SyncOperation> {
        let tables = self.tables.read();
        match device_id {
            Some(device_id) => tables
                .by_device
                .get(device_id)
                .map(|ids| {
                    ids.iter()
                        .filter_map(|id| tables.operations.get(id).cloned())
                        .collect()
                })
                .unwrap_or_default(),
            None => {
                let mut all: Vec<_> = tables.operations.values().cloned().collect();
                all.sort_by_key(|op| op.id);
                all
            }
        }
    }

    /// Applies `f` to an operation and returns its result.
    pub fn update<R>(
        &self,
        id: OperationId,
        f: impl FnOnce(&mut SyncOperation) -> R,
    ) -> SyncResult<R> {
        let mut tables = self.tables.write();
        let operation = tables
            .operations
            .get_mut(&id)
            .ok_or(SyncError::OperationNotFound(id))?;
        Ok(f(operation))
    }

    /// Moves an operation into `InProgress` for a transfer attempt.
    ///
    /// Returns the operation and its payload, or `None` if the operation is
    /// cancelled, terminal or parked offline.
    pub fn begin_attempt(
        &self,
        id: OperationId,
    ) -> SyncResult<Option<(SyncOperation, Option<Vec<u8>>)>> {
        let mut tables = self.tables.write();
        let operation = tables
            .operations
            .get_mut(&id)
            .ok_or(SyncError::OperationNotFound(id))?;
        if !is_runnable(operation) {
            return Ok(None);
        }

        operation.mark_in_progress();
        let snapshot = operation.clone();
        let payload = tables.payloads.get(&id).cloned();
        Ok(Some((snapshot, payload)))
    }

    /// Parks a runnable operation into the offline queue.
    ///
    /// `enqueue` receives the operation and its payload and returns the
    /// entry it was parked as. On success the payload moves to the entry and
    /// the parked operation is returned; `None` means the operation was not
    /// runnable.
    pub fn park(
        &self,
        id: OperationId,
        enqueue: impl FnOnce(&SyncOperation, Option<Vec<u8>>) -> SyncResult<OfflineOpId>,
    ) -> SyncResult<Option<SyncOperation>> {
        let mut tables = self.tables.write();
        let payload = tables.payloads.get(&id).cloned();
        let operation = tables
            .operations
            .get_mut(&id)
            .ok_or(SyncError::OperationNotFound(id))?;
        if !is_runnable(operation) {
            return Ok(None);
        }

        let entry = enqueue(operation, payload)?;
        operation.next_retry_at = None;
        operation.mark_queued(entry);
        let parked = operation.clone();
        tables.payloads.remove(&id);
        Ok(Some(parked))
    }

    /// Fails a runnable operation for good without attempting a transfer.
    ///
    /// Returns the failed operation, or `None` if it was not runnable.
    pub fn abandon(
        &self,
        id: OperationId,
        error: impl Into<String>,
    ) -> SyncResult<Option<SyncOperation>> {
        self.update(id, |operation| {
            if !is_runnable(operation) {
                return None;
            }
            operation.next_retry_at = None;
            operation.mark_failed(error);
            Some(operation.clone())
        })
    }

    /// Drops the payload of an operation.
    pub fn release_payload(&self, id: OperationId) {
        self.tables.write().payloads.remove(&id);
    }

    /// Returns the number of stored operations.
    pub fn len(&self) -> usize {
        self.tables.read().operations.len()
    }

    /// Returns true if no operation is stored.
    pub fn is_empty(&self) -> bool {
        self.tables.read().operations.is_empty()
    }
}

/// Pending operations and failed ones awaiting a retry may start a transfer.
fn is_runnable(operation: &SyncOperation) -> bool {
    match operation.status {
        SyncStatus::Pending => true,
        SyncStatus::Failed => !operation.is_terminal() && !operation.is_queued(),
        SyncStatus::InProgress | SyncStatus::Completed | SyncStatus::Cancelled => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mobisync_protocol::{now_millis, OperationKind, Priority, UserId};

    fn make_op(id: u64, device: &str) -> SyncOperation {
        SyncOperation::new(
            OperationId(id),
            DeviceId::new(device).unwrap(),
            UserId::new("u1").unwrap(),
            OperationKind::Upload,
            "project",
            format!("p{id}"),
            2,
            Priority::Medium,
        )
    }

    #[test]
    fn list_by_device_is_ordered() {
        let store = OperationStore::new();
        store.insert(make_op(3, "a"), None);
        store.insert(make_op(1, "a"), None);
        store.insert(make_op(2, "b"), None);

        let ids: Vec<_> = store
            .list(Some(&DeviceId::new("a").unwrap()))
            .iter()
            .map(|op| op.id.0)
            .collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(store.list(None).len(), 3);
        assert!(store.list(Some(&DeviceId::new("zz").unwrap())).is_empty());
    }

    #[test]
    fn begin_attempt_hands_out_payload() {
        let store = OperationStore::new();
        store.insert(make_op(1, "a"), Some(vec![9, 9]));

        let (op, payload) = store.begin_attempt(OperationId(1)).unwrap().unwrap();
        assert_eq!(op.status, SyncStatus::InProgress);
        assert_eq!(payload, Some(vec![9, 9]));

        // Already in progress.
        assert!(store.begin_attempt(OperationId(1)).unwrap().is_none());
    }

    #[test]
    fn begin_attempt_skips_cancelled_and_parked() {
        let store = OperationStore::new();
        let mut cancelled = make_op(1, "a");
        cancelled.mark_cancelled();
        store.insert(cancelled, None);

        let mut parked = make_op(2, "a");
        parked.mark_queued(OfflineOpId(1));
        store.insert(parked, None);

        let mut retrying = make_op(3, "a");
        retrying.mark_failed("reset");
        retrying.next_retry_at = Some(now_millis());
        store.insert(retrying, None);

        assert!(store.begin_attempt(OperationId(1)).unwrap().is_none());
        assert!(store.begin_attempt(OperationId(2)).unwrap().is_none());
        assert!(store.begin_attempt(OperationId(3)).unwrap().is_some());
    }

    #[test]
    fn park_moves_payload_to_entry() {
        let store = OperationStore::new();
        let mut retrying = make_op(1, "a");
        retrying.mark_failed("reset");
        retrying.next_retry_at = Some(now_millis());
        store.insert(retrying, Some(vec![7, 7]));

        let mut handed_over = None;
        let parked = store
            .park(OperationId(1), |_, payload| {
                handed_over = payload;
                Ok(OfflineOpId(5))
            })
            .unwrap()
            .unwrap();

        assert_eq!(handed_over, Some(vec![7, 7]));
        assert_eq!(parked.queued_as, Some(OfflineOpId(5)));
        assert!(parked.next_retry_at.is_none());
        assert!(!parked.is_terminal());
        assert!(store.begin_attempt(OperationId(1)).unwrap().is_none());
    }

    #[test]
    fn failed_park_leaves_operation_untouched() {
        let store = OperationStore::new();
        store.insert(make_op(1, "a"), Some(vec![1]));

        let err = store
            .park(OperationId(1), |_, _| Err(SyncError::InvalidInput("full".into())))
            .unwrap_err();
        assert_eq!(err, SyncError::InvalidInput("full".into()));

        let (op, payload) = store.begin_attempt(OperationId(1)).unwrap().unwrap();
        assert!(op.queued_as.is_none());
        assert_eq!(payload, Some(vec![1]));
    }

    #[test]
    fn abandon_fails_only_runnable_operations() {
        let store = OperationStore::new();
        store.insert(make_op(1, "a"), None);
        let mut done = make_op(2, "a");
        done.mark_completed();
        store.insert(done, None);

        let failed = store.abandon(OperationId(1), "offline").unwrap().unwrap();
        assert_eq!(failed.status, SyncStatus::Failed);
        assert!(failed.is_terminal());
        assert!(store.abandon(OperationId(2), "offline").unwrap().is_none());
    }

    #[test]
    fn missing_operation() {
        let store = OperationStore::new();
        assert_eq!(
            store.get(OperationId(4)).unwrap_err(),
            SyncError::OperationNotFound(OperationId(4))
        );
        assert!(store.update(OperationId(4), |_| ()).is_err());
    }

    #[test]
    fn release_payload() {
        let store = OperationStore::new();
        store.insert(make_op(1, "a"), Some(vec![1]));
        store.release_payload(OperationId(1));
        let (_, payload) = store.begin_attempt(OperationId(1)).unwrap().unwrap();
        assert!(payload.is_none());
    }
}
