//! Sync operations.

use crate::conflict::Winner;
use crate::ids::{now_millis, DeviceId, OfflineOpId, OperationId, UserId};
use serde::{Deserialize, Serialize};

/// Direction or effect of a sync operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Device sends a new entity to the backend.
    Upload,
    /// Device fetches an entity from the backend.
    Download,
    /// Device deletes an entity.
    Delete,
    /// Device modifies an existing entity.
    Update,
}

impl OperationKind {
    /// Returns the lowercase kind name.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Upload => "upload",
            OperationKind::Download => "download",
            OperationKind::Delete => "delete",
            OperationKind::Update => "update",
        }
    }

    /// Returns true if a transfer of this kind can reveal a version conflict.
    pub fn may_conflict(&self) -> bool {
        matches!(self, OperationKind::Update | OperationKind::Download)
    }
}

/// Scheduling priority.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Background work.
    Low,
    /// Default priority.
    #[default]
    Medium,
    /// User-visible work.
    High,
    /// Must go out first.
    Urgent,
}

/// Lifecycle state of a sync operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Created, not yet attempted.
    Pending,
    /// Transfer is running.
    InProgress,
    /// Transfer succeeded.
    Completed,
    /// Last attempt failed; may still have a retry scheduled.
    Failed,
    /// Cancelled on request.
    Cancelled,
}

impl SyncStatus {
    /// Returns the snake_case status name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::InProgress => "in_progress",
            SyncStatus::Completed => "completed",
            SyncStatus::Failed => "failed",
            SyncStatus::Cancelled => "cancelled",
        }
    }
}

/// One attempted transfer of one entity between a device and the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOperation {
    /// Operation ID.
    pub id: OperationId,
    /// Device the operation belongs to.
    pub device_id: DeviceId,
    /// Owner of the device.
    pub user_id: UserId,
    /// Kind of mutation.
    pub kind: OperationKind,
    /// Opaque entity type tag.
    pub data_type: String,
    /// Opaque entity identifier.
    pub data_id: String,
    /// Payload size in bytes.
    pub payload_size: u64,
    /// Bytes transferred so far.
    pub transferred_size: u64,
    /// Current status.
    pub status: SyncStatus,
    /// Progress percentage, 0..=100.
    pub progress: u8,
    /// Number of failed transfer attempts.
    pub retry_count: u32,
    /// Priority.
    pub priority: Priority,
    /// Last error, if any.
    pub error: Option<String>,
    /// Creation time (ms since epoch).
    pub created_at: u64,
    /// Last transition time (ms since epoch).
    pub updated_at: u64,
    /// Offline queue entry holding this mutation while the device is offline.
    pub queued_as: Option<OfflineOpId>,
    /// Offline queue entry this operation replays.
    pub replay_of: Option<OfflineOpId>,
    /// Replay whose outcome settled this parked operation.
    pub replayed_by: Option<OperationId>,
    /// When the scheduled retry fires (ms since epoch).
    pub next_retry_at: Option<u64>,
    /// A conflict was found that needs a human decision.
    pub needs_review: bool,
    /// How a conflict was resolved, if one occurred.
    pub resolution: Option<Winner>,
}

impl SyncOperation {
    /// Creates a new pending operation.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: OperationId,
        device_id: DeviceId,
        user_id: UserId,
        kind: OperationKind,
        data_type: impl Into<String>,
        data_id: impl Into<String>,
        payload_size: u64,
        priority: Priority,
    ) -> Self {
        let now = now_millis();
        Self {
            id,
            device_id,
            user_id,
            kind,
            data_type: data_type.into(),
            data_id: data_id.into(),
            payload_size,
            transferred_size: 0,
            status: SyncStatus::Pending,
            progress: 0,
            retry_count: 0,
            priority,
            error: None,
            created_at: now,
            updated_at: now,
            queued_as: None,
            replay_of: None,
            replayed_by: None,
            next_retry_at: None,
            needs_review: false,
            resolution: None,
        }
    }

    /// Returns true if the mutation was parked in the offline queue.
    pub fn is_queued(&self) -> bool {
        self.queued_as.is_some()
    }

    /// Returns true if no further automatic transition will happen.
    ///
    /// A failed operation is terminal once it has no retry scheduled and was
    /// not parked in the offline queue.
    pub fn is_terminal(&self) -> bool {
        match self.status {
            SyncStatus::Completed | SyncStatus::Cancelled => true,
            SyncStatus::Failed => !self.is_queued() && self.next_retry_at.is_none(),
            SyncStatus::Pending | SyncStatus::InProgress => false,
        }
    }

    /// Transitions to `InProgress`.
    pub fn mark_in_progress(&mut self) {
        self.status = SyncStatus::InProgress;
        self.next_retry_at = None;
        self.touch();
    }

    /// Transitions to `Completed`.
    pub fn mark_completed(&mut self) {
        self.status = SyncStatus::Completed;
        self.progress = 100;
        self.transferred_size = self.payload_size;
        self.error = None;
        self.next_retry_at = None;
        self.touch();
    }

    /// Transitions to `Failed` with the given error.
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = SyncStatus::Failed;
        self.progress = self.progress.min(99);
        self.error = Some(error.into());
        self.touch();
    }

    /// Transitions to `Failed` because the device is offline.
    pub fn mark_queued(&mut self, entry: OfflineOpId) {
        self.queued_as = Some(entry);
        self.mark_failed("device offline");
    }

    /// Settles a parked operation with the terminal outcome of its replay.
    pub fn settle_with_replay(&mut self, replay: &SyncOperation) {
        self.replayed_by = Some(replay.id);
        self.status = replay.status;
        self.progress = replay.progress;
        self.transferred_size = replay.transferred_size;
        self.error = replay.error.clone();
        self.resolution = replay.resolution;
        self.next_retry_at = None;
        self.touch();
    }

    /// Transitions to `Cancelled`.
    pub fn mark_cancelled(&mut self) {
        self.status = SyncStatus::Cancelled;
        self.progress = self.progress.min(99);
        self.next_retry_at = None;
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = now_millis();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_op() -> SyncOperation {
        SyncOperation::new(
            OperationId(1),
            DeviceId::new("d1").unwrap(),
            UserId::new("u1").unwrap(),
            OperationKind::Upload,
            "project",
            "p1",
            1024,
            Priority::Medium,
        )
    }

    #[test]
    fn new_operation_is_pending() {
        let op = make_op();
        assert_eq!(op.status, SyncStatus::Pending);
        assert_eq!(op.progress, 0);
        assert!(!op.is_terminal());
        assert!(!op.is_queued());
    }

    #[test]
    fn completion_sets_progress_and_size() {
        let mut op = make_op();
        op.mark_in_progress();
        op.mark_completed();

        assert_eq!(op.status, SyncStatus::Completed);
        assert_eq!(op.progress, 100);
        assert_eq!(op.transferred_size, 1024);
        assert!(op.is_terminal());
    }

    #[test]
    fn failed_with_pending_retry_is_not_terminal() {
        let mut op = make_op();
        op.mark_failed("connection reset");
        op.next_retry_at = Some(now_millis() + 1000);
        assert!(!op.is_terminal());

        op.next_retry_at = None;
        assert!(op.is_terminal());
    }

    #[test]
    fn queued_operation_is_failed_but_not_terminal() {
        let mut op = make_op();
        op.mark_queued(OfflineOpId(4));

        assert_eq!(op.status, SyncStatus::Failed);
        assert_eq!(op.error.as_deref(), Some("device offline"));
        assert!(op.is_queued());
        assert!(!op.is_terminal());
    }

    #[test]
    fn parked_operation_settles_with_its_replay() {
        let mut parked = make_op();
        parked.mark_queued(OfflineOpId(1));

        let mut replay = make_op();
        replay.id = OperationId(2);
        replay.replay_of = Some(OfflineOpId(1));
        replay.mark_in_progress();
        replay.mark_completed();

        parked.settle_with_replay(&replay);
        assert_eq!(parked.status, SyncStatus::Completed);
        assert_eq!(parked.replayed_by, Some(OperationId(2)));
        assert_eq!(parked.progress, 100);
        assert!(parked.is_queued());
        assert!(parked.is_terminal());
    }

    #[test]
    fn progress_never_reaches_100_outside_completed() {
        let mut op = make_op();
        op.progress = 100;
        op.mark_failed("boom");
        assert_eq!(op.progress, 99);

        op.progress = 100;
        op.mark_cancelled();
        assert_eq!(op.progress, 99);
    }

    #[test]
    fn kinds_and_priorities() {
        assert!(OperationKind::Update.may_conflict());
        assert!(OperationKind::Download.may_conflict());
        assert!(!OperationKind::Upload.may_conflict());
        assert!(!OperationKind::Delete.may_conflict());

        assert!(Priority::Urgent > Priority::High);
        assert!(Priority::Low < Priority::Medium);
        assert_eq!(Priority::default(), Priority::Medium);
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&SyncStatus::InProgress).unwrap(),
            format!("\"{}\"", SyncStatus::InProgress.as_str())
        );
    }
}
