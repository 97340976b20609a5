//! Notification records.

use crate::ids::{now_millis, NotificationId, UserId};
use serde::{Deserialize, Serialize};

/// Category of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    /// A sync operation completed.
    SyncComplete,
    /// A sync operation failed permanently or needs review.
    SyncError,
    /// Device-level or administrative event.
    System,
    /// Reminder for the user.
    Reminder,
}

/// Delivery priority of a notification.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPriority {
    /// Informational.
    Low,
    /// Default.
    #[default]
    Normal,
    /// Needs attention.
    High,
}

/// A notification addressed to a user.
///
/// Immutable once created except for `read`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Notification ID.
    pub id: NotificationId,
    /// Recipient.
    pub user_id: UserId,
    /// Category.
    #[serde(rename = "type")]
    pub kind: NotificationType,
    /// Short title.
    pub title: String,
    /// Body text.
    pub message: String,
    /// Priority.
    pub priority: NotificationPriority,
    /// Whether the user has read it.
    pub read: bool,
    /// Optional structured data (JSON-encoded by convention).
    pub data: Option<String>,
    /// Creation time (ms since epoch).
    pub created_at: u64,
}

impl Notification {
    /// Creates an unread notification.
    pub fn new(
        user_id: UserId,
        kind: NotificationType,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: NotificationId::new_v4(),
            user_id,
            kind,
            title: title.into(),
            message: message.into(),
            priority: NotificationPriority::Normal,
            read: false,
            data: None,
            created_at: now_millis(),
        }
    }

    /// Sets the priority.
    pub fn with_priority(mut self, priority: NotificationPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Attaches structured data.
    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_notification_is_unread() {
        let n = Notification::new(
            UserId::new("u1").unwrap(),
            NotificationType::SyncComplete,
            "Sync complete",
            "project p1 uploaded",
        )
        .with_priority(NotificationPriority::Low)
        .with_data("{\"operation\":1}");

        assert!(!n.read);
        assert_eq!(n.priority, NotificationPriority::Low);
        assert_eq!(n.data.as_deref(), Some("{\"operation\":1}"));
    }

    #[test]
    fn type_field_is_renamed() {
        let n = Notification::new(
            UserId::new("u1").unwrap(),
            NotificationType::SyncError,
            "t",
            "m",
        );
        let json = serde_json::to_string(&n).unwrap();
        assert!(json.contains("\"type\":\"sync_error\""));
    }
}
