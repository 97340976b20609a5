//! Notification records and push fan-out.

use crate::error::{SyncError, SyncResult};
use crate::registry::DeviceRegistry;
use async_trait::async_trait;
use mobisync_protocol::{DeviceId, Notification, NotificationId, UserId};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Delivers a notification payload to one device token.
#[async_trait]
pub trait PushSender: Send + Sync {
    /// Sends a notification to a push token.
    async fn send(&self, push_token: &str, notification: &Notification) -> SyncResult<()>;
}

/// Outcome of one fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Devices a delivery was attempted for.
    pub attempted: usize,
    /// Devices the sender accepted the notification for.
    pub delivered: usize,
    /// Devices whose delivery failed, with the error message.
    pub failures: Vec<(DeviceId, String)>,
}

#[derive(Debug, Default)]
struct Inbox {
    by_id: HashMap<NotificationId, Notification>,
    by_user: HashMap<UserId, Vec<NotificationId>>,
}

/// Stores notifications and fans them out to a user's devices.
///
/// Delivery is best-effort: each device gets one independent attempt and
/// failures are recorded, never retried.
pub struct NotificationDispatcher {
    registry: Arc<DeviceRegistry>,
    sender: Arc<dyn PushSender>,
    inbox: RwLock<Inbox>,
}

impl std::fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("stored", &self.inbox.read().by_id.len())
            .finish_non_exhaustive()
    }
}

impl NotificationDispatcher {
    /// Creates a dispatcher.
    pub fn new(registry: Arc<DeviceRegistry>, sender: Arc<dyn PushSender>) -> Self {
        Self {
            registry,
            sender,
            inbox: RwLock::new(Inbox::default()),
        }
    }

    /// Stores the notification and sends it to every device of its user that
    /// holds a push token.
    pub async fn notify(&self, notification: Notification) -> DeliveryReport {
        {
            let mut inbox = self.inbox.write();
            inbox
                .by_user
                .entry(notification.user_id.clone())
                .or_default()
                .push(notification.id);
            inbox.by_id.insert(notification.id, notification.clone());
        }

        let mut report = DeliveryReport::default();
        for device in self.registry.devices_for_user(&notification.user_id) {
            let Some(token) = device.push_token.as_deref().filter(|t| !t.is_empty()) else {
                continue;
            };

            report.attempted += 1;
            match self.sender.send(token, &notification).await {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    let err = SyncError::NotificationDelivery {
                        device_id: device.device_id.clone(),
                        message: err.to_string(),
                    };
                    warn!(notification = %notification.id, error = %err, "push delivery failed");
                    report.failures.push((device.device_id, err.to_string()));
                }
            }
        }

        debug!(
            notification = %notification.id,
            user_id = %notification.user_id,
            attempted = report.attempted,
            delivered = report.delivered,
            "notification dispatched"
        );
        report
    }

    /// Returns a user's notifications, oldest first.
    pub fn notifications_for_user(&self, user_id: &UserId) -> Vec<Notification> {
        let inbox = self.inbox.read();
        inbox
            .by_user
            .get(user_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inbox.by_id.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Marks a notification as read.
    pub fn mark_read(&self, id: NotificationId) -> SyncResult<()> {
        let mut inbox = self.inbox.write();
        let notification = inbox
            .by_id
            .get_mut(&id)
            .ok_or(SyncError::NotificationNotFound(id))?;
        notification.read = true;
        Ok(())
    }
}

/// One push recorded by [`MemoryPushSender`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentPush {
    /// Target token.
    pub push_token: String,
    /// Notification that was sent.
    pub notification: Notification,
}

/// A push sender that records deliveries in memory.
#[derive(Debug, Default)]
pub struct MemoryPushSender {
    sent: Mutex<Vec<SentPush>>,
    failing: Mutex<HashSet<String>>,
}

impl MemoryPushSender {
    /// Creates a sender that accepts every push.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every send to `token` fail.
    pub fn fail_token(&self, token: impl Into<String>) {
        self.failing.lock().insert(token.into());
    }

    /// Returns every accepted push.
    pub fn sent(&self) -> Vec<SentPush> {
        self.sent.lock().clone()
    }

    /// Returns accepted pushes for one token.
    pub fn sent_to(&self, token: &str) -> Vec<Notification> {
        self.sent
            .lock()
            .iter()
            .filter(|push| push.push_token == token)
            .map(|push| push.notification.clone())
            .collect()
    }
}

#[async_trait]
impl PushSender for MemoryPushSender {
    async fn send(&self, push_token: &str, notification: &Notification) -> SyncResult<()> {
        if self.failing.lock().contains(push_token) {
            return Err(SyncError::transport_fatal(format!(
                "token {push_token} rejected"
            )));
        }
        self.sent.lock().push(SentPush {
            push_token: push_token.to_string(),
            notification: notification.clone(),
        });
        Ok(())
    }
}
