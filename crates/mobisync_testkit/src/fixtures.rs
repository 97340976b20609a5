//! Test fixtures and engine helpers.
//!
//! Provides a ready-wired engine with in-memory collaborators and
//! convenience functions for common test scenarios.

use async_trait::async_trait;
use mobisync_engine::{
    MemoryMetrics, MemoryPushSender, MockTransport, RetryConfig, SyncConfig, SyncEngine,
    SyncError, SyncRequest, SyncResult, TransferReceipt, Transport,
};
use mobisync_protocol::{
    DeviceId, DeviceInfo, Notification, NotificationType, OperationKind, Platform, SyncOperation,
    UserId,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Parses a device ID, panicking on invalid input.
pub fn device_id(id: &str) -> DeviceId {
    DeviceId::new(id).expect("valid device id")
}

/// Parses a user ID, panicking on invalid input.
pub fn user_id(id: &str) -> UserId {
    UserId::new(id).expect("valid user id")
}

/// Configuration with jitter off, a 5 s base delay and no background drain.
///
/// Intended for `#[tokio::test(start_paused = true)]`.
pub fn test_config(max_retries: u32) -> SyncConfig {
    SyncConfig::new()
        .with_retry(
            RetryConfig::new(max_retries)
                .with_initial_delay(Duration::from_secs(5))
                .with_max_delay(Duration::from_secs(60))
                .with_jitter(false),
        )
        .with_drain_on_reconnect(false)
}

/// An upload request with a zeroed payload of `size` bytes.
pub fn upload(device: &DeviceId, data_type: &str, data_id: &str, size: usize) -> SyncRequest {
    SyncRequest::new(device.clone(), data_type, OperationKind::Upload, data_id)
        .with_payload(vec![0u8; size])
}

/// An update request with a small JSON payload.
pub fn update(device: &DeviceId, data_type: &str, data_id: &str) -> SyncRequest {
    SyncRequest::new(device.clone(), data_type, OperationKind::Update, data_id)
        .with_payload(format!(r#"{{"id":"{data_id}"}}"#).into_bytes())
}

/// An engine wired to in-memory collaborators.
pub struct TestEngine {
    /// The engine.
    pub engine: SyncEngine,
    /// Scripted transport.
    pub transport: Arc<MockTransport>,
    /// Recording push sender.
    pub push: Arc<MemoryPushSender>,
    /// Recording metrics collector.
    pub metrics: Arc<MemoryMetrics>,
}

impl TestEngine {
    /// Creates an engine whose transport always succeeds.
    pub fn new(config: SyncConfig) -> Self {
        Self::with_transport(config, Arc::new(MockTransport::new()))
    }

    /// Creates an engine around the given mock transport.
    pub fn with_transport(config: SyncConfig, transport: Arc<MockTransport>) -> Self {
        let push = Arc::new(MemoryPushSender::new());
        let metrics = Arc::new(MemoryMetrics::new());
        let engine = SyncEngine::builder(transport.clone(), push.clone())
            .with_config(config)
            .with_metrics(metrics.clone())
            .build();
        Self {
            engine,
            transport,
            push,
            metrics,
        }
    }

    /// Registers a device for `user` with push token `tok-<id>`.
    pub async fn device(&self, id: &str, user: &str, online: bool) -> DeviceId {
        let id = device_id(id);
        self.engine
            .register_device(
                Platform::Ios,
                user_id(user),
                DeviceInfo::new(id.clone())
                    .with_push_token(format!("tok-{id}"))
                    .with_online(online),
            )
            .await;
        id
    }

    /// Registers a device without a push token.
    pub async fn silent_device(&self, id: &str, user: &str, online: bool) -> DeviceId {
        let id = device_id(id);
        self.engine
            .register_device(
                Platform::Web,
                user_id(user),
                DeviceInfo::new(id.clone()).with_online(online),
            )
            .await;
        id
    }

    /// Starts a sync and waits for it to be terminal or parked.
    pub async fn sync_to_end(&self, request: SyncRequest) -> SyncResult<SyncOperation> {
        let op = self.engine.start_sync(request).await?;
        self.engine.wait_for_terminal(op.id).await
    }

    /// Returns every pushed notification of one kind.
    pub fn pushed(&self, kind: NotificationType) -> Vec<Notification> {
        self.push
            .sent()
            .into_iter()
            .map(|push| push.notification)
            .filter(|n| n.kind == kind)
            .collect()
    }

    /// Returns the stored notifications of one kind for a user.
    pub fn stored(&self, user: &str, kind: NotificationType) -> Vec<Notification> {
        self.engine
            .notifications_for_user(&user_id(user))
            .into_iter()
            .filter(|n| n.kind == kind)
            .collect()
    }
}

/// A transport that fails for selected entity IDs and records the order of
/// every transfer.
#[derive(Debug, Default)]
pub struct SelectiveTransport {
    failing: Mutex<HashSet<String>>,
    order: Mutex<Vec<String>>,
}

impl SelectiveTransport {
    /// Creates a transport that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes transfers of `data_id` fail.
    pub fn fail(&self, data_id: &str) {
        self.failing.lock().insert(data_id.to_string());
    }

    /// Makes transfers of `data_id` succeed again.
    pub fn heal(&self, data_id: &str) {
        self.failing.lock().remove(data_id);
    }

    /// Returns the entity IDs transferred so far, in order.
    pub fn order(&self) -> Vec<String> {
        self.order.lock().clone()
    }
}

#[async_trait]
impl Transport for SelectiveTransport {
    async fn transfer(
        &self,
        operation: &SyncOperation,
        _payload: Option<&[u8]>,
    ) -> SyncResult<TransferReceipt> {
        self.order.lock().push(operation.data_id.clone());
        if self.failing.lock().contains(&operation.data_id) {
            return Err(SyncError::transport_retryable(format!(
                "{} rejected",
                operation.data_id
            )));
        }
        Ok(TransferReceipt::ok(operation.payload_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mobisync_protocol::SyncStatus;

    #[tokio::test(start_paused = true)]
    async fn test_engine_round_trip() {
        let t = TestEngine::new(test_config(3));
        let d1 = t.device("d1", "u1", true).await;

        let op = t.sync_to_end(upload(&d1, "project", "p1", 16)).await.unwrap();
        assert_eq!(op.status, SyncStatus::Completed);
        assert_eq!(t.pushed(NotificationType::SyncComplete).len(), 1);
        assert_eq!(t.stored("u1", NotificationType::System).len(), 1);
    }

    #[tokio::test]
    async fn selective_transport_fails_selected_ids() {
        let transport = SelectiveTransport::new();
        transport.fail("b");
        let op = |id: &str| {
            SyncOperation::new(
                mobisync_protocol::OperationId(1),
                device_id("d1"),
                user_id("u1"),
                OperationKind::Upload,
                "project",
                id,
                0,
                Default::default(),
            )
        };

        assert!(transport.transfer(&op("a"), None).await.is_ok());
        assert!(transport.transfer(&op("b"), None).await.is_err());
        transport.heal("b");
        assert!(transport.transfer(&op("b"), None).await.is_ok());
        assert_eq!(transport.order(), vec!["a", "b", "b"]);
    }
}
