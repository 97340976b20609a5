//! Transport layer abstraction for sync operations.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use mobisync_protocol::{OperationId, SyncOperation, VersionConflict};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;

/// Result of a successful transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferReceipt {
    /// Bytes moved by the transfer.
    pub bytes: u64,
    /// Set when both sides changed the entity since the last sync.
    pub conflict: Option<VersionConflict>,
}

impl TransferReceipt {
    /// Creates a receipt without a conflict.
    pub fn ok(bytes: u64) -> Self {
        Self {
            bytes,
            conflict: None,
        }
    }

    /// Creates a receipt reporting a version conflict.
    pub fn conflicted(conflict: VersionConflict) -> Self {
        Self {
            bytes: 0,
            conflict: Some(conflict),
        }
    }
}

/// A transport moves one operation's payload between device and backend.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, WebSocket, mock for testing, etc.). Timeouts are
/// applied by the engine; an implementation only reports success or failure.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Performs the transfer for an operation.
    async fn transfer(
        &self,
        operation: &SyncOperation,
        payload: Option<&[u8]>,
    ) -> SyncResult<TransferReceipt>;
}

/// Scripted response of the mock transport.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Succeed with a plain receipt.
    Success,
    /// Succeed but report a conflict.
    Conflict(VersionConflict),
    /// Fail with a retryable transport error.
    Failure(String),
}

/// A record of one transfer seen by the mock transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferCall {
    /// Operation that was transferred.
    pub operation_id: OperationId,
    /// Entity type.
    pub data_type: String,
    /// Entity ID.
    pub data_id: String,
    /// Payload length.
    pub payload_len: usize,
}

/// A mock transport for testing.
///
/// Scripted responses are consumed in order; once exhausted, every transfer
/// gets the fallback response.
#[derive(Debug)]
pub struct MockTransport {
    script: Mutex<VecDeque<MockResponse>>,
    fallback: Mutex<MockResponse>,
    latency: Mutex<Duration>,
    calls: Mutex<Vec<TransferCall>>,
}

impl MockTransport {
    /// Creates a mock transport that always succeeds.
    pub fn new() -> Self {
        Self::with_fallback(MockResponse::Success)
    }

    /// Creates a mock transport that always fails.
    pub fn failing() -> Self {
        Self::with_fallback(MockResponse::Failure("connection refused".into()))
    }

    fn with_fallback(fallback: MockResponse) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(fallback),
            latency: Mutex::new(Duration::ZERO),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queues a scripted response.
    pub fn push_response(&self, response: MockResponse) {
        self.script.lock().push_back(response);
    }

    /// Sets the response used once the script is exhausted.
    pub fn set_fallback(&self, response: MockResponse) {
        *self.fallback.lock() = response;
    }

    /// Sets a simulated latency per transfer.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Returns every transfer seen so far.
    pub fn calls(&self) -> Vec<TransferCall> {
        self.calls.lock().clone()
    }

    /// Returns the number of transfers seen so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn next_response(&self) -> MockResponse {
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.lock().clone())
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn transfer(
        &self,
        operation: &SyncOperation,
        payload: Option<&[u8]>,
    ) -> SyncResult<TransferReceipt> {
        self.calls.lock().push(TransferCall {
            operation_id: operation.id,
            data_type: operation.data_type.clone(),
            data_id: operation.data_id.clone(),
            payload_len: payload.map_or(0, |p| p.len()),
        });

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        match self.next_response() {
            MockResponse::Success => Ok(TransferReceipt::ok(operation.payload_size)),
            MockResponse::Conflict(conflict) => Ok(TransferReceipt::conflicted(conflict)),
            MockResponse::Failure(message) => Err(SyncError::transport_retryable(message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mobisync_protocol::{DeviceId, OperationKind, Priority, UserId};

    fn make_op() -> SyncOperation {
        SyncOperation::new(
            OperationId(1),
            DeviceId::new("d1").unwrap(),
            UserId::new("u1").unwrap(),
            OperationKind::Upload,
            "project",
            "p1",
            3,
            Priority::Medium,
        )
    }

    #[tokio::test]
    async fn mock_transport_succeeds_by_default() {
        let transport = MockTransport::new();
        let receipt = transport.transfer(&make_op(), Some(&[1, 2, 3])).await.unwrap();

        assert_eq!(receipt, TransferReceipt::ok(3));
        assert_eq!(transport.call_count(), 1);
        assert_eq!(transport.calls()[0].payload_len, 3);
    }

    #[tokio::test]
    async fn mock_transport_script_then_fallback() {
        let transport = MockTransport::failing();
        transport.push_response(MockResponse::Success);

        assert!(transport.transfer(&make_op(), None).await.is_ok());

        let err = transport.transfer(&make_op(), None).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test]
    async fn mock_transport_reports_conflict() {
        let transport = MockTransport::new();
        let conflict = VersionConflict::new(1, 2, vec![1], vec![2]);
        transport.push_response(MockResponse::Conflict(conflict.clone()));

        let receipt = transport.transfer(&make_op(), None).await.unwrap();
        assert_eq!(receipt.conflict, Some(conflict));
    }
}
