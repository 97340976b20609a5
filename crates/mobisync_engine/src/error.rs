//! Error types for the sync engine.

use mobisync_protocol::{DeviceId, NotificationId, OperationId, ProtocolError};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The device was never registered.
    #[error("device not found: {0}")]
    DeviceNotFound(DeviceId),

    /// No operation exists with this ID.
    #[error("sync operation not found: {0}")]
    OperationNotFound(OperationId),

    /// No notification exists with this ID.
    #[error("notification not found: {0}")]
    NotificationNotFound(NotificationId),

    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The transfer did not finish within the configured timeout.
    #[error("transfer timed out")]
    Timeout,

    /// A conflict was found that the policy cannot resolve automatically.
    #[error("conflict requires manual resolution for {data_type} {data_id}")]
    ConflictNeedsReview {
        /// Entity type.
        data_type: String,
        /// Entity ID.
        data_id: String,
    },

    /// The device's offline queue is full.
    #[error("offline queue for device {device_id} is full ({limit} entries)")]
    QueueOverflow {
        /// Device whose queue is full.
        device_id: DeviceId,
        /// Configured limit.
        limit: usize,
    },

    /// A push notification could not be delivered.
    #[error("notification delivery to {device_id} failed: {message}")]
    NotificationDelivery {
        /// Target device.
        device_id: DeviceId,
        /// Error message.
        message: String,
    },

    /// Another drain is already running for this device.
    #[error("offline queue drain already in progress for device {0}")]
    DrainInProgress(DeviceId),

    /// Invalid state transition.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// Malformed caller input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Malformed protocol value.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The content generator failed.
    #[error("content generation failed: {0}")]
    Content(String),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            _ => false,
        }
    }
}
