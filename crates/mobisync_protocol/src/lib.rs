//! # mobisync Protocol
//!
//! Data model shared by the mobisync engine and its collaborators.
//!
//! This crate provides:
//! - Identifiers for devices, users, operations and notifications
//! - `Device` with capabilities, preferences and offline settings
//! - `SyncOperation` and its status/priority/kind enums
//! - `OfflineOperation` and the per-device `OfflineQueueEntry`
//! - `Notification` records
//! - `ConflictPolicy` and the policy-driven `ConflictResolver`
//!
//! This is a pure data crate with no I/O operations.
//!
//! ## Key Invariants
//!
//! - `progress == 100` iff an operation is `Completed`
//! - Offline entries replay in insertion order per device
//! - An offline entry is not ready while any of its dependencies is still queued
//! - The `Manual` policy never produces a winner

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod device;
mod error;
mod ids;
mod notification;
mod offline;
mod operation;

pub use conflict::{
    ConflictPolicy, ConflictResolver, MergeStrategy, Resolution, VersionConflict, Winner,
};
pub use device::{
    Device, DeviceCapabilities, DeviceInfo, DevicePreferences, NetworkType, OfflineSettings,
    Platform,
};
pub use error::{ProtocolError, ProtocolResult};
pub use ids::{now_millis, DeviceId, NotificationId, OfflineOpId, OperationId, UserId};
pub use notification::{Notification, NotificationPriority, NotificationType};
pub use offline::{OfflineOperation, OfflineQueueEntry};
pub use operation::{OperationKind, Priority, SyncOperation, SyncStatus};
