//! # mobisync Engine
//!
//! Offline-first sync coordination for intermittently connected devices.
//!
//! This crate provides:
//! - Device registry with per-device locking
//! - Sync operation state machine (pending → in_progress → completed/failed/cancelled)
//! - Per-device offline queue with dependency-aware replay
//! - Retry scheduling with bounded exponential backoff
//! - Policy-driven conflict resolution
//! - Notification fan-out to push tokens
//! - Outcome counters and performance samples
//!
//! ## Architecture
//!
//! [`SyncEngine`] owns every component and talks to the outside world through
//! injected collaborators:
//! 1. [`Transport`] moves one operation's payload
//! 2. [`PushSender`] delivers a notification to one device token
//! 3. [`MetricsCollector`] receives one sample per transfer attempt
//! 4. [`ContentGenerator`] produces opaque payloads for generated content
//!
//! ## Key Invariants
//!
//! - `retry_count` never exceeds the configured `max_retries`
//! - A failed operation with retries left always has a retry scheduled
//! - Mutations on an offline device are queued, never retried on a timer
//! - Offline entries replay in insertion order, dependencies first
//! - Every terminal transition dispatches exactly one notification
//! - At most one drain runs per device

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod analytics;
mod config;
mod content;
mod engine;
mod error;
mod notify;
mod queue;
mod registry;
mod scheduler;
mod store;
mod transport;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use analytics::{
    AnalyticsRecorder, AnalyticsSnapshot, MemoryMetrics, MetricsCollector, NoopMetrics,
    PerformanceSample,
};
pub use config::{RetryConfig, SyncConfig};
pub use content::{ContentGenerator, TemplateGenerator};
pub use engine::{
    SyncEngine, SyncEngineBuilder, SyncRequest, CONFLICT_NEEDS_REVIEW, REPLAY_DEVICE_OFFLINE,
};
pub use error::{SyncError, SyncResult};
pub use notify::{DeliveryReport, MemoryPushSender, NotificationDispatcher, PushSender, SentPush};
pub use queue::{DrainGuard, OfflineQueue};
pub use registry::{ConnectivityChange, DeviceRegistry, Registration};
pub use scheduler::RetryScheduler;
pub use store::OperationStore;
pub use transport::{MockResponse, MockTransport, TransferCall, TransferReceipt, Transport};
