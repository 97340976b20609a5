//! Outcome counters and performance samples.
//!
//! [`AnalyticsRecorder`] keeps engine-wide counters; a [`MetricsCollector`]
//! receives one [`PerformanceSample`] per transfer attempt.
//!
//! # Usage
//!
//! ```rust,ignore
//! let snapshot = engine.analytics();
//! println!("completed: {}", snapshot.completed);
//! println!("retries: {}", snapshot.retries);
//! ```

use mobisync_protocol::{DeviceId, OperationId, OperationKind};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Sync outcome counters.
///
/// All counters are atomic and monotonically increasing.
#[derive(Debug, Default)]
pub struct AnalyticsRecorder {
    started: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    queued: AtomicU64,
    retries: AtomicU64,
    conflicts: AtomicU64,
    needs_review: AtomicU64,
    replayed: AtomicU64,
    bytes_transferred: AtomicU64,
    notifications_sent: AtomicU64,
    delivery_failures: AtomicU64,
}

impl AnalyticsRecorder {
    /// Creates a recorder with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_started(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_completed(&self, bytes: u64) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.bytes_transferred.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Records a permanent failure.
    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_queued(&self) {
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_conflict(&self, needs_review: bool) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
        if needs_review {
            self.needs_review.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_replayed(&self) {
        self.replayed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivery(&self, delivered: usize, failed: usize) {
        self.notifications_sent
            .fetch_add(delivered as u64, Ordering::Relaxed);
        self.delivery_failures
            .fetch_add(failed as u64, Ordering::Relaxed);
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> AnalyticsSnapshot {
        AnalyticsSnapshot {
            started: self.started.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            needs_review: self.needs_review.load(Ordering::Relaxed),
            replayed: self.replayed.load(Ordering::Relaxed),
            bytes_transferred: self.bytes_transferred.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of the analytics counters.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct AnalyticsSnapshot {
    /// Operations created, including replays.
    pub started: u64,
    /// Operations completed.
    pub completed: u64,
    /// Operations that failed permanently, including conflicts left for review.
    pub failed: u64,
    /// Operations cancelled.
    pub cancelled: u64,
    /// Mutations parked in an offline queue.
    pub queued: u64,
    /// Retries scheduled.
    pub retries: u64,
    /// Version conflicts seen.
    pub conflicts: u64,
    /// Conflicts left for manual review.
    pub needs_review: u64,
    /// Offline entries replayed.
    pub replayed: u64,
    /// Payload bytes of completed operations.
    pub bytes_transferred: u64,
    /// Push deliveries accepted.
    pub notifications_sent: u64,
    /// Push deliveries that failed.
    pub delivery_failures: u64,
}

impl AnalyticsSnapshot {
    /// Fraction of finished operations that completed, or `None` if nothing
    /// has finished yet.
    pub fn success_rate(&self) -> Option<f64> {
        let finished = self.completed + self.failed;
        (finished > 0).then(|| self.completed as f64 / finished as f64)
    }
}

/// Timing of one transfer attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerformanceSample {
    /// Operation the attempt belongs to.
    pub operation_id: OperationId,
    /// Device the attempt ran for.
    pub device_id: DeviceId,
    /// Operation kind.
    pub kind: OperationKind,
    /// Bytes moved.
    pub bytes: u64,
    /// Wall time of the attempt.
    pub duration: Duration,
    /// Whether the transfer succeeded.
    pub success: bool,
}

/// Receives performance samples. Fire-and-forget.
pub trait MetricsCollector: Send + Sync {
    /// Records one sample.
    fn record(&self, sample: PerformanceSample);
}

/// Discards every sample.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsCollector for NoopMetrics {
    fn record(&self, _sample: PerformanceSample) {}
}

/// Keeps every sample in memory.
#[derive(Debug, Default)]
pub struct MemoryMetrics {
    samples: Mutex<Vec<PerformanceSample>>,
}

impl MemoryMetrics {
    /// Creates an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the recorded samples.
    pub fn samples(&self) -> Vec<PerformanceSample> {
        self.samples.lock().clone()
    }
}

impl MetricsCollector for MemoryMetrics {
    fn record(&self, sample: PerformanceSample) {
        self.samples.lock().push(sample);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_counters_are_zero() {
        let snapshot = AnalyticsRecorder::new().snapshot();
        assert_eq!(snapshot, AnalyticsSnapshot::default());
        assert_eq!(snapshot.success_rate(), None);
    }

    #[test]
    fn record_outcomes() {
        let analytics = AnalyticsRecorder::new();
        analytics.record_started();
        analytics.record_started();
        analytics.record_completed(512);
        analytics.record_retry();
        analytics.record_failed();
        analytics.record_conflict(true);
        analytics.record_conflict(false);
        analytics.record_delivery(2, 1);

        let snap = analytics.snapshot();
        assert_eq!(snap.started, 2);
        assert_eq!(snap.completed, 1);
        assert_eq!(snap.bytes_transferred, 512);
        assert_eq!(snap.retries, 1);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.conflicts, 2);
        assert_eq!(snap.needs_review, 1);
        assert_eq!(snap.notifications_sent, 2);
        assert_eq!(snap.delivery_failures, 1);
        assert_eq!(snap.success_rate(), Some(0.5));
    }

    #[test]
    fn snapshot_serializes() {
        let analytics = AnalyticsRecorder::new();
        analytics.record_queued();
        let json = serde_json::to_value(analytics.snapshot()).unwrap();
        assert_eq!(json["queued"], 1);
        assert_eq!(json["completed"], 0);
    }

    #[test]
    fn concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let analytics = Arc::new(AnalyticsRecorder::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let analytics = Arc::clone(&analytics);
                thread::spawn(move || {
                    for _ in 0..100 {
                        analytics.record_started();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(analytics.snapshot().started, 800);
    }

    #[test]
    fn memory_metrics_keeps_samples() {
        let metrics = MemoryMetrics::new();
        metrics.record(PerformanceSample {
            operation_id: OperationId(1),
            device_id: DeviceId::new("d1").unwrap(),
            kind: OperationKind::Upload,
            bytes: 10,
            duration: Duration::from_millis(3),
            success: true,
        });
        assert_eq!(metrics.samples().len(), 1);
        NoopMetrics.record(metrics.samples()[0].clone());
    }
}
