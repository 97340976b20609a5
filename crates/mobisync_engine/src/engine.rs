//! Sync operation state machine.
//!
//! [`SyncEngine`] drives every [`SyncOperation`] from creation to a terminal
//! state:
//!
//! ```text
//! pending -> in_progress -> completed
//!                        -> failed --(retry timer)--> in_progress
//!                        -> failed --(retry timer, device offline)--> parked
//!                        -> failed (retries exhausted or conflict needs review)
//! parked --(replay completed or cancelled)--> settled like its replay
//! any non-terminal state -> cancelled
//! ```
//!
//! Mutations started while the device is offline, and retries that come due
//! while it is offline, are parked in the device's offline queue and replayed
//! as new operations when the queue is drained. Cancelling a parked mutation
//! also cancels every parked mutation that depends on it. Every terminal
//! transition of a non-parked operation dispatches exactly one notification.

use crate::analytics::{
    AnalyticsRecorder, AnalyticsSnapshot, MetricsCollector, NoopMetrics, PerformanceSample,
};
use crate::config::SyncConfig;
use crate::content::ContentGenerator;
use crate::error::{SyncError, SyncResult};
use crate::notify::{NotificationDispatcher, PushSender};
use crate::queue::OfflineQueue;
use crate::registry::DeviceRegistry;
use crate::scheduler::RetryScheduler;
use crate::store::OperationStore;
use crate::transport::{TransferReceipt, Transport};
use mobisync_protocol::{
    now_millis, ConflictPolicy, ConflictResolver, Device, DeviceId, DeviceInfo, MergeStrategy,
    Notification, NotificationId, NotificationPriority, NotificationType, OfflineOpId,
    OfflineOperation, OfflineQueueEntry, OfflineSettings, OperationId, OperationKind, Platform,
    Priority, ProtocolError, Resolution, SyncOperation, SyncStatus, UserId,
};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Error recorded on an operation whose conflict needs a human decision.
pub const CONFLICT_NEEDS_REVIEW: &str = "conflict requires manual resolution";

/// Error recorded on a replay whose device went offline before it ran.
pub const REPLAY_DEVICE_OFFLINE: &str = "device went offline before replay";

/// A request to sync one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    /// Device the mutation belongs to.
    pub device_id: DeviceId,
    /// Opaque entity type tag.
    pub data_type: String,
    /// Kind of mutation.
    pub kind: OperationKind,
    /// Opaque entity identifier.
    pub data_id: String,
    /// Payload to transfer.
    pub payload: Option<Vec<u8>>,
    /// Priority.
    pub priority: Priority,
    /// Offline entries this mutation must wait for if it gets parked.
    pub depends_on: Vec<OfflineOpId>,
}

impl SyncRequest {
    /// Creates a request without payload.
    pub fn new(
        device_id: DeviceId,
        data_type: impl Into<String>,
        kind: OperationKind,
        data_id: impl Into<String>,
    ) -> Self {
        Self {
            device_id,
            data_type: data_type.into(),
            kind,
            data_id: data_id.into(),
            payload: None,
            priority: Priority::default(),
            depends_on: Vec::new(),
        }
    }

    /// Sets the payload.
    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    /// Sets the priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the offline entries this mutation depends on.
    pub fn with_dependencies(mut self, depends_on: Vec<OfflineOpId>) -> Self {
        self.depends_on = depends_on;
        self
    }

    fn validate(&self) -> SyncResult<()> {
        if self.data_type.trim().is_empty() {
            return Err(ProtocolError::EmptyDataType.into());
        }
        if self.data_id.trim().is_empty() {
            return Err(SyncError::InvalidInput("data id must not be empty".into()));
        }
        Ok(())
    }
}

/// Builder for [`SyncEngine`].
pub struct SyncEngineBuilder {
    config: SyncConfig,
    transport: Arc<dyn Transport>,
    push_sender: Arc<dyn PushSender>,
    metrics: Arc<dyn MetricsCollector>,
    resolver: ConflictResolver,
}

impl SyncEngineBuilder {
    /// Creates a builder with the required collaborators.
    pub fn new(transport: Arc<dyn Transport>, push_sender: Arc<dyn PushSender>) -> Self {
        Self {
            config: SyncConfig::default(),
            transport,
            push_sender,
            metrics: Arc::new(NoopMetrics),
            resolver: ConflictResolver::new(),
        }
    }

    /// Sets the configuration.
    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the performance metrics collector.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Sets the conflict resolver and its merge strategies.
    pub fn with_resolver(mut self, resolver: ConflictResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Builds the engine.
    pub fn build(self) -> SyncEngine {
        let registry = Arc::new(DeviceRegistry::new());
        let inner = EngineInner {
            queue: OfflineQueue::new(Arc::clone(&registry), self.config.offline_queue_size),
            scheduler: RetryScheduler::new(self.config.retry.max_delay),
            dispatcher: NotificationDispatcher::new(Arc::clone(&registry), self.push_sender),
            conflict_policy: RwLock::new(self.config.conflict_policy),
            resolver: RwLock::new(self.resolver),
            store: OperationStore::new(),
            analytics: AnalyticsRecorder::new(),
            transport: self.transport,
            metrics: self.metrics,
            next_op_id: AtomicU64::new(1),
            transitions: Notify::new(),
            registry,
            config: self.config,
        };
        SyncEngine {
            inner: Arc::new(inner),
        }
    }
}

struct EngineInner {
    config: SyncConfig,
    conflict_policy: RwLock<ConflictPolicy>,
    resolver: RwLock<ConflictResolver>,
    registry: Arc<DeviceRegistry>,
    queue: OfflineQueue,
    store: OperationStore,
    scheduler: RetryScheduler,
    dispatcher: NotificationDispatcher,
    analytics: AnalyticsRecorder,
    transport: Arc<dyn Transport>,
    metrics: Arc<dyn MetricsCollector>,
    next_op_id: AtomicU64,
    transitions: Notify,
}

/// The sync engine.
///
/// Cheap to clone; clones share all state. Operations for different devices
/// run independently. Must be used from within a tokio runtime.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("devices", &self.inner.registry.len())
            .field("operations", &self.inner.store.len())
            .field("pending_retries", &self.inner.scheduler.pending_count())
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    /// Returns a builder.
    pub fn builder(
        transport: Arc<dyn Transport>,
        push_sender: Arc<dyn PushSender>,
    ) -> SyncEngineBuilder {
        SyncEngineBuilder::new(transport, push_sender)
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    // === Devices ===

    /// Registers a device, or updates it if the ID is already known.
    ///
    /// A first registration sends a system notification to the user.
    pub async fn register_device(
        &self,
        platform: Platform,
        user_id: UserId,
        info: DeviceInfo,
    ) -> Device {
        let registration = self.inner.registry.register(platform, user_id, info);
        if registration.created {
            let device = &registration.device;
            let notification = Notification::new(
                device.user_id.clone(),
                NotificationType::System,
                "Device registered",
                format!(
                    "{} device {} is now registered for sync",
                    device.platform.as_str(),
                    device.device_id
                ),
            );
            self.inner.deliver(notification).await;
        }
        registration.device
    }

    /// Returns a device.
    pub fn get_device(&self, device_id: &DeviceId) -> SyncResult<Device> {
        self.inner.registry.get(device_id)
    }

    /// Returns all devices of a user.
    pub fn devices_for_user(&self, user_id: &UserId) -> Vec<Device> {
        self.inner.registry.devices_for_user(user_id)
    }

    /// Sets a device's online flag.
    ///
    /// Returns true if a background drain of the offline queue was started.
    pub fn set_device_online(&self, device_id: &DeviceId, online: bool) -> SyncResult<bool> {
        let change = self.inner.registry.set_online(device_id, online)?;
        if !(change.drain_requested && self.inner.config.drain_on_reconnect) {
            return Ok(false);
        }

        let engine = self.clone();
        let device_id = device_id.clone();
        tokio::spawn(async move {
            match engine.process_offline_queue(&device_id).await {
                Ok(replayed) => {
                    debug!(device_id = %device_id, replayed = replayed.len(), "reconnect drain finished");
                }
                Err(SyncError::DrainInProgress(_)) => {
                    debug!(device_id = %device_id, "drain already running");
                }
                Err(err) => {
                    warn!(device_id = %device_id, error = %err, "reconnect drain failed");
                }
            }
        });
        Ok(true)
    }

    /// Enables offline mode for a device.
    ///
    /// Returns true if offline mode was newly enabled; the settings are
    /// updated either way. Newly enabling sends a system notification.
    pub async fn enable_offline_mode(
        &self,
        device_id: &DeviceId,
        settings: OfflineSettings,
    ) -> SyncResult<bool> {
        let (device, newly_enabled) = self.inner.registry.enable_offline_mode(device_id, settings)?;
        if newly_enabled {
            info!(device_id = %device_id, "offline mode enabled");
            let notification = Notification::new(
                device.user_id.clone(),
                NotificationType::System,
                "Offline mode enabled",
                format!("Changes on device {device_id} will be queued while offline"),
            );
            self.inner.deliver(notification).await;
        }
        Ok(newly_enabled)
    }

    // === Operations ===

    /// Starts syncing one entity.
    ///
    /// On an offline device the mutation is parked in the offline queue and
    /// the returned operation is `Failed` with `queued_as` set; no retry timer
    /// is scheduled. On an online device the first transfer attempt runs
    /// before this returns; a failed attempt leaves a retry scheduled.
    pub async fn start_sync(&self, request: SyncRequest) -> SyncResult<SyncOperation> {
        request.validate()?;
        let inner = &self.inner;
        let slot = inner.registry.slot(&request.device_id)?;

        let SyncRequest {
            device_id,
            data_type,
            kind,
            data_id,
            payload,
            priority,
            depends_on,
        } = request;
        let payload_size = payload.as_ref().map_or(0, |p| p.len() as u64);

        let operation = {
            let mut slot = slot.lock();
            let mut operation = SyncOperation::new(
                inner.next_operation_id(),
                device_id.clone(),
                slot.device.user_id.clone(),
                kind,
                data_type.clone(),
                data_id.clone(),
                payload_size,
                priority,
            );

            if slot.device.online {
                inner.store.insert(operation.clone(), payload);
            } else {
                let origin = operation.id;
                let entry = inner.queue.enqueue_locked(&mut slot, |id| OfflineOperation {
                    id,
                    kind,
                    data_type,
                    data_id,
                    data: payload,
                    priority,
                    timestamp: now_millis(),
                    dependencies: depends_on,
                    origin,
                })?;
                operation.mark_queued(entry);
                inner.store.insert(operation.clone(), None);
            }
            operation
        };
        inner.analytics.record_started();

        if let Some(entry) = operation.queued_as {
            inner.analytics.record_queued();
            info!(
                operation_id = %operation.id,
                device_id = %device_id,
                entry = %entry,
                "device offline, mutation queued"
            );
            return Ok(operation);
        }

        debug!(
            operation_id = %operation.id,
            device_id = %device_id,
            kind = operation.kind.as_str(),
            data_type = %operation.data_type,
            "sync started"
        );
        inner.attempt(operation.id).await?;
        inner.store.get(operation.id)
    }

    /// Generates content and uploads it as the request's payload.
    pub async fn sync_generated_content(
        &self,
        generator: &dyn ContentGenerator,
        request: SyncRequest,
        prompt: &str,
    ) -> SyncResult<SyncOperation> {
        request.validate()?;
        let content = generator.generate(prompt).await?;
        debug!(bytes = content.len(), "content generated");
        self.start_sync(request.with_payload(content.into_bytes()))
            .await
    }

    /// Returns an operation.
    pub fn get_sync_operation(&self, operation_id: OperationId) -> SyncResult<SyncOperation> {
        self.inner.store.get(operation_id)
    }

    /// Lists operations ordered by ID, optionally for one device.
    pub fn get_sync_operations(&self, device_id: Option<&DeviceId>) -> Vec<SyncOperation> {
        self.inner.store.list(device_id)
    }

    /// Waits until an operation is terminal or parked in the offline queue.
    pub async fn wait_for_terminal(&self, operation_id: OperationId) -> SyncResult<SyncOperation> {
        loop {
            let notified = self.inner.transitions.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let operation = self.inner.store.get(operation_id)?;
            if operation.is_terminal() || operation.is_queued() {
                return Ok(operation);
            }
            notified.await;
        }
    }

    /// Cancels an operation.
    ///
    /// Any pending retry timer is cancelled and a parked offline entry is
    /// removed. Parked entries that depend on that entry, directly or not,
    /// are removed too and their operations cancelled. Sends one
    /// cancellation notice per cancelled operation. Fails if the operation
    /// is already terminal.
    pub async fn cancel_sync(&self, operation_id: OperationId) -> SyncResult<SyncOperation> {
        self.inner.cancel_operation(operation_id).await
    }

    // === Offline queue ===

    /// Returns a copy of the device's offline queue, if one was ever created.
    pub fn get_offline_queue(&self, device_id: &DeviceId) -> SyncResult<Option<OfflineQueueEntry>> {
        self.inner.queue.snapshot(device_id)
    }

    /// Drops every queued entry of a device and cancels the parked operations.
    ///
    /// Returns the number of entries dropped.
    pub async fn clear_offline_queue(&self, device_id: &DeviceId) -> SyncResult<usize> {
        let dropped = self.inner.queue.clear(device_id)?;
        for entry in &dropped {
            if let Err(err) = self.inner.cancel_operation(entry.origin).await {
                debug!(entry = %entry.id, error = %err, "parked operation not cancelled");
            }
        }
        info!(device_id = %device_id, dropped = dropped.len(), "offline queue cleared");
        Ok(dropped.len())
    }

    /// Replays the device's offline queue.
    ///
    /// Entries are replayed in insertion order as new operations, each only
    /// once every entry it depends on has completed. A completed replay
    /// removes its entry and settles the parked operation with the same
    /// outcome. A cancelled replay does the same and also cancels the
    /// entries that depend on it. Failed replays stay queued for the next
    /// drain. Stops early if the device goes offline.
    ///
    /// Only one drain may run per device. The drain waits for each replay to
    /// become terminal, so a replay that keeps failing holds the drain for
    /// its whole retry schedule, at most `max_retries` delays of up to
    /// `max_delay` each. Reconnects during that time do not start a second
    /// drain.
    pub async fn process_offline_queue(
        &self,
        device_id: &DeviceId,
    ) -> SyncResult<Vec<SyncOperation>> {
        let inner = &self.inner;
        let _drain = inner.queue.begin_drain(device_id)?;
        info!(device_id = %device_id, "draining offline queue");

        let mut attempted = HashSet::new();
        let mut results = Vec::new();
        loop {
            let next = inner
                .queue
                .peek_ready(device_id)?
                .into_iter()
                .find(|entry| !attempted.contains(&entry.id));
            let Some(entry) = next else {
                break;
            };
            attempted.insert(entry.id);

            let Some(replay) = inner.create_replay(device_id, &entry)? else {
                debug!(device_id = %device_id, "device went offline, stopping drain");
                break;
            };
            inner.attempt(replay.id).await?;
            let replay = self.wait_for_terminal(replay.id).await?;

            match replay.status {
                SyncStatus::Completed => {
                    if let Some(entry) = inner.queue.complete(device_id, entry.id)? {
                        inner.settle_origin(&entry, &replay)?;
                    }
                }
                SyncStatus::Cancelled => {
                    if let Some(entry) = inner.queue.remove(device_id, entry.id)? {
                        inner.settle_origin(&entry, &replay)?;
                        inner.withdraw_dependents(device_id, entry.id).await?;
                    }
                }
                _ => {}
            }
            results.push(replay);
        }

        info!(
            device_id = %device_id,
            replayed = results.len(),
            remaining = inner.queue.snapshot(device_id)?.map_or(0, |q| q.len()),
            "offline queue drained"
        );
        Ok(results)
    }

    // === Notifications ===

    /// Returns a user's notifications, oldest first.
    pub fn notifications_for_user(&self, user_id: &UserId) -> Vec<Notification> {
        self.inner.dispatcher.notifications_for_user(user_id)
    }

    /// Marks a notification as read.
    pub fn mark_notification_read(&self, notification_id: NotificationId) -> SyncResult<()> {
        self.inner.dispatcher.mark_read(notification_id)
    }

    // === Conflicts ===

    /// Sets the conflict policy.
    pub fn set_conflict_policy(&self, policy: ConflictPolicy) {
        *self.inner.conflict_policy.write() = policy;
    }

    /// Gets the conflict policy.
    pub fn conflict_policy(&self) -> ConflictPolicy {
        *self.inner.conflict_policy.read()
    }

    /// Registers the merge strategy used by the `Merge` policy for a data type.
    pub fn register_merge_strategy(
        &self,
        data_type: impl Into<String>,
        strategy: Arc<dyn MergeStrategy>,
    ) {
        self.inner
            .resolver
            .write()
            .register_strategy(data_type, strategy);
    }

    // === Analytics ===

    /// Returns a snapshot of the outcome counters.
    pub fn analytics(&self) -> AnalyticsSnapshot {
        self.inner.analytics.snapshot()
    }

    /// Returns the number of pending retry timers.
    pub fn pending_retries(&self) -> usize {
        self.inner.scheduler.pending_count()
    }
}

impl EngineInner {
    fn next_operation_id(&self) -> OperationId {
        OperationId(self.next_op_id.fetch_add(1, Ordering::Relaxed))
    }

    fn transitioned(&self) {
        self.transitions.notify_waiters();
    }

    /// Creates the replay operation for an offline entry, or `None` if the
    /// device is offline.
    fn create_replay(
        &self,
        device_id: &DeviceId,
        entry: &OfflineOperation,
    ) -> SyncResult<Option<SyncOperation>> {
        let slot = self.registry.slot(device_id)?;
        let slot = slot.lock();
        if !slot.device.online {
            return Ok(None);
        }

        let mut operation = SyncOperation::new(
            self.next_operation_id(),
            device_id.clone(),
            slot.device.user_id.clone(),
            entry.kind,
            entry.data_type.clone(),
            entry.data_id.clone(),
            entry.payload_size(),
            entry.priority,
        );
        operation.replay_of = Some(entry.id);
        self.store.insert(operation.clone(), entry.data.clone());
        drop(slot);

        self.analytics.record_started();
        self.analytics.record_replayed();
        debug!(operation_id = %operation.id, entry = %entry.id, "replaying offline entry");
        Ok(Some(operation))
    }

    /// Settles the operation parked as `entry` with its replay's outcome.
    fn settle_origin(&self, entry: &OfflineOperation, replay: &SyncOperation) -> SyncResult<()> {
        let settled = self.store.update(entry.origin, |origin| {
            if origin.is_terminal() {
                return false;
            }
            origin.settle_with_replay(replay);
            true
        })?;
        if settled {
            debug!(
                operation_id = %entry.origin,
                replay = %replay.id,
                status = replay.status.as_str(),
                "parked operation settled"
            );
            self.transitioned();
        }
        Ok(())
    }

    /// Marks an operation cancelled and stops its retry timer.
    fn mark_cancelled(&self, operation_id: OperationId) -> SyncResult<SyncOperation> {
        let operation = self.store.update(operation_id, |op| {
            if op.is_terminal() {
                return Err(SyncError::InvalidStateTransition {
                    from: op.status.as_str().to_string(),
                    to: SyncStatus::Cancelled.as_str().to_string(),
                });
            }
            op.mark_cancelled();
            Ok(op.clone())
        })??;
        self.scheduler.cancel(operation_id);
        Ok(operation)
    }

    async fn cancel_operation(&self, operation_id: OperationId) -> SyncResult<SyncOperation> {
        let operation = self.mark_cancelled(operation_id)?;
        let entry = match operation.queued_as {
            Some(entry) => self.queue.remove(&operation.device_id, entry)?,
            None => None,
        };
        self.finish(&operation).await;
        self.transitioned();
        if let Some(entry) = entry {
            self.withdraw_dependents(&operation.device_id, entry.id).await?;
        }
        Ok(operation)
    }

    /// Removes every entry that depends on `entry`, directly or through
    /// other entries, and cancels the operations parked as them.
    async fn withdraw_dependents(
        &self,
        device_id: &DeviceId,
        entry: OfflineOpId,
    ) -> SyncResult<()> {
        let mut withdrawn = vec![entry];
        while let Some(dependency) = withdrawn.pop() {
            for dependent in self.queue.dependents(device_id, dependency)? {
                if self.queue.remove(device_id, dependent.id)?.is_none() {
                    continue;
                }
                withdrawn.push(dependent.id);
                match self.mark_cancelled(dependent.origin) {
                    Ok(operation) => {
                        info!(
                            operation_id = %operation.id,
                            entry = %dependent.id,
                            dependency = %dependency,
                            "dependency withdrawn, parked mutation cancelled"
                        );
                        self.finish(&operation).await;
                        self.transitioned();
                    }
                    Err(err) => {
                        debug!(
                            entry = %dependent.id,
                            error = %err,
                            "parked operation not cancelled"
                        );
                    }
                }
            }
        }
        Ok(())
    }

    /// Moves a runnable operation to `InProgress`, or parks it if its device
    /// is offline. Holds the device slot so connectivity cannot change in
    /// between.
    fn start_attempt(&self, operation_id: OperationId) -> SyncResult<AttemptStart> {
        let operation = self.store.get(operation_id)?;
        let slot = self.registry.slot(&operation.device_id)?;
        let mut slot = slot.lock();

        if slot.device.online {
            return Ok(match self.store.begin_attempt(operation_id)? {
                Some((operation, payload)) => AttemptStart::Run(operation, payload),
                None => AttemptStart::Skip,
            });
        }
        // A replay's entry is still queued; it runs again on the next drain.
        if operation.replay_of.is_some() {
            return Ok(AttemptStart::Abandon(REPLAY_DEVICE_OFFLINE.to_string()));
        }

        let parked = self.store.park(operation_id, |op, payload| {
            self.queue.enqueue_locked(&mut slot, |id| OfflineOperation {
                id,
                kind: op.kind,
                data_type: op.data_type.clone(),
                data_id: op.data_id.clone(),
                data: payload,
                priority: op.priority,
                timestamp: now_millis(),
                dependencies: Vec::new(),
                origin: op.id,
            })
        });
        match parked {
            Ok(Some(operation)) => Ok(AttemptStart::Parked(operation)),
            Ok(None) => Ok(AttemptStart::Skip),
            Err(err @ SyncError::QueueOverflow { .. }) => {
                Ok(AttemptStart::Abandon(err.to_string()))
            }
            Err(err) => Err(err),
        }
    }

    /// Runs one transfer attempt.
    async fn attempt(self: &Arc<Self>, operation_id: OperationId) -> SyncResult<()> {
        let (operation, payload) = match self.start_attempt(operation_id)? {
            AttemptStart::Run(operation, payload) => (operation, payload),
            AttemptStart::Parked(operation) => {
                self.analytics.record_queued();
                info!(
                    operation_id = %operation.id,
                    device_id = %operation.device_id,
                    retries = operation.retry_count,
                    "device offline, retry parked"
                );
                self.transitioned();
                return Ok(());
            }
            AttemptStart::Abandon(reason) => {
                if let Some(operation) = self.store.abandon(operation_id, reason)? {
                    self.finish(&operation).await;
                    self.transitioned();
                }
                return Ok(());
            }
            AttemptStart::Skip => return Ok(()),
        };
        self.transitioned();

        let started = Instant::now();
        let transfer = self
            .transport
            .transfer(&operation, payload.as_deref());
        let result = match tokio::time::timeout(self.config.transfer_timeout, transfer).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout),
        };

        self.metrics.record(PerformanceSample {
            operation_id,
            device_id: operation.device_id.clone(),
            kind: operation.kind,
            bytes: result.as_ref().map_or(0, |receipt| receipt.bytes),
            duration: started.elapsed(),
            success: result.is_ok(),
        });

        match result {
            Ok(receipt) => self.complete_transfer(&operation, receipt).await,
            Err(err) => self.fail_transfer(&operation, err).await,
        }
    }

    async fn complete_transfer(
        &self,
        operation: &SyncOperation,
        receipt: TransferReceipt,
    ) -> SyncResult<()> {
        let resolution = match receipt.conflict {
            Some(conflict) if operation.kind.may_conflict() => {
                let policy = *self.conflict_policy.read();
                let resolution =
                    self.resolver
                        .read()
                        .resolve(policy, &operation.data_type, &conflict);
                self.analytics.record_conflict(resolution.needs_review());
                debug!(
                    operation_id = %operation.id,
                    policy = ?policy,
                    winner = ?resolution.winner(),
                    "version conflict"
                );
                Some(resolution)
            }
            _ => None,
        };

        let updated = self.store.update(operation.id, |op| {
            if op.status != SyncStatus::InProgress {
                return None;
            }
            match &resolution {
                Some(Resolution::NeedsReview) => {
                    op.needs_review = true;
                    op.next_retry_at = None;
                    op.mark_failed(CONFLICT_NEEDS_REVIEW);
                }
                Some(Resolution::Resolved { winner, .. }) => {
                    op.resolution = Some(*winner);
                    op.mark_completed();
                }
                None => op.mark_completed(),
            }
            Some(op.clone())
        })?;

        if let Some(updated) = updated {
            self.finish(&updated).await;
            self.transitioned();
        }
        Ok(())
    }

    async fn fail_transfer(
        self: &Arc<Self>,
        operation: &SyncOperation,
        error: SyncError,
    ) -> SyncResult<()> {
        let retry = &self.config.retry;
        let updated = self.store.update(operation.id, |op| {
            if op.status != SyncStatus::InProgress {
                return None;
            }
            op.retry_count += 1;
            op.mark_failed(error.to_string());

            let delay = (error.is_retryable() && op.retry_count < retry.max_retries)
                .then(|| retry.delay_for_attempt(op.retry_count));
            op.next_retry_at = delay.map(|d| now_millis() + d.as_millis() as u64);
            Some((op.clone(), delay))
        })?;

        let Some((updated, delay)) = updated else {
            return Ok(());
        };

        match delay {
            Some(delay) => {
                self.analytics.record_retry();
                let delay = self.scheduler.schedule(
                    updated.id,
                    delay,
                    retry_task(Arc::downgrade(self), updated.id),
                );
                // A cancel that landed before the timer existed could not stop it.
                if self.store.get(updated.id)?.status == SyncStatus::Cancelled {
                    self.scheduler.cancel(updated.id);
                }
                debug!(
                    operation_id = %updated.id,
                    retry_count = updated.retry_count,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "transfer failed, retry scheduled"
                );
                self.transitioned();
            }
            None => {
                self.finish(&updated).await;
                self.transitioned();
            }
        }
        Ok(())
    }

    /// Handles a terminal transition. Called exactly once per operation.
    async fn finish(&self, operation: &SyncOperation) {
        self.store.release_payload(operation.id);
        match operation.status {
            SyncStatus::Completed => {
                self.analytics.record_completed(operation.payload_size);
                info!(
                    operation_id = %operation.id,
                    device_id = %operation.device_id,
                    retries = operation.retry_count,
                    "sync completed"
                );
            }
            SyncStatus::Cancelled => {
                self.analytics.record_cancelled();
                info!(operation_id = %operation.id, "sync cancelled");
            }
            _ => {
                self.analytics.record_failed();
                warn!(
                    operation_id = %operation.id,
                    device_id = %operation.device_id,
                    retries = operation.retry_count,
                    error = operation.error.as_deref().unwrap_or_default(),
                    "sync failed permanently"
                );
            }
        }
        self.deliver(terminal_notification(operation)).await;
    }

    async fn deliver(&self, notification: Notification) {
        let report = self.dispatcher.notify(notification).await;
        self.analytics
            .record_delivery(report.delivered, report.failures.len());
    }
}

enum AttemptStart {
    Run(SyncOperation, Option<Vec<u8>>),
    Parked(SyncOperation),
    Abandon(String),
    Skip,
}

fn retry_task(
    inner: Weak<EngineInner>,
    operation_id: OperationId,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        if let Err(err) = inner.attempt(operation_id).await {
            warn!(operation_id = %operation_id, error = %err, "retry attempt failed to run");
        }
    })
}

fn terminal_notification(operation: &SyncOperation) -> Notification {
    let subject = format!(
        "{} of {} {}",
        operation.kind.as_str(),
        operation.data_type,
        operation.data_id
    );
    let data = serde_json::json!({
        "operation_id": operation.id,
        "device_id": operation.device_id,
        "data_type": operation.data_type,
        "data_id": operation.data_id,
        "status": operation.status,
        "retry_count": operation.retry_count,
    });

    let notification = match operation.status {
        SyncStatus::Completed => Notification::new(
            operation.user_id.clone(),
            NotificationType::SyncComplete,
            "Sync complete",
            format!("{subject} completed"),
        )
        .with_priority(NotificationPriority::Low),
        SyncStatus::Cancelled => Notification::new(
            operation.user_id.clone(),
            NotificationType::System,
            "Sync cancelled",
            format!("{subject} was cancelled"),
        ),
        _ if operation.needs_review => Notification::new(
            operation.user_id.clone(),
            NotificationType::SyncError,
            "Sync conflict",
            SyncError::ConflictNeedsReview {
                data_type: operation.data_type.clone(),
                data_id: operation.data_id.clone(),
            }
            .to_string(),
        )
        .with_priority(NotificationPriority::High),
        _ => Notification::new(
            operation.user_id.clone(),
            NotificationType::SyncError,
            "Sync failed",
            format!(
                "{subject} failed after {} attempts: {}",
                operation.retry_count,
                operation.error.as_deref().unwrap_or("unknown error")
            ),
        )
        .with_priority(NotificationPriority::High),
    };
    notification.with_data(data.to_string())
}
