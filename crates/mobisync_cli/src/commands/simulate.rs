//! Simulate command implementation.
//!
//! Drives a seeded workload across several devices against a simulated
//! transport, then reconnects every device and drains its offline queue.
//! Operations run one at a time so a given seed always yields the same
//! report.

use crate::error::{CliError, CliResult};
use async_trait::async_trait;
use mobisync_engine::{
    AnalyticsSnapshot, MemoryPushSender, RetryConfig, SyncConfig, SyncEngine, SyncError,
    SyncRequest, SyncResult, TransferReceipt, Transport,
};
use mobisync_protocol::{
    DeviceId, DeviceInfo, OperationKind, Platform, SyncOperation, SyncStatus, UserId,
    VersionConflict,
};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const PLATFORMS: [Platform; 4] = [
    Platform::Ios,
    Platform::Android,
    Platform::Web,
    Platform::Desktop,
];

const KINDS: [OperationKind; 4] = [
    OperationKind::Upload,
    OperationKind::Download,
    OperationKind::Update,
    OperationKind::Delete,
];

const DATA_TYPES: [&str; 4] = ["project", "character", "asset", "settings"];

/// Workload parameters.
#[derive(Debug, Clone)]
pub struct SimulateArgs {
    /// Number of devices.
    pub devices: usize,
    /// Number of sync requests.
    pub operations: usize,
    /// Probability that a transfer fails.
    pub failure_rate: f64,
    /// Probability that a conflict-prone transfer reports a conflict.
    pub conflict_rate: f64,
    /// Probability that a device flips connectivity before a request.
    pub offline_rate: f64,
    /// Seed for the workload and the transport.
    pub seed: u64,
}

impl SimulateArgs {
    fn validate(&self) -> CliResult<()> {
        if self.devices == 0 {
            return Err(CliError::InvalidArgument(
                "at least one device is required".into(),
            ));
        }
        for (name, rate) in [
            ("failure-rate", self.failure_rate),
            ("conflict-rate", self.conflict_rate),
            ("offline-rate", self.offline_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(CliError::InvalidArgument(format!(
                    "{name} must be between 0 and 1, got {rate}"
                )));
            }
        }
        Ok(())
    }
}

/// Outcome of a simulation run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationReport {
    /// Seed used.
    pub seed: u64,
    /// Number of devices.
    pub devices: usize,
    /// Number of sync requests issued.
    pub operations: usize,
    /// Operations that completed, including replays.
    pub completed: usize,
    /// Operations that failed after exhausting their retries.
    pub failed: usize,
    /// Operations left for manual conflict review.
    pub needs_review: usize,
    /// Requests parked in an offline queue.
    pub parked: usize,
    /// Requests rejected because an offline queue was full.
    pub rejected: usize,
    /// Entries still queued after the final drain.
    pub left_in_queues: usize,
    /// Push notifications delivered.
    pub pushes: usize,
    /// Completed share of finished operations.
    pub success_rate: Option<f64>,
    /// Engine counters.
    pub analytics: AnalyticsSnapshot,
}

/// Engine settings tuned for a quick run: millisecond retry delays.
pub fn default_config() -> SyncConfig {
    SyncConfig::new()
        .with_retry(
            RetryConfig::new(3)
                .with_initial_delay(Duration::from_millis(20))
                .with_max_delay(Duration::from_millis(500)),
        )
        .with_transfer_timeout(Duration::from_secs(2))
}

/// A transport whose outcomes come from a seeded generator.
#[derive(Debug)]
struct SimulatedTransport {
    rng: Mutex<StdRng>,
    failure_rate: f64,
    conflict_rate: f64,
    latency: Duration,
}

#[async_trait]
impl Transport for SimulatedTransport {
    async fn transfer(
        &self,
        operation: &SyncOperation,
        _payload: Option<&[u8]>,
    ) -> SyncResult<TransferReceipt> {
        let roll: f64 = self.rng.lock().gen();
        tokio::time::sleep(self.latency).await;

        if roll < self.failure_rate {
            return Err(SyncError::transport_retryable("simulated network failure"));
        }
        if operation.kind.may_conflict() && roll < self.failure_rate + self.conflict_rate {
            return Ok(TransferReceipt::conflicted(VersionConflict::new(
                1,
                2,
                b"local".to_vec(),
                b"remote".to_vec(),
            )));
        }
        Ok(TransferReceipt::ok(operation.payload_size))
    }
}

/// Runs the simulation and returns its report.
///
/// The offline queues are always drained explicitly at the end of the run,
/// so background draining is switched off whatever `config` says.
pub async fn simulate(args: &SimulateArgs, config: SyncConfig) -> CliResult<SimulationReport> {
    args.validate()?;

    let transport = Arc::new(SimulatedTransport {
        rng: Mutex::new(StdRng::seed_from_u64(args.seed.rotate_left(17))),
        failure_rate: args.failure_rate,
        conflict_rate: args.conflict_rate,
        latency: Duration::from_millis(2),
    });
    let push = Arc::new(MemoryPushSender::new());
    let engine = SyncEngine::builder(transport, push.clone())
        .with_config(config.with_drain_on_reconnect(false))
        .build();
    let mut rng = StdRng::seed_from_u64(args.seed);

    let mut devices = Vec::with_capacity(args.devices);
    for i in 0..args.devices {
        let id = DeviceId::new(format!("device-{i}"))?;
        let user = UserId::new(format!("user-{}", i / 2))?;
        let platform = PLATFORMS[rng.gen_range(0..PLATFORMS.len())];
        let online = !rng.gen_bool(args.offline_rate);
        engine
            .register_device(
                platform,
                user,
                DeviceInfo::new(id.clone())
                    .with_push_token(format!("token-{i}"))
                    .with_online(online),
            )
            .await;
        devices.push(id);
    }

    let mut outcomes = Vec::with_capacity(args.operations);
    let mut parked = 0;
    let mut rejected = 0;
    for n in 0..args.operations {
        let device = &devices[rng.gen_range(0..devices.len())];
        if rng.gen_bool(args.offline_rate) {
            let online = engine.get_device(device)?.online;
            engine.set_device_online(device, !online)?;
        }

        let data_type = DATA_TYPES[rng.gen_range(0..DATA_TYPES.len())];
        let kind = KINDS[rng.gen_range(0..KINDS.len())];
        let mut request = SyncRequest::new(device.clone(), data_type, kind, format!("{data_type}-{n}"));
        if matches!(kind, OperationKind::Upload | OperationKind::Update) {
            request = request.with_payload(vec![0u8; rng.gen_range(1..4096)]);
        }

        let op = match engine.start_sync(request).await {
            Ok(op) => op,
            Err(SyncError::QueueOverflow { device_id, limit }) => {
                debug!(device_id = %device_id, limit, "request rejected, queue full");
                rejected += 1;
                continue;
            }
            Err(err) => return Err(err.into()),
        };
        if op.is_queued() {
            parked += 1;
            continue;
        }
        outcomes.push(engine.wait_for_terminal(op.id).await?);
    }

    let mut left_in_queues = 0;
    for device in &devices {
        if !engine.get_device(device)?.online {
            engine.set_device_online(device, true)?;
        }
        outcomes.extend(engine.process_offline_queue(device).await?);
        left_in_queues += engine
            .get_offline_queue(device)?
            .map_or(0, |queue| queue.len());
    }

    let analytics = engine.analytics();
    let report = SimulationReport {
        seed: args.seed,
        devices: args.devices,
        operations: args.operations,
        completed: count(&outcomes, |op| op.status == SyncStatus::Completed),
        failed: count(&outcomes, |op| {
            op.status == SyncStatus::Failed && !op.needs_review
        }),
        needs_review: count(&outcomes, |op| op.needs_review),
        parked,
        rejected,
        left_in_queues,
        pushes: push.sent().len(),
        success_rate: analytics.success_rate(),
        analytics,
    };
    info!(
        seed = report.seed,
        completed = report.completed,
        failed = report.failed,
        "simulation finished"
    );
    Ok(report)
}

fn count(ops: &[SyncOperation], predicate: impl Fn(&SyncOperation) -> bool) -> usize {
    ops.iter().filter(|op| predicate(op)).count()
}

/// Runs the simulate command.
pub async fn run(args: &SimulateArgs, config: SyncConfig, format: &str) -> CliResult<()> {
    if !matches!(format, "text" | "json") {
        return Err(CliError::InvalidArgument(format!(
            "unknown format: {format} (expected text or json)"
        )));
    }

    let report = simulate(args, config).await?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => print_text(&report),
    }
    Ok(())
}

fn print_text(report: &SimulationReport) {
    println!(
        "Simulation (seed {}): {} devices, {} operations",
        report.seed, report.devices, report.operations
    );
    println!();
    println!("  Completed:       {}", report.completed);
    println!("  Failed:          {}", report.failed);
    println!("  Needs review:    {}", report.needs_review);
    println!("  Parked offline:  {}", report.parked);
    println!("  Rejected:        {}", report.rejected);
    println!("  Left in queues:  {}", report.left_in_queues);
    println!("  Retries:         {}", report.analytics.retries);
    println!("  Conflicts:       {}", report.analytics.conflicts);
    println!("  Bytes:           {}", report.analytics.bytes_transferred);
    println!("  Pushes:          {}", report.pushes);
    match report.success_rate {
        Some(rate) => println!("  Success rate:    {:.1}%", rate * 100.0),
        None => println!("  Success rate:    n/a"),
    }
}
