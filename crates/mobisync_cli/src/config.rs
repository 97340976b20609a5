//! JSON configuration file support.
//!
//! Every field is optional. Durations are given in milliseconds.
//!
//! ```json
//! {
//!   "max_retries": 5,
//!   "initial_delay_ms": 100,
//!   "max_delay_ms": 2000,
//!   "conflict_policy": "client_wins"
//! }
//! ```

use crate::error::{CliError, CliResult};
use mobisync_engine::SyncConfig;
use mobisync_protocol::ConflictPolicy;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Engine settings read from a file.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    /// Maximum failed attempts per operation.
    pub max_retries: Option<u32>,
    /// Delay before the first retry.
    pub initial_delay_ms: Option<u64>,
    /// Retry delay ceiling.
    pub max_delay_ms: Option<u64>,
    /// Backoff multiplier.
    pub backoff_multiplier: Option<f64>,
    /// Whether retry delays get jitter.
    pub add_jitter: Option<bool>,
    /// Default offline queue limit per device.
    pub offline_queue_size: Option<usize>,
    /// Conflict policy.
    pub conflict_policy: Option<ConflictPolicy>,
    /// Transfer timeout.
    pub transfer_timeout_ms: Option<u64>,
}

impl FileConfig {
    /// Reads and parses a configuration file.
    pub fn load(path: &Path) -> CliResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| CliError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text).map_err(|source| CliError::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parses configuration text.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Overlays the fields that are set onto `base`.
    pub fn apply(&self, mut base: SyncConfig) -> SyncConfig {
        if let Some(max_retries) = self.max_retries {
            base.retry.max_retries = max_retries.max(1);
        }
        if let Some(ms) = self.initial_delay_ms {
            base.retry.initial_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.max_delay_ms {
            base.retry.max_delay = Duration::from_millis(ms);
        }
        if let Some(multiplier) = self.backoff_multiplier {
            base.retry.backoff_multiplier = multiplier;
        }
        if let Some(jitter) = self.add_jitter {
            base.retry.add_jitter = jitter;
        }
        if let Some(size) = self.offline_queue_size {
            base.offline_queue_size = size;
        }
        if let Some(policy) = self.conflict_policy {
            base.conflict_policy = policy;
        }
        if let Some(ms) = self.transfer_timeout_ms {
            base.transfer_timeout = Duration::from_millis(ms);
        }
        base
    }
}
