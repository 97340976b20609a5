//! Conflict detection and resolution.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Divergent versions of one entity discovered during a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionConflict {
    /// Version counter on the device.
    pub local_version: u64,
    /// Version counter on the backend.
    pub remote_version: u64,
    /// Device payload.
    pub local: Vec<u8>,
    /// Backend payload.
    pub remote: Vec<u8>,
}

impl VersionConflict {
    /// Creates a new conflict.
    pub fn new(local_version: u64, remote_version: u64, local: Vec<u8>, remote: Vec<u8>) -> Self {
        Self {
            local_version,
            remote_version,
            local,
            remote,
        }
    }
}

/// Which side a resolution kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Winner {
    /// The device version.
    Local,
    /// The backend version.
    Remote,
    /// A merge of both.
    Merged,
}

/// Outcome of resolving a conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The policy picked a value to apply.
    Resolved {
        /// Which side won.
        winner: Winner,
        /// The value to apply.
        value: Vec<u8>,
    },
    /// A human must decide; nothing may be applied automatically.
    NeedsReview,
}

impl Resolution {
    /// Returns the winner, or `None` when review is needed.
    pub fn winner(&self) -> Option<Winner> {
        match self {
            Resolution::Resolved { winner, .. } => Some(*winner),
            Resolution::NeedsReview => None,
        }
    }

    /// Returns true if a human must decide.
    pub fn needs_review(&self) -> bool {
        matches!(self, Resolution::NeedsReview)
    }
}

/// Policy for resolving conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Backend always wins.
    #[default]
    ServerWins,
    /// Device always wins.
    ClientWins,
    /// Manual resolution required.
    Manual,
    /// Delegate to the merge strategy registered for the data type.
    Merge,
}

/// Domain-specific merge for one data type.
///
/// Returning `None` means the versions cannot be merged automatically.
pub trait MergeStrategy: Send + Sync {
    /// Merges the device and backend payloads.
    fn merge(&self, local: &[u8], remote: &[u8]) -> Option<Vec<u8>>;
}

impl<F> MergeStrategy for F
where
    F: Fn(&[u8], &[u8]) -> Option<Vec<u8>> + Send + Sync,
{
    fn merge(&self, local: &[u8], remote: &[u8]) -> Option<Vec<u8>> {
        self(local, remote)
    }
}

/// Maps a policy and two versions to a resolution.
///
/// Holds the merge strategy registry keyed by data type; resolution itself
/// has no side effects.
#[derive(Clone, Default)]
pub struct ConflictResolver {
    strategies: HashMap<String, Arc<dyn MergeStrategy>>,
}

impl ConflictResolver {
    /// Creates a resolver with no merge strategies.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the merge strategy for a data type, replacing any previous one.
    pub fn register_strategy(
        &mut self,
        data_type: impl Into<String>,
        strategy: Arc<dyn MergeStrategy>,
    ) {
        self.strategies.insert(data_type.into(), strategy);
    }

    /// Returns true if a merge strategy exists for the data type.
    pub fn has_strategy(&self, data_type: &str) -> bool {
        self.strategies.contains_key(data_type)
    }

    /// Resolves a conflict.
    pub fn resolve(
        &self,
        policy: ConflictPolicy,
        data_type: &str,
        conflict: &VersionConflict,
    ) -> Resolution {
        match policy {
            ConflictPolicy::ClientWins => Resolution::Resolved {
                winner: Winner::Local,
                value: conflict.local.clone(),
            },
            ConflictPolicy::ServerWins => Resolution::Resolved {
                winner: Winner::Remote,
                value: conflict.remote.clone(),
            },
            ConflictPolicy::Manual => Resolution::NeedsReview,
            ConflictPolicy::Merge => self
                .strategies
                .get(data_type)
                .and_then(|strategy| strategy.merge(&conflict.local, &conflict.remote))
                .map_or(Resolution::NeedsReview, |value| Resolution::Resolved {
                    winner: Winner::Merged,
                    value,
                }),
        }
    }
}

impl fmt::Debug for ConflictResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.strategies.keys().collect();
        types.sort();
        f.debug_struct("ConflictResolver")
            .field("strategies", &types)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conflict() -> VersionConflict {
        VersionConflict::new(3, 4, vec![1, 2], vec![3, 4])
    }

    fn concat(local: &[u8], remote: &[u8]) -> Option<Vec<u8>> {
        Some([local, remote].concat())
    }

    #[test]
    fn fixed_policies() {
        let resolver = ConflictResolver::new();

        assert_eq!(
            resolver.resolve(ConflictPolicy::ClientWins, "project", &conflict()),
            Resolution::Resolved {
                winner: Winner::Local,
                value: vec![1, 2]
            }
        );
        assert_eq!(
            resolver.resolve(ConflictPolicy::ServerWins, "project", &conflict()),
            Resolution::Resolved {
                winner: Winner::Remote,
                value: vec![3, 4]
            }
        );
    }

    #[test]
    fn manual_never_picks_a_winner() {
        let mut resolver = ConflictResolver::new();
        resolver.register_strategy("project", Arc::new(concat));

        let resolution = resolver.resolve(ConflictPolicy::Manual, "project", &conflict());
        assert!(resolution.needs_review());
        assert_eq!(resolution.winner(), None);
    }

    #[test]
    fn merge_uses_registered_strategy() {
        let mut resolver = ConflictResolver::new();
        resolver.register_strategy("project", Arc::new(concat));
        assert!(resolver.has_strategy("project"));

        assert_eq!(
            resolver.resolve(ConflictPolicy::Merge, "project", &conflict()),
            Resolution::Resolved {
                winner: Winner::Merged,
                value: vec![1, 2, 3, 4]
            }
        );
    }

    #[test]
    fn merge_without_strategy_behaves_as_manual() {
        let resolver = ConflictResolver::new();
        assert!(resolver
            .resolve(ConflictPolicy::Merge, "character", &conflict())
            .needs_review());
    }

    #[test]
    fn failed_merge_needs_review() {
        let mut resolver = ConflictResolver::new();
        resolver.register_strategy(
            "character",
            Arc::new(|_: &[u8], _: &[u8]| -> Option<Vec<u8>> { None }),
        );
        assert!(resolver
            .resolve(ConflictPolicy::Merge, "character", &conflict())
            .needs_review());
    }
}
