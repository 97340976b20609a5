//! Property-based test generators using proptest.
//!
//! Provides strategies for generating requests, failure scripts and offline
//! dependency graphs that maintain the engine's input invariants.

use mobisync_engine::MockResponse;
use mobisync_protocol::{OperationKind, Priority};
use proptest::prelude::*;

/// Strategy for non-empty entity type tags.
pub fn data_type_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z_]{0,15}").expect("Invalid regex")
}

/// Strategy for non-empty entity IDs.
pub fn data_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z0-9]{1,12}").expect("Invalid regex")
}

/// Strategy for operation kinds.
pub fn kind_strategy() -> impl Strategy<Value = OperationKind> {
    prop_oneof![
        Just(OperationKind::Upload),
        Just(OperationKind::Download),
        Just(OperationKind::Delete),
        Just(OperationKind::Update),
    ]
}

/// Strategy for priorities.
pub fn priority_strategy() -> impl Strategy<Value = Priority> {
    prop_oneof![
        Just(Priority::Low),
        Just(Priority::Medium),
        Just(Priority::High),
        Just(Priority::Urgent),
    ]
}

/// Strategy for payloads.
pub fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..512)
}

/// Strategy for a scripted sequence of transport outcomes.
///
/// Failures are weighted so that retry exhaustion shows up regularly.
pub fn transport_script_strategy(max_len: usize) -> impl Strategy<Value = Vec<MockResponse>> {
    prop::collection::vec(
        prop_oneof![
            2 => Just(MockResponse::Success),
            3 => Just(MockResponse::Failure("injected failure".into())),
        ],
        0..max_len,
    )
}

/// Strategy for an offline dependency graph of up to `max_entries` entries.
///
/// Entry `i` depends only on entries `< i`, so the graph is acyclic and
/// valid for enqueueing in index order.
pub fn dependency_graph_strategy(max_entries: usize) -> impl Strategy<Value = Vec<Vec<usize>>> {
    (1..=max_entries.max(1)).prop_flat_map(|len| {
        (0..len)
            .map(|i| {
                if i == 0 {
                    Just(Vec::new()).boxed()
                } else {
                    prop::collection::btree_set(0..i, 0..=i.min(3))
                        .prop_map(|deps| deps.into_iter().collect())
                        .boxed()
                }
            })
            .collect::<Vec<_>>()
    })
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn dependencies_point_backwards(graph in dependency_graph_strategy(8)) {
            prop_assert!(!graph.is_empty());
            for (i, deps) in graph.iter().enumerate() {
                prop_assert!(deps.iter().all(|&d| d < i));
            }
        }

        #[test]
        fn data_type_is_never_blank(data_type in data_type_strategy()) {
            prop_assert!(!data_type.trim().is_empty());
        }
    }
}
