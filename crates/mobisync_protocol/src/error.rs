//! Error types for protocol validation.

use thiserror::Error;

/// Result type for protocol validation.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised when a protocol value is malformed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// An identifier was empty or contained only whitespace.
    #[error("invalid {kind} identifier: {value:?}")]
    InvalidIdentifier {
        /// Which identifier was rejected.
        kind: &'static str,
        /// The rejected value.
        value: String,
    },

    /// A sync request named no data type.
    #[error("data type must not be empty")]
    EmptyDataType,

    /// An offline operation depends on an entry that is neither queued nor
    /// completed.
    #[error("offline operation {id} cannot depend on {dependency}")]
    InvalidDependency {
        /// The operation being enqueued.
        id: u64,
        /// The rejected dependency.
        dependency: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ProtocolError::InvalidIdentifier {
            kind: "device",
            value: " ".into(),
        };
        assert!(err.to_string().contains("device"));

        assert_eq!(
            ProtocolError::InvalidDependency {
                id: 7,
                dependency: 7
            }
            .to_string(),
            "offline operation 7 cannot depend on 7"
        );
    }
}
