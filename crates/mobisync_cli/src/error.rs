//! CLI error type.

use mobisync_engine::SyncError;
use mobisync_protocol::ProtocolError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// Errors reported by CLI commands.
#[derive(Error, Debug)]
pub enum CliError {
    /// A file could not be read.
    #[error("cannot read {path:?}: {source}")]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A configuration file is malformed.
    #[error("invalid config {path:?}: {source}")]
    Config {
        /// File path.
        path: PathBuf,
        /// Parse error.
        source: serde_json::Error,
    },

    /// A command-line argument is out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Output could not be rendered.
    #[error("output error: {0}")]
    Output(#[from] serde_json::Error),

    /// The engine rejected a request.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// An identifier was malformed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
