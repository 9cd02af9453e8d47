//! Error types for kiln-lxd.

use thiserror::Error;

/// Result type alias for kiln-lxd operations.
pub type Result<T> = std::result::Result<T, LxdError>;

/// Errors that can occur while driving the container runtime.
#[derive(Debug, Error)]
pub enum LxdError {
    /// An administrative command exited non-zero
    #[error("command failed with exit code {exit_code}: {command}: {stderr}")]
    CommandFailed {
        /// Shell-quoted command line
        command: String,
        /// Exit code (-1 when terminated by a signal)
        exit_code: i32,
        /// Captured standard error
        stderr: String,
    },

    /// The command could not be spawned at all
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        /// Program that failed to start
        program: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Runtime output could not be decoded
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Runtime output had an unexpected shape
    #[error("parse error: {0}")]
    Parse(String),

    /// The runtime is not installed and could not be installed
    #[error("runtime not installed: {0}")]
    NotInstalled(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
