//! Error types for kiln-core.

use kiln_lxd::RuntimeVersion;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for kiln-core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur while provisioning or using an environment.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An administrative runtime operation failed
    #[error("runtime error: {0}")]
    Runtime(#[from] kiln_lxd::LxdError),

    /// A registered remote does not match the expected configuration
    #[error(
        "remote configuration does not match for {name:?}: expected {expected_addr} ({expected_protocol}), found {actual_addr} ({actual_protocol})"
    )]
    RemoteMismatch {
        /// Remote name
        name: String,
        /// Expected address
        expected_addr: String,
        /// Registered address
        actual_addr: String,
        /// Expected protocol
        expected_protocol: String,
        /// Registered protocol
        actual_protocol: String,
    },

    /// The installed runtime is older than the supported floor
    #[error("runtime version {found} is unsupported, must be >= {minimum}")]
    UnsupportedVersion {
        /// Installed version
        found: RuntimeVersion,
        /// Minimum supported version
        minimum: RuntimeVersion,
    },

    /// A command run in the environment exited non-zero
    #[error("command failed with exit code {exit_code}: {command}: {stderr}")]
    CommandFailed {
        /// Shell-quoted command line
        command: String,
        /// Exit code (-1 when terminated by a signal)
        exit_code: i32,
        /// Captured standard error
        stderr: String,
    },

    /// A readiness poll exhausted its budget under the abort policy
    #[error("{check} not ready after {waited:?}")]
    ReadinessTimeout {
        /// What was being waited for
        check: String,
        /// Total time budget
        waited: Duration,
    },

    /// A sync source does not exist
    #[error("source {0} not found")]
    NotFound(PathBuf),

    /// The environment cannot bind-mount host directories
    #[error("environment does not support mounts")]
    MountUnsupported,

    /// A required host command is missing
    #[error("missing required command {0:?}")]
    MissingCommand(String),

    /// Invalid provider state for operation
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state
        expected: String,
        /// Actual state
        actual: String,
    },

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
