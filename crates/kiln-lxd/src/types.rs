//! Data types exchanged with the container runtime.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Project used when none is given.
pub const DEFAULT_PROJECT: &str = "default";

/// Remote naming the local runtime daemon.
pub const LOCAL_REMOTE: &str = "local";

/// Environment variables applied to every command run in an instance.
pub type RunEnvironment = BTreeMap<String, String>;

/// Identity of one instance: `(name, project, remote)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceId {
    /// Instance name, unique within the project.
    pub name: String,
    /// Runtime project.
    pub project: String,
    /// Runtime remote the instance lives on.
    pub remote: String,
}

impl InstanceId {
    /// Identify an instance in the default project on the local remote.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            project: DEFAULT_PROJECT.to_string(),
            remote: LOCAL_REMOTE.to_string(),
        }
    }

    /// Set the project.
    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = project.into();
        self
    }

    /// Set the remote.
    pub fn with_remote(mut self, remote: impl Into<String>) -> Self {
        self.remote = remote.into();
        self
    }

    /// The `(project, remote)` pair this instance belongs to.
    pub fn scope(&self) -> Scope {
        Scope {
            project: self.project.clone(),
            remote: self.remote.clone(),
        }
    }

    /// `remote:name`, as accepted by `lxc`.
    pub fn target(&self) -> String {
        format!("{}:{}", self.remote, self.name)
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.remote, self.project, self.name)
    }
}

/// A `(project, remote)` pair that image and profile operations act on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Scope {
    /// Runtime project.
    pub project: String,
    /// Runtime remote.
    pub remote: String,
}

impl Default for Scope {
    fn default() -> Self {
        Self {
            project: DEFAULT_PROJECT.to_string(),
            remote: LOCAL_REMOTE.to_string(),
        }
    }
}

impl Scope {
    /// Create a scope.
    pub fn new(project: impl Into<String>, remote: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            remote: remote.into(),
        }
    }
}

/// Instance status as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum InstanceStatus {
    /// No record exists.
    #[default]
    Absent,
    /// Exists but is not running.
    Stopped,
    /// Running.
    Running,
    /// Any other transient state (`Starting`, `Freezing`, ...).
    Other(String),
}

impl InstanceStatus {
    /// Map the runtime's status string.
    pub fn parse(status: &str) -> Self {
        match status {
            "Running" => Self::Running,
            "Stopped" => Self::Stopped,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => write!(f, "absent"),
            Self::Stopped => write!(f, "stopped"),
            Self::Running => write!(f, "running"),
            Self::Other(s) => write!(f, "{}", s.to_lowercase()),
        }
    }
}

/// One row of `lxc list --format=json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    /// Instance name.
    pub name: String,
    /// Raw status string, e.g. `Running`.
    pub status: String,
    /// Whether the runtime deletes the instance on stop.
    #[serde(default)]
    pub ephemeral: bool,
}

impl InstanceInfo {
    /// Parsed status.
    pub fn status(&self) -> InstanceStatus {
        InstanceStatus::parse(&self.status)
    }
}

/// Request to create and start an instance.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    /// Instance to create.
    pub instance: InstanceId,
    /// Remote holding the image.
    pub image_remote: String,
    /// Image alias or version on that remote.
    pub image: String,
    /// `--config key=value` pairs.
    pub config: BTreeMap<String, String>,
    /// Delete the instance when it stops.
    pub ephemeral: bool,
}

/// Request to push a host file into an instance.
#[derive(Debug, Clone)]
pub struct FilePush {
    /// Host path of the file to push.
    pub source: PathBuf,
    /// Absolute destination path inside the instance.
    pub destination: PathBuf,
    /// Octal file mode, e.g. `0o644`.
    pub mode: u32,
    /// Owner uid inside the instance.
    pub uid: u32,
    /// Owner gid inside the instance.
    pub gid: u32,
}

/// A configured instance device. Only disk devices are inspected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Device type, e.g. `disk`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Host source path (disk devices).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Mount point inside the instance (disk devices).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Device {
    /// A disk device binding `source` on the host to `path` in the instance.
    pub fn disk(source: &Path, path: &Path) -> Self {
        Self {
            kind: "disk".to_string(),
            source: Some(source.to_string_lossy().into_owned()),
            path: Some(path.to_string_lossy().into_owned()),
        }
    }

    /// True if this is a disk device binding exactly `source` to `path`.
    pub fn is_disk_for(&self, source: &Path, path: &Path) -> bool {
        self.kind == "disk"
            && self.source.as_deref() == Some(&*source.to_string_lossy())
            && self.path.as_deref() == Some(&*path.to_string_lossy())
    }

    /// Derive a device name from a mount point: `/root/project` → `_root_project`.
    pub fn name_for(destination: &Path) -> String {
        destination.to_string_lossy().replace('/', "_")
    }
}

/// An image alias entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAlias {
    /// Alias name.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
}

/// One row of `lxc image list --format=json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    /// Image fingerprint.
    #[serde(default)]
    pub fingerprint: String,
    /// Aliases pointing at this image.
    #[serde(default)]
    pub aliases: Vec<ImageAlias>,
}

impl ImageInfo {
    /// True if any alias equals `alias`.
    pub fn has_alias(&self, alias: &str) -> bool {
        self.aliases.iter().any(|a| a.name == alias)
    }
}

/// An image source the runtime can pull from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remote {
    /// Remote name, e.g. `ubuntu-buildd`.
    pub name: String,
    /// Remote address.
    pub addr: String,
    /// Remote protocol, e.g. `simplestreams`.
    pub protocol: String,
}

impl Remote {
    /// Create a remote description.
    pub fn new(
        name: impl Into<String>,
        addr: impl Into<String>,
        protocol: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            addr: addr.into(),
            protocol: protocol.into(),
        }
    }
}

/// One value of `lxc remote list --format=json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteInfo {
    /// Remote address.
    #[serde(rename = "Addr", alias = "addr")]
    pub addr: String,
    /// Remote protocol.
    #[serde(rename = "Protocol", alias = "protocol", default)]
    pub protocol: String,
}

/// Server capabilities relevant to instance configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServerInfo {
    /// Kernel supports seccomp notify, so `mknod` can be intercepted.
    pub seccomp_listener: bool,
}

impl ServerInfo {
    /// Extract capabilities from the JSON of `GET /1.0`.
    pub fn from_json(value: &serde_json::Value) -> Self {
        let seccomp_listener = value
            .pointer("/environment/kernel_features/seccomp_listener")
            .and_then(|v| v.as_str())
            .map(|v| v == "true")
            .unwrap_or(false);
        Self { seccomp_listener }
    }
}

/// `major.minor` runtime version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RuntimeVersion {
    /// Major version.
    pub major: u32,
    /// Minor version.
    pub minor: u32,
}

impl RuntimeVersion {
    /// Create a version.
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Parse the first line of `lxd version`, e.g. `4.0.9` or `5.21.1 LTS`.
    pub fn parse(s: &str) -> Option<Self> {
        let token = s.split_whitespace().next()?;
        let mut parts = token.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = match parts.next() {
            Some(m) => m.parse().ok()?,
            None => 0,
        };
        Some(Self { major, minor })
    }
}

impl fmt::Display for RuntimeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}
