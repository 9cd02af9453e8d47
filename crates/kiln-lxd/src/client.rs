//! The runtime client contract.

use crate::error::Result;
use crate::types::{
    Device, FilePush, ImageInfo, InstanceId, InstanceInfo, LaunchRequest, Remote, RemoteInfo,
    RunEnvironment, RuntimeVersion, Scope, ServerInfo,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use tokio::process::Command;

/// Administrative interface to a container runtime.
///
/// Every call is a blocking round-trip against the runtime; implementations
/// must not cache instance state between calls.
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// Install the runtime if it is missing.
    async fn ensure_installed(&self) -> Result<()>;

    /// Version of the installed runtime daemon.
    async fn version(&self) -> Result<RuntimeVersion>;

    /// Create and start an instance.
    async fn launch(&self, request: &LaunchRequest) -> Result<()>;

    /// Start a stopped instance.
    async fn start(&self, instance: &InstanceId) -> Result<()>;

    /// Stop a running instance. Ephemeral instances are deleted by the runtime.
    async fn stop(&self, instance: &InstanceId) -> Result<()>;

    /// Delete an instance. Fails on a running instance unless `force`.
    async fn delete(&self, instance: &InstanceId, force: bool) -> Result<()>;

    /// List instances whose name starts with `instance.name`.
    ///
    /// The filter is a prefix match; callers needing one instance must
    /// compare names exactly.
    async fn list(&self, instance: &InstanceId) -> Result<Vec<InstanceInfo>>;

    /// Prepare a command that runs `command` inside the instance.
    ///
    /// The returned process is not spawned; the caller wires stdio.
    fn exec(
        &self,
        instance: &InstanceId,
        command: &[String],
        env: &RunEnvironment,
        cwd: Option<&str>,
    ) -> Command;

    /// Push a host file into the instance, creating parent directories.
    async fn file_push(&self, instance: &InstanceId, push: &FilePush) -> Result<()>;

    /// Pull a file or directory out of the instance.
    async fn file_pull(
        &self,
        instance: &InstanceId,
        source: &Path,
        destination: &Path,
        recursive: bool,
    ) -> Result<()>;

    /// Devices configured directly on the instance.
    async fn device_show(&self, instance: &InstanceId) -> Result<BTreeMap<String, Device>>;

    /// Add a device to the instance.
    async fn device_add(&self, instance: &InstanceId, name: &str, device: &Device) -> Result<()>;

    /// Images visible in `scope`.
    async fn image_list(&self, scope: &Scope) -> Result<Vec<ImageInfo>>;

    /// Publish the instance as an image under `alias`, replacing any
    /// existing image holding that alias.
    async fn publish(&self, instance: &InstanceId, alias: &str) -> Result<()>;

    /// Delete the image holding `alias`.
    async fn image_delete(&self, scope: &Scope, alias: &str) -> Result<()>;

    /// Registered remotes by name.
    async fn remote_list(&self) -> Result<BTreeMap<String, RemoteInfo>>;

    /// Register a remote.
    async fn remote_add(&self, remote: &Remote) -> Result<()>;

    /// Profile configuration.
    async fn profile_show(&self, scope: &Scope, name: &str) -> Result<serde_json::Value>;

    /// Replace profile configuration.
    async fn profile_edit(&self, scope: &Scope, name: &str, config: &serde_json::Value)
        -> Result<()>;

    /// Server capabilities of `remote`.
    async fn server_info(&self, remote: &str) -> Result<ServerInfo>;
}
