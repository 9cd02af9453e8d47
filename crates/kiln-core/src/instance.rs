//! A container instance managed through a [`RuntimeClient`].

use crate::error::{CoreError, Result};
use crate::executor::{ExecOptions, Executor};
use async_trait::async_trait;
use kiln_lxd::{
    quote_command, Device, FilePush, InstanceId, InstanceStatus, LaunchRequest, RunEnvironment,
    RuntimeClient, LOCAL_REMOTE,
};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::process::Command;

/// Mode and ownership used for files pushed with [`Executor::push_file`].
const PUSH_MODE: u32 = 0o644;

/// One container instance.
///
/// The runtime is the source of truth: every query re-fetches, and the
/// status snapshot kept here is informational only.
pub struct Instance {
    id: InstanceId,
    runtime: Arc<dyn RuntimeClient>,
    run_environment: RunEnvironment,
    status: Mutex<InstanceStatus>,
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.id)
            .field("status", &self.last_status())
            .finish()
    }
}

impl Instance {
    /// Handle to the instance `id`. Nothing is created until [`launch`](Self::launch).
    pub fn new(id: InstanceId, runtime: Arc<dyn RuntimeClient>, run_environment: RunEnvironment) -> Self {
        Self {
            id,
            runtime,
            run_environment,
            status: Mutex::new(InstanceStatus::Absent),
        }
    }

    /// Instance identity.
    pub fn id(&self) -> &InstanceId {
        &self.id
    }

    /// Default run environment.
    pub fn run_environment(&self) -> &RunEnvironment {
        &self.run_environment
    }

    /// Status seen by the most recent query.
    pub fn last_status(&self) -> InstanceStatus {
        self.status
            .lock()
            .map(|s| s.clone())
            .unwrap_or(InstanceStatus::Absent)
    }

    fn remember(&self, status: InstanceStatus) {
        if let Ok(mut current) = self.status.lock() {
            *current = status;
        }
    }

    /// Current status from the runtime.
    pub async fn status(&self) -> Result<InstanceStatus> {
        let listed = self.runtime.list(&self.id).await?;
        let status = listed
            .iter()
            .find(|info| info.name == self.id.name)
            .map(|info| info.status())
            .unwrap_or(InstanceStatus::Absent);
        tracing::debug!(instance = %self.id, status = %status, "Queried instance status");
        self.remember(status.clone());
        Ok(status)
    }

    /// Create and start the instance from `image_remote:image`.
    pub async fn launch(&self, image: &str, image_remote: &str, ephemeral: bool) -> Result<()> {
        let uid = nix::unistd::getuid().as_raw();
        let mut config = BTreeMap::from([("raw.idmap".to_string(), format!("both {uid} 0"))]);
        if self.runtime.server_info(&self.id.remote).await?.seccomp_listener {
            config.insert(
                "security.syscalls.intercept.mknod".to_string(),
                "true".to_string(),
            );
        }

        tracing::info!(
            instance = %self.id,
            image = %format!("{image_remote}:{image}"),
            ephemeral,
            "Launching instance"
        );
        self.runtime
            .launch(&LaunchRequest {
                instance: self.id.clone(),
                image_remote: image_remote.to_string(),
                image: image.to_string(),
                config,
                ephemeral,
            })
            .await?;
        self.remember(InstanceStatus::Running);
        Ok(())
    }

    /// Start the stopped instance.
    pub async fn start(&self) -> Result<()> {
        tracing::info!(instance = %self.id, "Starting instance");
        self.runtime.start(&self.id).await?;
        self.remember(InstanceStatus::Running);
        Ok(())
    }

    /// Stop the running instance. An ephemeral instance is gone afterwards.
    pub async fn stop(&self) -> Result<()> {
        tracing::info!(instance = %self.id, "Stopping instance");
        self.runtime.stop(&self.id).await?;
        self.remember(InstanceStatus::Stopped);
        Ok(())
    }

    /// Delete the instance. Without `force` a running instance is refused.
    pub async fn delete(&self, force: bool) -> Result<()> {
        tracing::info!(instance = %self.id, force, "Deleting instance");
        self.runtime.delete(&self.id, force).await?;
        self.remember(InstanceStatus::Absent);
        Ok(())
    }

    /// True if a disk device binds exactly `source` to `destination`.
    pub async fn is_mounted(&self, source: &Path, destination: &Path) -> Result<bool> {
        let devices = self.runtime.device_show(&self.id).await?;
        Ok(devices
            .values()
            .any(|device| device.is_disk_for(source, destination)))
    }
}

#[async_trait]
impl Executor for Instance {
    fn describe(&self) -> String {
        self.id.to_string()
    }

    fn prepare_command(&self, command: &[String], options: &ExecOptions) -> Command {
        let env = options.env.as_ref().unwrap_or(&self.run_environment);
        tracing::info!(
            instance = %self.id,
            command = %quote_command(command),
            "Executing in instance"
        );
        self.runtime
            .exec(&self.id, command, env, options.cwd.as_deref())
    }

    async fn create_file(
        &self,
        destination: &Path,
        content: &[u8],
        mode: u32,
        uid: u32,
        gid: u32,
    ) -> Result<()> {
        // Removed when dropped, including on the error paths below.
        let mut staging = tempfile::NamedTempFile::new()?;
        staging.write_all(content)?;
        staging.flush()?;

        tracing::debug!(instance = %self.id, destination = %destination.display(), "Creating file");
        self.runtime
            .file_push(
                &self.id,
                &FilePush {
                    source: staging.path().to_path_buf(),
                    destination: destination.to_path_buf(),
                    mode,
                    uid,
                    gid,
                },
            )
            .await?;
        Ok(())
    }

    async fn push_file(&self, source: &Path, destination: &Path) -> Result<()> {
        if !tokio::fs::try_exists(source).await? {
            return Err(CoreError::NotFound(source.to_path_buf()));
        }
        self.runtime
            .file_push(
                &self.id,
                &FilePush {
                    source: source.to_path_buf(),
                    destination: destination.to_path_buf(),
                    mode: PUSH_MODE,
                    uid: 0,
                    gid: 0,
                },
            )
            .await?;
        Ok(())
    }

    async fn pull_file(&self, source: &Path, destination: &Path) -> Result<()> {
        self.runtime
            .file_pull(&self.id, source, destination, false)
            .await?;
        Ok(())
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self.status().await? != InstanceStatus::Absent)
    }

    async fn is_running(&self) -> Result<bool> {
        Ok(self.status().await? == InstanceStatus::Running)
    }

    fn supports_mount(&self) -> bool {
        self.id.remote == LOCAL_REMOTE
    }

    async fn mount(&self, source: &Path, destination: &Path) -> Result<()> {
        if !self.supports_mount() {
            return Err(CoreError::MountUnsupported);
        }
        if self.is_mounted(source, destination).await? {
            tracing::debug!(instance = %self.id, destination = %destination.display(), "Already mounted");
            return Ok(());
        }

        let name = Device::name_for(destination);
        tracing::info!(
            instance = %self.id,
            source = %source.display(),
            destination = %destination.display(),
            device = %name,
            "Mounting host directory"
        );
        self.runtime
            .device_add(&self.id, &name, &Device::disk(source, destination))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, FakeRuntime};

    fn instance(fake: &Arc<FakeRuntime>, name: &str) -> Instance {
        Instance::new(InstanceId::new(name), fake.clone(), RunEnvironment::new())
    }

    #[tokio::test]
    async fn test_exists_filters_prefix_matches() {
        let fake = Arc::new(FakeRuntime::new());
        fake.add_instance("builder-2", true, false);

        let inst = instance(&fake, "builder");
        assert!(!inst.exists().await.unwrap());
        assert!(!inst.is_running().await.unwrap());
        assert_eq!(inst.last_status(), InstanceStatus::Absent);
    }

    #[tokio::test]
    async fn test_launch_sets_idmap() {
        let fake = Arc::new(FakeRuntime::new());
        let inst = instance(&fake, "builder");
        inst.launch("20.04", "ubuntu-buildd", true).await.unwrap();

        assert!(inst.is_running().await.unwrap());
        let config = fake.launch_config("builder").unwrap();
        let uid = nix::unistd::getuid().as_raw();
        assert_eq!(config["raw.idmap"], format!("both {uid} 0"));
        assert!(!config.contains_key("security.syscalls.intercept.mknod"));
    }

    #[tokio::test]
    async fn test_launch_intercepts_mknod_with_seccomp_listener() {
        let fake = Arc::new(FakeRuntime::new().with_seccomp_listener(true));
        let inst = instance(&fake, "builder");
        inst.launch("20.04", "ubuntu-buildd", false).await.unwrap();

        let config = fake.launch_config("builder").unwrap();
        assert_eq!(config["security.syscalls.intercept.mknod"], "true");
    }

    #[tokio::test]
    async fn test_ephemeral_stop_removes_instance() {
        let fake = Arc::new(FakeRuntime::new());
        let inst = instance(&fake, "builder");
        inst.launch("20.04", "ubuntu-buildd", true).await.unwrap();
        inst.stop().await.unwrap();
        assert!(!inst.exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_persistent_stop_keeps_instance() {
        let fake = Arc::new(FakeRuntime::new());
        let inst = instance(&fake, "builder");
        inst.launch("20.04", "ubuntu-buildd", false).await.unwrap();
        inst.stop().await.unwrap();
        assert!(inst.exists().await.unwrap());
        assert!(!inst.is_running().await.unwrap());
        assert_eq!(inst.last_status(), InstanceStatus::Stopped);
    }

    #[tokio::test]
    async fn test_delete_running_requires_force() {
        let fake = Arc::new(FakeRuntime::new());
        let inst = instance(&fake, "builder");
        inst.launch("20.04", "ubuntu-buildd", false).await.unwrap();

        assert!(matches!(inst.delete(false).await, Err(CoreError::Runtime(_))));
        inst.delete(true).await.unwrap();
        assert!(!inst.exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_mount_is_idempotent() {
        let fake = Arc::new(FakeRuntime::new());
        let inst = instance(&fake, "builder");
        inst.launch("20.04", "ubuntu-buildd", false).await.unwrap();

        let (src, dst) = (Path::new("/home/me/project"), Path::new("/root/project"));
        inst.mount(src, dst).await.unwrap();
        inst.mount(src, dst).await.unwrap();

        assert!(inst.is_mounted(src, dst).await.unwrap());
        let adds: Vec<_> = fake
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::DeviceAdd { .. }))
            .collect();
        assert_eq!(
            adds,
            vec![Call::DeviceAdd {
                name: "builder".into(),
                device_name: "_root_project".into()
            }]
        );
    }

    #[tokio::test]
    async fn test_mount_unsupported_on_remote() {
        let fake = Arc::new(FakeRuntime::new());
        let inst = Instance::new(
            InstanceId::new("builder").with_remote("cloud"),
            fake.clone(),
            RunEnvironment::new(),
        );
        assert!(!inst.supports_mount());
        let err = inst
            .mount(Path::new("/a"), Path::new("/b"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::MountUnsupported));
    }

    #[tokio::test]
    async fn test_create_file_pushes_once_and_cleans_staging() {
        let fake = Arc::new(FakeRuntime::new());
        let inst = instance(&fake, "builder");
        inst.launch("20.04", "ubuntu-buildd", false).await.unwrap();

        inst.create_file(Path::new("/etc/hostname"), b"kiln-builder\n", 0o644, 0, 0)
            .await
            .unwrap();

        let pushes: Vec<_> = fake
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::FilePush {
                    source,
                    destination,
                    content,
                    mode,
                    ..
                } => Some((source, destination, content, mode)),
                _ => None,
            })
            .collect();
        assert_eq!(pushes.len(), 1);
        let (source, destination, content, mode) = &pushes[0];
        assert_eq!(destination, Path::new("/etc/hostname"));
        assert_eq!(content, b"kiln-builder\n");
        assert_eq!(*mode, 0o644);
        assert!(!source.exists());
    }

    #[tokio::test]
    async fn test_execute_run_applies_default_environment() {
        let fake = Arc::new(FakeRuntime::new());
        let env = RunEnvironment::from([
            ("PATH".to_string(), crate::host::DEFAULT_PATH.to_string()),
            ("DEBIAN_FRONTEND".to_string(), "noninteractive".to_string()),
        ]);
        let inst = Instance::new(InstanceId::new("builder"), fake.clone(), env);
        inst.launch("20.04", "ubuntu-buildd", false).await.unwrap();

        let output = inst
            .execute_run(
                &["sh".to_string(), "-c".to_string(), "echo $DEBIAN_FRONTEND".to_string()],
                &ExecOptions::checked(),
            )
            .await
            .unwrap();
        assert_eq!(output.stdout_lossy(), "noninteractive\n");
    }
}
