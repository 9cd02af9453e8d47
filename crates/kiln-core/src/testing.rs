//! In-memory [`RuntimeClient`] for tests.
//!
//! [`FakeRuntime`] keeps instances, images and remotes in a map and records
//! every call. `exec` runs the command on the host, unless a script was
//! registered for its prefix, in which case `sh -c <script>` runs instead.
//! [`FakeRuntime::with_bootstrap_scripts`] stubs out the tools the image
//! bootstrap touches so it never reaches the host's systemd or apt.

use kiln_lxd::{
    quote_command, Device, FilePush, ImageAlias, ImageInfo, InstanceId, InstanceInfo,
    LaunchRequest, LxdError, Remote, RemoteInfo, Result, RunEnvironment, RuntimeClient,
    RuntimeVersion, Scope, ServerInfo,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tokio::process::Command;

/// A recorded runtime call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    EnsureInstalled,
    Launch {
        name: String,
        image: String,
        image_remote: String,
        ephemeral: bool,
    },
    Start(String),
    Stop(String),
    Delete {
        name: String,
        force: bool,
    },
    DeviceAdd {
        name: String,
        device_name: String,
    },
    Publish {
        name: String,
        alias: String,
    },
    ImageDelete(String),
    RemoteAdd(String),
    FilePush {
        source: PathBuf,
        destination: PathBuf,
        content: Vec<u8>,
        mode: u32,
        uid: u32,
        gid: u32,
    },
    FilePull {
        source: PathBuf,
        destination: PathBuf,
    },
    Exec(Vec<String>),
}

#[derive(Debug, Clone)]
struct FakeInstance {
    running: bool,
    ephemeral: bool,
    config: BTreeMap<String, String>,
    devices: BTreeMap<String, Device>,
}

#[derive(Debug, Default)]
struct State {
    instances: BTreeMap<String, FakeInstance>,
    images: Vec<String>,
    remotes: BTreeMap<String, RemoteInfo>,
    profiles: BTreeMap<String, serde_json::Value>,
    scripts: Vec<(Vec<String>, String)>,
    calls: Vec<Call>,
}

/// Fake container runtime.
#[derive(Debug)]
pub struct FakeRuntime {
    state: Mutex<State>,
    version: RuntimeVersion,
    seccomp_listener: bool,
    host_filesystem: bool,
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRuntime {
    /// Empty runtime reporting version 5.21 with the `local` remote registered.
    pub fn new() -> Self {
        let mut state = State::default();
        state.remotes.insert(
            "local".to_string(),
            RemoteInfo {
                addr: "unix://".to_string(),
                protocol: "lxd".to_string(),
            },
        );
        Self {
            state: Mutex::new(state),
            version: RuntimeVersion::new(5, 21),
            seccomp_listener: false,
            host_filesystem: false,
        }
    }

    /// Report `version` as the installed runtime.
    pub fn with_version(mut self, version: RuntimeVersion) -> Self {
        self.version = version;
        self
    }

    /// Report seccomp listener support.
    pub fn with_seccomp_listener(mut self, enabled: bool) -> Self {
        self.seccomp_listener = enabled;
        self
    }

    /// Make file push and pull copy real host files.
    pub fn with_host_filesystem(mut self) -> Self {
        self.host_filesystem = true;
        self
    }

    /// Scripts answering every step of the image bootstrap successfully.
    pub fn with_bootstrap_scripts(self) -> Self {
        for tool in ["systemctl", "ln", "getent", "apt-get", "snap"] {
            self.script(&[tool], "true");
        }
        self.script(&["systemctl", "is-system-running"], "echo running");
        self
    }

    /// Run `sh -c <script>` for commands starting with `prefix`.
    /// Later registrations win.
    pub fn script(&self, prefix: &[&str], script: &str) {
        self.lock().scripts.insert(
            0,
            (
                prefix.iter().map(|s| s.to_string()).collect(),
                script.to_string(),
            ),
        );
    }

    /// Register an existing instance.
    pub fn add_instance(&self, name: &str, running: bool, ephemeral: bool) {
        self.lock().instances.insert(
            name.to_string(),
            FakeInstance {
                running,
                ephemeral,
                config: BTreeMap::new(),
                devices: BTreeMap::new(),
            },
        );
    }

    /// Register an image alias.
    pub fn add_image(&self, alias: &str) {
        self.lock().images.push(alias.to_string());
    }

    /// Register a remote.
    pub fn add_remote(&self, remote: &Remote) {
        self.lock().remotes.insert(
            remote.name.clone(),
            RemoteInfo {
                addr: remote.addr.clone(),
                protocol: remote.protocol.clone(),
            },
        );
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Number of recorded calls matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| predicate(c)).count()
    }

    /// Commands passed to `exec`, in order.
    pub fn exec_log(&self) -> Vec<Vec<String>> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Exec(command) => Some(command.clone()),
                _ => None,
            })
            .collect()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Launch config of an existing instance.
    pub fn launch_config(&self, name: &str) -> Option<BTreeMap<String, String>> {
        self.lock().instances.get(name).map(|i| i.config.clone())
    }

    /// Whether `name` exists.
    pub fn has_instance(&self, name: &str) -> bool {
        self.lock().instances.contains_key(name)
    }

    /// Whether an image holds `alias`.
    pub fn has_image(&self, alias: &str) -> bool {
        self.lock().images.iter().any(|a| a == alias)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // a panicking test poisons the lock; the data is still usable
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, call: Call) {
        self.lock().calls.push(call);
    }
}

fn fail(command: String, stderr: &str) -> LxdError {
    LxdError::CommandFailed {
        command,
        exit_code: 1,
        stderr: stderr.to_string(),
    }
}

#[async_trait]
impl RuntimeClient for FakeRuntime {
    async fn ensure_installed(&self) -> Result<()> {
        self.record(Call::EnsureInstalled);
        Ok(())
    }

    async fn version(&self) -> Result<RuntimeVersion> {
        Ok(self.version)
    }

    async fn launch(&self, request: &LaunchRequest) -> Result<()> {
        let name = request.instance.name.clone();
        self.record(Call::Launch {
            name: name.clone(),
            image: request.image.clone(),
            image_remote: request.image_remote.clone(),
            ephemeral: request.ephemeral,
        });
        let mut state = self.lock();
        if state.instances.contains_key(&name) {
            return Err(fail(format!("launch {name}"), "Instance already exists"));
        }
        state.instances.insert(
            name,
            FakeInstance {
                running: true,
                ephemeral: request.ephemeral,
                config: request.config.clone(),
                devices: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn start(&self, instance: &InstanceId) -> Result<()> {
        self.record(Call::Start(instance.name.clone()));
        let mut state = self.lock();
        match state.instances.get_mut(&instance.name) {
            Some(i) if !i.running => {
                i.running = true;
                Ok(())
            }
            Some(_) => Err(fail(format!("start {instance}"), "The instance is already running")),
            None => Err(fail(format!("start {instance}"), "Instance not found")),
        }
    }

    async fn stop(&self, instance: &InstanceId) -> Result<()> {
        self.record(Call::Stop(instance.name.clone()));
        let mut state = self.lock();
        let ephemeral = match state.instances.get_mut(&instance.name) {
            Some(i) if i.running => {
                i.running = false;
                i.ephemeral
            }
            Some(_) => {
                return Err(fail(format!("stop {instance}"), "The instance is already stopped"))
            }
            None => return Err(fail(format!("stop {instance}"), "Instance not found")),
        };
        if ephemeral {
            state.instances.remove(&instance.name);
        }
        Ok(())
    }

    async fn delete(&self, instance: &InstanceId, force: bool) -> Result<()> {
        self.record(Call::Delete {
            name: instance.name.clone(),
            force,
        });
        let mut state = self.lock();
        match state.instances.get(&instance.name) {
            Some(i) if i.running && !force => Err(fail(
                format!("delete {instance}"),
                "The instance is currently running, stop it first or use --force",
            )),
            Some(_) => {
                state.instances.remove(&instance.name);
                Ok(())
            }
            None => Err(fail(format!("delete {instance}"), "Instance not found")),
        }
    }

    async fn list(&self, instance: &InstanceId) -> Result<Vec<InstanceInfo>> {
        Ok(self
            .lock()
            .instances
            .iter()
            .filter(|(name, _)| name.starts_with(&instance.name))
            .map(|(name, i)| InstanceInfo {
                name: name.clone(),
                status: if i.running { "Running" } else { "Stopped" }.to_string(),
                ephemeral: i.ephemeral,
            })
            .collect())
    }

    fn exec(
        &self,
        _instance: &InstanceId,
        command: &[String],
        env: &RunEnvironment,
        cwd: Option<&str>,
    ) -> Command {
        let mut state = self.lock();
        state.calls.push(Call::Exec(command.to_vec()));

        let script = state
            .scripts
            .iter()
            .find(|(prefix, _)| command.starts_with(prefix))
            .map(|(_, script)| script.clone());

        let mut cmd = match script {
            Some(script) => {
                let mut cmd = Command::new("sh");
                cmd.args(["-c", &script]);
                cmd
            }
            None => {
                let (program, args) = command
                    .split_first()
                    .map(|(p, rest)| (p.as_str(), rest))
                    .unwrap_or(("true", &[]));
                let mut cmd = Command::new(program);
                cmd.args(args);
                cmd
            }
        };
        cmd.env_clear()
            .env("PATH", crate::host::DEFAULT_PATH)
            .envs(env);
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        cmd
    }

    async fn file_push(&self, _instance: &InstanceId, push: &FilePush) -> Result<()> {
        let content = std::fs::read(&push.source)?;
        self.record(Call::FilePush {
            source: push.source.clone(),
            destination: push.destination.clone(),
            content,
            mode: push.mode,
            uid: push.uid,
            gid: push.gid,
        });
        if self.host_filesystem {
            if let Some(parent) = push.destination.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(&push.source, &push.destination)?;
        }
        Ok(())
    }

    async fn file_pull(
        &self,
        _instance: &InstanceId,
        source: &Path,
        destination: &Path,
        _recursive: bool,
    ) -> Result<()> {
        self.record(Call::FilePull {
            source: source.to_path_buf(),
            destination: destination.to_path_buf(),
        });
        if self.host_filesystem {
            std::fs::copy(source, destination)?;
        }
        Ok(())
    }

    async fn device_show(&self, instance: &InstanceId) -> Result<BTreeMap<String, Device>> {
        self.lock()
            .instances
            .get(&instance.name)
            .map(|i| i.devices.clone())
            .ok_or_else(|| fail(format!("query {instance}"), "Instance not found"))
    }

    async fn device_add(&self, instance: &InstanceId, name: &str, device: &Device) -> Result<()> {
        self.record(Call::DeviceAdd {
            name: instance.name.clone(),
            device_name: name.to_string(),
        });
        let mut state = self.lock();
        let inst = state
            .instances
            .get_mut(&instance.name)
            .ok_or_else(|| fail(format!("config device add {instance}"), "Instance not found"))?;
        if inst.devices.contains_key(name) {
            return Err(fail(
                format!("config device add {instance} {name}"),
                "The device already exists",
            ));
        }
        inst.devices.insert(name.to_string(), device.clone());
        Ok(())
    }

    async fn image_list(&self, _scope: &Scope) -> Result<Vec<ImageInfo>> {
        Ok(self
            .lock()
            .images
            .iter()
            .map(|alias| ImageInfo {
                fingerprint: format!("fp-{alias}"),
                aliases: vec![ImageAlias {
                    name: alias.clone(),
                    description: String::new(),
                }],
            })
            .collect())
    }

    async fn publish(&self, instance: &InstanceId, alias: &str) -> Result<()> {
        self.record(Call::Publish {
            name: instance.name.clone(),
            alias: alias.to_string(),
        });
        let mut state = self.lock();
        if !state.instances.contains_key(&instance.name) {
            return Err(fail(format!("publish {instance}"), "Instance not found"));
        }
        if !state.images.iter().any(|a| a == alias) {
            state.images.push(alias.to_string());
        }
        Ok(())
    }

    async fn image_delete(&self, _scope: &Scope, alias: &str) -> Result<()> {
        self.record(Call::ImageDelete(alias.to_string()));
        self.lock().images.retain(|a| a != alias);
        Ok(())
    }

    async fn remote_list(&self) -> Result<BTreeMap<String, RemoteInfo>> {
        Ok(self.lock().remotes.clone())
    }

    async fn remote_add(&self, remote: &Remote) -> Result<()> {
        self.record(Call::RemoteAdd(remote.name.clone()));
        let mut state = self.lock();
        if state.remotes.contains_key(&remote.name) {
            let command = quote_command(&["remote", "add", remote.name.as_str()]);
            return Err(fail(command, "Remote already exists"));
        }
        state.remotes.insert(
            remote.name.clone(),
            RemoteInfo {
                addr: remote.addr.clone(),
                protocol: remote.protocol.clone(),
            },
        );
        Ok(())
    }

    async fn profile_show(&self, _scope: &Scope, name: &str) -> Result<serde_json::Value> {
        Ok(self
            .lock()
            .profiles
            .get(name)
            .cloned()
            .unwrap_or_else(|| serde_json::json!({ "config": {}, "devices": {} })))
    }

    async fn profile_edit(
        &self,
        _scope: &Scope,
        name: &str,
        config: &serde_json::Value,
    ) -> Result<()> {
        self.lock().profiles.insert(name.to_string(), config.clone());
        Ok(())
    }

    async fn server_info(&self, _remote: &str) -> Result<ServerInfo> {
        Ok(ServerInfo {
            seccomp_listener: self.seccomp_listener,
        })
    }
}
