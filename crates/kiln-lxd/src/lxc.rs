//! `lxc` command-line implementation of [`RuntimeClient`].
//!
//! Every operation is one invocation of `lxc --project <project> ...`.
//! Structured results come from `--format=json` listings or from
//! `lxc query`, which returns the REST API's JSON directly.

use crate::client::RuntimeClient;
use crate::command::{quote_command, run_checked};
use crate::error::{LxdError, Result};
use crate::lxd::Lxd;
use crate::types::{
    Device, FilePush, ImageInfo, InstanceId, InstanceInfo, LaunchRequest, Remote, RemoteInfo,
    RunEnvironment, RuntimeVersion, Scope, ServerInfo, DEFAULT_PROJECT,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tokio::sync::Mutex;

/// Where the snap package puts the client binary.
const SNAP_LXC_PATH: &str = "/snap/bin/lxc";

/// Working directory `lxc exec` uses when none is given.
const DEFAULT_EXEC_CWD: &str = "/root";

/// Runtime client driving LXD through the `lxc` CLI.
pub struct Lxc {
    lxc_path: PathBuf,
    lxd: Mutex<Lxd>,
}

impl Default for Lxc {
    fn default() -> Self {
        Self::new()
    }
}

impl Lxc {
    /// Locate `lxc` and `lxd` on `PATH`, defaulting to the snap locations.
    pub fn new() -> Self {
        Self {
            lxc_path: which::which("lxc").unwrap_or_else(|_| PathBuf::from(SNAP_LXC_PATH)),
            lxd: Mutex::new(Lxd::new()),
        }
    }

    /// Use explicit client and daemon binaries.
    pub fn with_paths(lxc_path: impl Into<PathBuf>, lxd: Lxd) -> Self {
        Self {
            lxc_path: lxc_path.into(),
            lxd: Mutex::new(lxd),
        }
    }

    /// Path of the client binary.
    pub fn path(&self) -> &Path {
        &self.lxc_path
    }

    fn program(&self) -> String {
        self.lxc_path.to_string_lossy().into_owned()
    }

    async fn run(&self, project: &str, args: Vec<String>) -> Result<Vec<u8>> {
        let output = run_checked(&self.program(), &with_project(project, args), None).await?;
        Ok(output.stdout)
    }

    async fn run_json<T: DeserializeOwned>(&self, project: &str, args: Vec<String>) -> Result<T> {
        let stdout = self.run(project, args).await?;
        Ok(serde_json::from_slice(&stdout)?)
    }
}

#[async_trait]
impl RuntimeClient for Lxc {
    async fn ensure_installed(&self) -> Result<()> {
        self.lxd.lock().await.install().await?;
        if !self.lxc_path.exists() && which::which("lxc").is_err() {
            return Err(LxdError::NotInstalled(format!(
                "lxc not found at {} or in PATH",
                self.lxc_path.display()
            )));
        }
        Ok(())
    }

    async fn version(&self) -> Result<RuntimeVersion> {
        self.lxd.lock().await.version().await
    }

    async fn launch(&self, request: &LaunchRequest) -> Result<()> {
        tracing::debug!(
            instance = %request.instance,
            image = %format!("{}:{}", request.image_remote, request.image),
            ephemeral = request.ephemeral,
            "Launching instance"
        );
        self.run(&request.instance.project, launch_args(request))
            .await
            .map(drop)
    }

    async fn start(&self, instance: &InstanceId) -> Result<()> {
        self.run(&instance.project, args(["start", &instance.target()]))
            .await
            .map(drop)
    }

    async fn stop(&self, instance: &InstanceId) -> Result<()> {
        self.run(&instance.project, args(["stop", &instance.target()]))
            .await
            .map(drop)
    }

    async fn delete(&self, instance: &InstanceId, force: bool) -> Result<()> {
        let mut cmd = args(["delete", &instance.target()]);
        if force {
            cmd.push("--force".into());
        }
        self.run(&instance.project, cmd).await.map(drop)
    }

    async fn list(&self, instance: &InstanceId) -> Result<Vec<InstanceInfo>> {
        self.run_json(
            &instance.project,
            args(["list", &instance.target(), "--format=json"]),
        )
        .await
    }

    fn exec(
        &self,
        instance: &InstanceId,
        command: &[String],
        env: &RunEnvironment,
        cwd: Option<&str>,
    ) -> Command {
        let exec_args = with_project(&instance.project, exec_args(instance, command, env, cwd));
        let mut line = vec![self.program()];
        line.extend(exec_args.iter().cloned());
        tracing::debug!(command = %quote_command(&line), "Prepared exec");

        let mut cmd = Command::new(self.program());
        cmd.args(exec_args);
        cmd
    }

    async fn file_push(&self, instance: &InstanceId, push: &FilePush) -> Result<()> {
        self.run(&instance.project, file_push_args(instance, push))
            .await
            .map(drop)
    }

    async fn file_pull(
        &self,
        instance: &InstanceId,
        source: &Path,
        destination: &Path,
        recursive: bool,
    ) -> Result<()> {
        let mut cmd = args([
            "file",
            "pull",
            &format!("{}{}", instance.target(), source.display()),
            &destination.to_string_lossy(),
            "--create-dirs",
        ]);
        if recursive {
            cmd.push("--recursive".into());
        }
        self.run(&instance.project, cmd).await.map(drop)
    }

    async fn device_show(&self, instance: &InstanceId) -> Result<BTreeMap<String, Device>> {
        #[derive(Deserialize)]
        struct InstanceConfig {
            #[serde(default)]
            devices: BTreeMap<String, Device>,
        }

        let path = format!(
            "{}:/1.0/instances/{}?project={}",
            instance.remote, instance.name, instance.project
        );
        let config: InstanceConfig = self.run_json(&instance.project, args(["query", &path])).await?;
        Ok(config.devices)
    }

    async fn device_add(&self, instance: &InstanceId, name: &str, device: &Device) -> Result<()> {
        self.run(&instance.project, device_add_args(instance, name, device)?)
            .await
            .map(drop)
    }

    async fn image_list(&self, scope: &Scope) -> Result<Vec<ImageInfo>> {
        self.run_json(
            &scope.project,
            args(["image", "list", &format!("{}:", scope.remote), "--format=json"]),
        )
        .await
    }

    async fn publish(&self, instance: &InstanceId, alias: &str) -> Result<()> {
        tracing::debug!(instance = %instance, alias = %alias, "Publishing image");
        self.run(
            &instance.project,
            args([
                "publish",
                &instance.target(),
                &format!("{}:", instance.remote),
                "--alias",
                alias,
                "--reuse",
                "--force",
            ]),
        )
        .await
        .map(drop)
    }

    async fn image_delete(&self, scope: &Scope, alias: &str) -> Result<()> {
        self.run(
            &scope.project,
            args(["image", "delete", &format!("{}:{}", scope.remote, alias)]),
        )
        .await
        .map(drop)
    }

    async fn remote_list(&self) -> Result<BTreeMap<String, RemoteInfo>> {
        self.run_json(DEFAULT_PROJECT, args(["remote", "list", "--format=json"]))
            .await
    }

    async fn remote_add(&self, remote: &Remote) -> Result<()> {
        tracing::debug!(remote = %remote.name, addr = %remote.addr, "Adding remote");
        self.run(
            DEFAULT_PROJECT,
            args([
                "remote",
                "add",
                &remote.name,
                &remote.addr,
                &format!("--protocol={}", remote.protocol),
            ]),
        )
        .await
        .map(drop)
    }

    async fn profile_show(&self, scope: &Scope, name: &str) -> Result<serde_json::Value> {
        let path = format!(
            "{}:/1.0/profiles/{}?project={}",
            scope.remote, name, scope.project
        );
        self.run_json(&scope.project, args(["query", &path])).await
    }

    async fn profile_edit(
        &self,
        scope: &Scope,
        name: &str,
        config: &serde_json::Value,
    ) -> Result<()> {
        // JSON is valid YAML, which is what `profile edit` reads on stdin
        let body = serde_json::to_vec(config)?;
        let cmd = with_project(
            &scope.project,
            args(["profile", "edit", &format!("{}:{}", scope.remote, name)]),
        );
        run_checked(&self.program(), &cmd, Some(body.as_slice()))
            .await
            .map(drop)
    }

    async fn server_info(&self, remote: &str) -> Result<ServerInfo> {
        let value: serde_json::Value = self
            .run_json(DEFAULT_PROJECT, args(["query", &format!("{remote}:/1.0")]))
            .await?;
        Ok(ServerInfo::from_json(&value))
    }
}

fn args<const N: usize>(items: [&str; N]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn with_project(project: &str, rest: Vec<String>) -> Vec<String> {
    let mut out = Vec::with_capacity(rest.len() + 2);
    out.push("--project".to_string());
    out.push(project.to_string());
    out.extend(rest);
    out
}

fn launch_args(request: &LaunchRequest) -> Vec<String> {
    let mut cmd = args([
        "launch",
        &format!("{}:{}", request.image_remote, request.image),
        &request.instance.target(),
    ]);
    if request.ephemeral {
        cmd.push("--ephemeral".into());
    }
    for (key, value) in &request.config {
        cmd.push("--config".into());
        cmd.push(format!("{key}={value}"));
    }
    cmd
}

fn exec_args(
    instance: &InstanceId,
    command: &[String],
    env: &RunEnvironment,
    cwd: Option<&str>,
) -> Vec<String> {
    let mut cmd = args(["exec", &instance.target()]);
    if let Some(cwd) = cwd.filter(|c| *c != DEFAULT_EXEC_CWD) {
        cmd.push("--cwd".into());
        cmd.push(cwd.to_string());
    }
    for (key, value) in env {
        cmd.push("--env".into());
        cmd.push(format!("{key}={value}"));
    }
    cmd.push("--".into());
    cmd.extend(command.iter().cloned());
    cmd
}

fn file_push_args(instance: &InstanceId, push: &FilePush) -> Vec<String> {
    args([
        "file",
        "push",
        &push.source.to_string_lossy(),
        &format!("{}{}", instance.target(), push.destination.display()),
        "--create-dirs",
        "--mode",
        &format!("{:04o}", push.mode),
        "--uid",
        &push.uid.to_string(),
        "--gid",
        &push.gid.to_string(),
    ])
}

fn device_add_args(instance: &InstanceId, name: &str, device: &Device) -> Result<Vec<String>> {
    let (Some(source), Some(path)) = (&device.source, &device.path) else {
        return Err(LxdError::Parse(format!(
            "device {name} needs both source and path"
        )));
    };
    Ok(args([
        "config",
        "device",
        "add",
        &instance.target(),
        name,
        &device.kind,
        &format!("source={source}"),
        &format!("path={path}"),
    ]))
}
