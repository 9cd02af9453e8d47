//! Executing directly on the host.

use crate::error::{CoreError, Result};
use crate::executor::{ExecOptions, Executor};
use async_trait::async_trait;
use kiln_lxd::{quote_command, RunEnvironment};
use std::path::Path;
use tokio::process::Command;

/// `PATH` used when the host has none set.
pub const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Runs commands on the host, optionally through `sudo`.
///
/// Commands see only the configured run environment, never the caller's
/// full environment.
#[derive(Debug, Clone)]
pub struct HostExecutor {
    sudo: bool,
    sudo_user: Option<String>,
    run_environment: RunEnvironment,
}

impl Default for HostExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl HostExecutor {
    /// Host executor with the host's `PATH` as its only variable.
    pub fn new() -> Self {
        let path = std::env::var("PATH").unwrap_or_else(|_| DEFAULT_PATH.to_string());
        Self {
            sudo: false,
            sudo_user: None,
            run_environment: RunEnvironment::from([("PATH".to_string(), path)]),
        }
    }

    /// Run every command through `sudo -H`, as `user` when given.
    pub fn with_sudo(mut self, user: Option<String>) -> Self {
        self.sudo = true;
        self.sudo_user = user;
        self
    }

    /// Replace the default run environment.
    pub fn with_run_environment(mut self, env: RunEnvironment) -> Self {
        self.run_environment = env;
        self
    }

    /// The default run environment.
    pub fn run_environment(&self) -> &RunEnvironment {
        &self.run_environment
    }

    /// Whether commands run through `sudo`.
    pub fn uses_sudo(&self) -> bool {
        self.sudo
    }

    fn argv(&self, command: &[String], env: &RunEnvironment) -> Vec<String> {
        let mut argv = Vec::new();
        if self.sudo {
            argv.extend(["sudo".to_string(), "-H".to_string()]);
            if let Some(user) = &self.sudo_user {
                argv.extend(["-u".to_string(), user.clone()]);
            }
            argv.extend([
                "--".to_string(),
                "env".to_string(),
                "-".to_string(),
            ]);
            argv.extend(env.iter().map(|(k, v)| format!("{k}={v}")));
        }
        argv.extend(command.iter().cloned());
        argv
    }
}

#[async_trait]
impl Executor for HostExecutor {
    fn describe(&self) -> String {
        "host".to_string()
    }

    fn prepare_command(&self, command: &[String], options: &ExecOptions) -> Command {
        let env = options.env.as_ref().unwrap_or(&self.run_environment);
        let argv = self.argv(command, env);
        tracing::info!(command = %quote_command(&argv), "Executing on host");

        let (program, args) = argv
            .split_first()
            .map(|(p, rest)| (p.as_str(), rest))
            .unwrap_or(("", &[]));
        let mut cmd = Command::new(program);
        cmd.args(args).env_clear().envs(env);
        if let Some(cwd) = &options.cwd {
            cmd.current_dir(cwd);
        }
        cmd
    }

    async fn create_file(
        &self,
        destination: &Path,
        content: &[u8],
        mode: u32,
        uid: u32,
        gid: u32,
    ) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(destination, content).await?;
        tokio::fs::set_permissions(destination, std::fs::Permissions::from_mode(mode)).await?;
        if nix::unistd::getuid().is_root() {
            std::os::unix::fs::chown(destination, Some(uid), Some(gid))?;
        }
        Ok(())
    }

    async fn push_file(&self, source: &Path, destination: &Path) -> Result<()> {
        copy_file(source, destination).await
    }

    async fn pull_file(&self, source: &Path, destination: &Path) -> Result<()> {
        copy_file(source, destination).await
    }

    async fn exists(&self) -> Result<bool> {
        Ok(true)
    }

    async fn is_running(&self) -> Result<bool> {
        Ok(true)
    }

    fn supports_mount(&self) -> bool {
        false
    }

    async fn mount(&self, _source: &Path, _destination: &Path) -> Result<()> {
        Err(CoreError::MountUnsupported)
    }
}

async fn copy_file(source: &Path, destination: &Path) -> Result<()> {
    if !tokio::fs::try_exists(source).await? {
        return Err(CoreError::NotFound(source.to_path_buf()));
    }
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::copy(source, destination).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_execute_run_captures_stdout() {
        let host = HostExecutor::new();
        let output = host
            .execute_run(&argv(&["echo", "hi"]), &ExecOptions::checked())
            .await
            .unwrap();
        assert_eq!(output.stdout, b"hi\n");
    }

    #[tokio::test]
    async fn test_execute_run_uses_only_run_environment() {
        let host = HostExecutor::new().with_run_environment(RunEnvironment::from([
            ("PATH".to_string(), DEFAULT_PATH.to_string()),
            ("KILN_MARKER".to_string(), "on".to_string()),
        ]));
        let output = host
            .execute_run(&argv(&["sh", "-c", "echo $KILN_MARKER:${HOME:-unset}"]), &ExecOptions::default())
            .await
            .unwrap();
        assert_eq!(output.stdout_lossy(), "on:unset\n");
    }

    #[tokio::test]
    async fn test_execute_run_env_override_and_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let host = HostExecutor::new();
        let options = ExecOptions::default()
            .env(RunEnvironment::from([
                ("PATH".to_string(), DEFAULT_PATH.to_string()),
                ("A".to_string(), "1".to_string()),
            ]))
            .cwd(dir.path().to_string_lossy());
        let output = host
            .execute_run(&argv(&["sh", "-c", "echo $A; pwd"]), &options)
            .await
            .unwrap();
        let expected = format!("1\n{}\n", dir.path().canonicalize().unwrap().display());
        assert_eq!(output.stdout_lossy(), expected);
    }

    #[tokio::test]
    async fn test_checked_failure() {
        let host = HostExecutor::new();
        let err = host
            .execute_run(&argv(&["sh", "-c", "exit 4"]), &ExecOptions::checked())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::CommandFailed { exit_code: 4, .. }));
    }

    #[test]
    fn test_sudo_argv() {
        let host = HostExecutor::new()
            .with_sudo(Some("builder".into()))
            .with_run_environment(RunEnvironment::from([("A".to_string(), "1".to_string())]));
        let env = host.run_environment().clone();
        assert_eq!(
            host.argv(&argv(&["make"]), &env),
            argv(&["sudo", "-H", "-u", "builder", "--", "env", "-", "A=1", "make"])
        );
        assert_eq!(HostExecutor::new().argv(&argv(&["make"]), &env), argv(&["make"]));
    }

    #[tokio::test]
    async fn test_create_file_sets_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("etc/hostname");
        let host = HostExecutor::new();
        host.create_file(&path, b"kiln\n", 0o600, 0, 0).await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"kiln\n");
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_lifecycle_queries_and_mount() {
        let host = HostExecutor::new();
        assert!(host.exists().await.unwrap());
        assert!(host.is_running().await.unwrap());
        assert!(!host.supports_mount());
        let err = host
            .mount(Path::new("/tmp"), Path::new("/mnt"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::MountUnsupported));
    }

    #[tokio::test]
    async fn test_push_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let host = HostExecutor::new();
        let err = host
            .push_file(&dir.path().join("missing"), &dir.path().join("out"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }
}
