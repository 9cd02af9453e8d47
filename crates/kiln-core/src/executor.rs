//! The capability contract shared by every build environment.
//!
//! An [`Executor`] runs commands, moves files in and out, and reports
//! whether it exists and is running. [`HostExecutor`](crate::HostExecutor)
//! and [`Instance`](crate::Instance) implement it; [`Environment`] is the
//! tagged variant over both.

use crate::error::{CoreError, Result};
use crate::host::HostExecutor;
use crate::instance::Instance;
use crate::sync;
use async_trait::async_trait;
use kiln_lxd::{quote_command, RunEnvironment};
use std::path::Path;
use std::process::Stdio;
use tokio::process::{Child, Command};

/// Per-call execution options.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Replaces the environment's default run environment for this call.
    pub env: Option<RunEnvironment>,
    /// Working directory inside the environment.
    pub cwd: Option<String>,
    /// Fail with [`CoreError::CommandFailed`] on non-zero exit.
    pub check: bool,
}

impl ExecOptions {
    /// Options that fail on non-zero exit.
    pub fn checked() -> Self {
        Self {
            check: true,
            ..Default::default()
        }
    }

    /// Override the run environment.
    pub fn env(mut self, env: RunEnvironment) -> Self {
        self.env = Some(env);
        self
    }

    /// Set the working directory.
    pub fn cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }
}

/// Stdio wiring for a spawned process. Defaults to all null.
#[derive(Debug)]
pub struct ProcessIo {
    /// Standard input.
    pub stdin: Stdio,
    /// Standard output.
    pub stdout: Stdio,
    /// Standard error.
    pub stderr: Stdio,
}

impl Default for ProcessIo {
    fn default() -> Self {
        Self {
            stdin: Stdio::null(),
            stdout: Stdio::null(),
            stderr: Stdio::null(),
        }
    }
}

/// Result of a completed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    /// Process exit code (-1 if terminated by a signal).
    pub exit_code: i32,
    /// Standard output.
    pub stdout: Vec<u8>,
    /// Standard error.
    pub stderr: Vec<u8>,
}

impl ExecOutput {
    /// Check if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Standard output as lossy UTF-8.
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

impl From<std::process::Output> for ExecOutput {
    fn from(output: std::process::Output) -> Self {
        Self {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: output.stdout,
            stderr: output.stderr,
        }
    }
}

/// A build environment commands can be executed in.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Short human-readable name for logs.
    fn describe(&self) -> String;

    /// Prepare (but do not spawn) a process running `command` in the environment.
    fn prepare_command(&self, command: &[String], options: &ExecOptions) -> Command;

    /// Run `command` to completion, capturing stdout and stderr.
    async fn execute_run(&self, command: &[String], options: &ExecOptions) -> Result<ExecOutput> {
        let mut cmd = self.prepare_command(command, options);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let output: ExecOutput = cmd.output().await?.into();
        if options.check && !output.success() {
            return Err(CoreError::CommandFailed {
                command: quote_command(command),
                exit_code: output.exit_code,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }

    /// Spawn `command` with the given stdio wiring.
    ///
    /// The prepared command is dropped before returning, so the parent keeps
    /// no copy of any pipe handed in through `io`.
    fn execute_popen(
        &self,
        command: &[String],
        options: &ExecOptions,
        io: ProcessIo,
    ) -> Result<Child> {
        let mut cmd = self.prepare_command(command, options);
        cmd.stdin(io.stdin).stdout(io.stdout).stderr(io.stderr);
        let child = cmd.spawn()?;
        drop(cmd);
        Ok(child)
    }

    /// Write `content` to `destination` with the given mode and ownership.
    async fn create_file(
        &self,
        destination: &Path,
        content: &[u8],
        mode: u32,
        uid: u32,
        gid: u32,
    ) -> Result<()>;

    /// Copy a single host file into the environment.
    async fn push_file(&self, source: &Path, destination: &Path) -> Result<()>;

    /// Copy a single file out of the environment onto the host.
    async fn pull_file(&self, source: &Path, destination: &Path) -> Result<()>;

    /// Whether the environment exists.
    async fn exists(&self) -> Result<bool>;

    /// Whether the environment is running.
    async fn is_running(&self) -> Result<bool>;

    /// Whether host directories can be bind-mounted into the environment.
    fn supports_mount(&self) -> bool;

    /// Bind-mount a host directory into the environment.
    async fn mount(&self, source: &Path, destination: &Path) -> Result<()>;

    /// Copy a host file or directory tree into the environment.
    ///
    /// Directory destinations are replaced.
    async fn sync_to(&self, source: &Path, destination: &Path) -> Result<()> {
        sync::sync_to(self, source, destination, true).await
    }

    /// Copy a file or directory tree out of the environment onto the host.
    async fn sync_from(&self, source: &Path, destination: &Path) -> Result<()> {
        sync::sync_from(self, source, destination).await
    }
}

/// A provisioned environment: the host itself or a container instance.
#[derive(Debug)]
pub enum Environment {
    /// Commands run directly on the host.
    Host(HostExecutor),
    /// Commands run inside a container instance.
    Container(Instance),
}

impl Environment {
    /// The instance, if this is a container environment.
    pub fn instance(&self) -> Option<&Instance> {
        match self {
            Self::Container(instance) => Some(instance),
            Self::Host(_) => None,
        }
    }

    fn inner(&self) -> &dyn Executor {
        match self {
            Self::Host(host) => host,
            Self::Container(instance) => instance,
        }
    }
}

#[async_trait]
impl Executor for Environment {
    fn describe(&self) -> String {
        self.inner().describe()
    }

    fn prepare_command(&self, command: &[String], options: &ExecOptions) -> Command {
        self.inner().prepare_command(command, options)
    }

    async fn create_file(
        &self,
        destination: &Path,
        content: &[u8],
        mode: u32,
        uid: u32,
        gid: u32,
    ) -> Result<()> {
        self.inner()
            .create_file(destination, content, mode, uid, gid)
            .await
    }

    async fn push_file(&self, source: &Path, destination: &Path) -> Result<()> {
        self.inner().push_file(source, destination).await
    }

    async fn pull_file(&self, source: &Path, destination: &Path) -> Result<()> {
        self.inner().pull_file(source, destination).await
    }

    async fn exists(&self) -> Result<bool> {
        self.inner().exists().await
    }

    async fn is_running(&self) -> Result<bool> {
        self.inner().is_running().await
    }

    fn supports_mount(&self) -> bool {
        self.inner().supports_mount()
    }

    async fn mount(&self, source: &Path, destination: &Path) -> Result<()> {
        self.inner().mount(source, destination).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_output_success() {
        let output = ExecOutput {
            exit_code: 0,
            stdout: b"hi\n".to_vec(),
            stderr: Vec::new(),
        };
        assert!(output.success());
        assert_eq!(output.stdout_lossy(), "hi\n");
    }

    #[test]
    fn test_exec_output_failure() {
        let output = ExecOutput {
            exit_code: 1,
            stdout: Vec::new(),
            stderr: b"error".to_vec(),
        };
        assert!(!output.success());
    }

    #[test]
    fn test_exec_options_builders() {
        let options = ExecOptions::checked()
            .cwd("/root/project")
            .env(RunEnvironment::from([("A".to_string(), "1".to_string())]));
        assert!(options.check);
        assert_eq!(options.cwd.as_deref(), Some("/root/project"));
        assert_eq!(options.env.unwrap()["A"], "1");
    }
}
