//! Directory synchronization between the host and an environment.
//!
//! Single files go through the executor's push/pull. Directory trees are
//! streamed as a tar archive: a producer process writes the archive to a
//! pipe and a consumer process on the other side extracts it.

use crate::error::{CoreError, Result};
use crate::executor::{ExecOptions, Executor, ProcessIo};
use kiln_lxd::quote_command;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;
use tokio::process::{Child, Command};

/// Copy `source` on the host to `destination` in the environment.
///
/// With `delete`, an existing destination directory is removed first so the
/// result mirrors the source exactly.
pub async fn sync_to<E: Executor + ?Sized>(
    executor: &E,
    source: &Path,
    destination: &Path,
    delete: bool,
) -> Result<()> {
    let metadata = match tokio::fs::metadata(source).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(CoreError::NotFound(source.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };

    tracing::info!(
        env = %executor.describe(),
        source = %source.display(),
        destination = %destination.display(),
        "Syncing to environment"
    );
    let start = Instant::now();

    if metadata.is_file() {
        executor.push_file(source, destination).await?;
    } else if metadata.is_dir() {
        let dest = path_arg(destination);
        if delete {
            executor
                .execute_run(&cmd(["rm", "-rf", dest.as_str()]), &ExecOptions::checked())
                .await?;
        }
        executor
            .execute_run(&cmd(["mkdir", "-p", dest.as_str()]), &ExecOptions::checked())
            .await?;

        let tar = host_tar()?;
        let producer_cmd = cmd([tar.as_str(), "cpf", "-", "-C", path_arg(source).as_str(), "."]);
        let mut producer = spawn_host(&producer_cmd, Stdio::null(), Stdio::piped())?;
        let pipe = take_stdout(&mut producer)?;

        let consumer_cmd = cmd(["tar", "xpf", "-", "-C", dest.as_str()]);
        let consumer = match executor.execute_popen(
            &consumer_cmd,
            &ExecOptions::default(),
            ProcessIo {
                stdin: pipe,
                stdout: Stdio::null(),
                stderr: Stdio::piped(),
            },
        ) {
            Ok(child) => child,
            Err(e) => {
                abort_producer(&mut producer, &producer_cmd).await;
                return Err(e);
            }
        };

        join_pipeline(producer, &producer_cmd, consumer, &consumer_cmd).await?;
    } else {
        return Err(CoreError::NotFound(source.to_path_buf()));
    }

    tracing::info!(
        env = %executor.describe(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Sync to environment complete"
    );
    Ok(())
}

/// Copy `source` in the environment to `destination` on the host.
///
/// A destination directory is replaced, and every extracted entry is
/// re-owned to the invoking host user.
pub async fn sync_from<E: Executor + ?Sized>(
    executor: &E,
    source: &Path,
    destination: &Path,
) -> Result<()> {
    let src = path_arg(source);
    tracing::info!(
        env = %executor.describe(),
        source = %source.display(),
        destination = %destination.display(),
        "Syncing from environment"
    );
    let start = Instant::now();

    if probe(executor, "-f", &src).await? {
        executor.pull_file(source, destination).await?;
    } else if probe(executor, "-d", &src).await? {
        recreate_dir(destination).await?;

        let producer_cmd = cmd(["tar", "cpf", "-", "-C", src.as_str(), "."]);
        let mut producer = executor.execute_popen(
            &producer_cmd,
            &ExecOptions::default(),
            ProcessIo {
                stdin: Stdio::null(),
                stdout: Stdio::piped(),
                stderr: Stdio::piped(),
            },
        )?;
        let pipe = take_stdout(&mut producer)?;

        let tar = match host_tar() {
            Ok(tar) => tar,
            Err(e) => {
                abort_producer(&mut producer, &producer_cmd).await;
                return Err(e);
            }
        };
        let consumer_cmd = cmd([tar.as_str(), "xpf", "-", "-C", path_arg(destination).as_str()]);
        let consumer = match spawn_host(&consumer_cmd, pipe, Stdio::null()) {
            Ok(child) => child,
            Err(e) => {
                abort_producer(&mut producer, &producer_cmd).await;
                return Err(e);
            }
        };

        join_pipeline(producer, &producer_cmd, consumer, &consumer_cmd).await?;
        reown_tree(destination)?;
    } else {
        return Err(CoreError::NotFound(source.to_path_buf()));
    }

    tracing::info!(
        env = %executor.describe(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Sync from environment complete"
    );
    Ok(())
}

fn cmd<const N: usize>(items: [&str; N]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn host_tar() -> Result<String> {
    which::which("tar")
        .map(|p| p.to_string_lossy().into_owned())
        .map_err(|_| CoreError::MissingCommand("tar".to_string()))
}

/// `test <flag> <path>` in the environment.
async fn probe<E: Executor + ?Sized>(executor: &E, flag: &str, path: &str) -> Result<bool> {
    let output = executor
        .execute_run(&cmd(["test", flag, path]), &ExecOptions::default())
        .await?;
    Ok(output.success())
}

fn spawn_host(command: &[String], stdin: Stdio, stdout: Stdio) -> Result<Child> {
    tracing::debug!(command = %quote_command(command), "Spawning host process");
    let child = Command::new(&command[0])
        .args(&command[1..])
        .stdin(stdin)
        .stdout(stdout)
        .stderr(Stdio::piped())
        .spawn()?;
    Ok(child)
}

/// Kill a producer whose consumer never started and reap it.
async fn abort_producer(producer: &mut Child, command: &[String]) {
    if let Err(e) = producer.start_kill() {
        tracing::warn!(command = %quote_command(command), error = %e, "Failed to kill producer");
    }
    if let Err(e) = producer.wait().await {
        tracing::warn!(command = %quote_command(command), error = %e, "Failed to reap producer");
    }
}

fn take_stdout(child: &mut Child) -> Result<Stdio> {
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| std::io::Error::other("producer stdout not captured"))?;
    Ok(stdout.try_into()?)
}

/// Wait for both ends of the pipe. Consumer failure is reported first.
async fn join_pipeline(
    producer: Child,
    producer_cmd: &[String],
    consumer: Child,
    consumer_cmd: &[String],
) -> Result<()> {
    let (consumer_out, producer_out) =
        tokio::try_join!(consumer.wait_with_output(), producer.wait_with_output())?;

    for (output, command) in [(consumer_out, consumer_cmd), (producer_out, producer_cmd)] {
        if !output.status.success() {
            return Err(CoreError::CommandFailed {
                command: quote_command(command),
                exit_code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
    }
    Ok(())
}

async fn recreate_dir(path: &Path) -> Result<()> {
    match tokio::fs::symlink_metadata(path).await {
        Ok(metadata) if metadata.is_dir() => tokio::fs::remove_dir_all(path).await?,
        Ok(_) => tokio::fs::remove_file(path).await?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    tokio::fs::create_dir_all(path).await?;
    Ok(())
}

/// Hand every entry under `root` (inclusive) to the current user.
fn reown_tree(root: &Path) -> Result<()> {
    let uid = nix::unistd::getuid().as_raw();
    let gid = nix::unistd::getgid().as_raw();

    let mut pending: Vec<PathBuf> = vec![root.to_path_buf()];
    while let Some(path) = pending.pop() {
        std::os::unix::fs::lchown(&path, Some(uid), Some(gid))?;
        if std::fs::symlink_metadata(&path)?.is_dir() {
            for entry in std::fs::read_dir(&path)? {
                pending.push(entry?.path());
            }
        }
    }
    Ok(())
}
