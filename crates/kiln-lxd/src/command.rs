//! Helpers for running host commands and reporting them.

use crate::error::{LxdError, Result};
use std::process::{Output, Stdio};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Quote a command line for logs and error messages.
pub fn quote_command<S: AsRef<str>>(args: &[S]) -> String {
    args.iter()
        .map(|a| quote_arg(a.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

fn quote_arg(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r#"'"'"'"#))
    }
}

/// Run `program args...`, capturing output, failing on non-zero exit.
pub(crate) async fn run_checked(program: &str, args: &[String], input: Option<&[u8]>) -> Result<Output> {
    let mut line = Vec::with_capacity(args.len() + 1);
    line.push(program.to_string());
    line.extend(args.iter().cloned());
    let quoted = quote_command(&line);
    tracing::info!(command = %quoted, "Executing on host");

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|source| LxdError::Spawn {
        program: program.to_string(),
        source,
    })?;

    if let Some(bytes) = input {
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(bytes).await?;
            // stdin is dropped here so the child sees EOF
        }
    }

    let output = child.wait_with_output().await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        tracing::info!(command = %quoted, stderr = %stderr, "Command failed");
        return Err(LxdError::CommandFailed {
            command: quoted,
            exit_code: output.status.code().unwrap_or(-1),
            stderr,
        });
    }
    Ok(output)
}
