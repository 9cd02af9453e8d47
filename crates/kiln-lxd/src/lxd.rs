//! Runtime daemon installation and version probing.

use crate::command::run_checked;
use crate::error::{LxdError, Result};
use crate::types::RuntimeVersion;
use std::path::{Path, PathBuf};

/// Where the snap package puts the daemon binary.
const SNAP_LXD_PATH: &str = "/snap/bin/lxd";

/// The LXD daemon binary on the host.
#[derive(Debug, Clone)]
pub struct Lxd {
    lxd_path: PathBuf,
}

impl Default for Lxd {
    fn default() -> Self {
        Self::new()
    }
}

impl Lxd {
    /// Locate `lxd` on `PATH`, defaulting to the snap location.
    pub fn new() -> Self {
        Self {
            lxd_path: Self::find(),
        }
    }

    /// Use an explicit daemon binary.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            lxd_path: path.into(),
        }
    }

    /// Path of the daemon binary.
    pub fn path(&self) -> &Path {
        &self.lxd_path
    }

    fn find() -> PathBuf {
        which::which("lxd").unwrap_or_else(|_| PathBuf::from(SNAP_LXD_PATH))
    }

    /// Install LXD from the snap store if the daemon binary is missing, then
    /// wait for it and initialise it with defaults.
    pub async fn install(&mut self) -> Result<()> {
        if self.lxd_path.exists() {
            tracing::debug!(path = %self.lxd_path.display(), "LXD already installed");
            return Ok(());
        }

        tracing::info!("LXD not found, installing from snap store");
        run_checked("sudo", &args(["snap", "install", "lxd"]), None).await?;

        self.lxd_path = Self::find();
        if !self.lxd_path.exists() {
            return Err(LxdError::NotInstalled(
                "failed to install LXD, or lxd not found in PATH".into(),
            ));
        }

        let lxd = self.lxd_path.to_string_lossy().into_owned();
        run_checked("sudo", &args([lxd.as_str(), "waitready", "--timeout=30"]), None).await?;
        run_checked("sudo", &args([lxd.as_str(), "init", "--auto"]), None).await?;
        tracing::info!(path = %self.lxd_path.display(), "LXD installed");
        Ok(())
    }

    /// Query the daemon version.
    pub async fn version(&self) -> Result<RuntimeVersion> {
        let lxd = self.lxd_path.to_string_lossy().into_owned();
        let output = run_checked(&lxd, &args(["version"]), None).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        RuntimeVersion::parse(&stdout)
            .ok_or_else(|| LxdError::Parse(format!("unrecognised lxd version: {:?}", stdout.trim())))
    }
}

fn args<const N: usize>(items: [&str; N]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
