//! Turning a bare buildd image into a usable build environment.
//!
//! The sequence configures networking, waits for systemd and DNS, installs
//! the package set snapd needs and waits for snapd to seed. Every step runs
//! through an [`Executor`] with `check` set, except the two readiness polls
//! whose exhaustion is governed by [`ReadinessFailure`].

use crate::error::{CoreError, Result};
use crate::executor::{ExecOptions, Executor};
use crate::image::{BuilddImage, ImageRef};
use crate::retry::{wait_until, Readiness, RetryPolicy};
use std::path::Path;
use std::time::{Duration, Instant};

/// Hostname written to `/etc/hostname` by default.
pub const DEFAULT_HOSTNAME: &str = "kiln-builder";

const NETWORK_UNIT_PATH: &str = "/etc/systemd/network/10-eth0.network";

const NETWORK_UNIT: &str = "\
[Match]
Name=eth0

[Network]
DHCP=ipv4
LinkLocalAddressing=ipv6

[DHCP]
RouteMetric=100
UseMTU=true
";

/// What to do when a readiness poll runs out of attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadinessFailure {
    /// Log a warning and carry on with the next step.
    #[default]
    Warn,
    /// Fail with [`CoreError::ReadinessTimeout`].
    Abort,
}

/// Bootstrap tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapConfig {
    /// Hostname written into the image.
    pub hostname: String,
    /// Poll for `systemctl is-system-running`.
    pub systemd_poll: RetryPolicy,
    /// Poll for name resolution.
    pub network_poll: RetryPolicy,
    /// Policy for exhausted polls.
    pub on_timeout: ReadinessFailure,
    /// Sleep standing in for `snap wait` on images older than 18.04.
    pub legacy_seed_grace: Duration,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            hostname: DEFAULT_HOSTNAME.to_string(),
            systemd_poll: RetryPolicy::default(),
            network_poll: RetryPolicy::default(),
            on_timeout: ReadinessFailure::default(),
            legacy_seed_grace: Duration::from_secs(5),
        }
    }
}

/// Applies the buildd bootstrap sequence to an environment.
#[derive(Debug, Clone)]
pub struct Bootstrapper {
    image: ImageRef,
    config: BootstrapConfig,
}

impl Bootstrapper {
    /// Bootstrapper for a buildd image.
    pub fn new(image: BuilddImage, config: BootstrapConfig) -> Self {
        Self {
            image: image.image_ref(),
            config,
        }
    }

    /// Bootstrapper for an arbitrary image reference.
    pub fn for_image_ref(image: ImageRef, config: BootstrapConfig) -> Self {
        Self { image, config }
    }

    /// Image being bootstrapped.
    pub fn image(&self) -> &ImageRef {
        &self.image
    }

    /// Run the full sequence against `executor`.
    pub async fn run<E: Executor + ?Sized>(&self, executor: &E) -> Result<()> {
        let start = Instant::now();
        tracing::info!(env = %executor.describe(), version = %self.image.version, "Bootstrapping image");

        executor
            .create_file(Path::new(NETWORK_UNIT_PATH), NETWORK_UNIT.as_bytes(), 0o644, 0, 0)
            .await?;
        executor
            .create_file(
                Path::new("/etc/hostname"),
                self.config.hostname.as_bytes(),
                0o644,
                0,
                0,
            )
            .await?;

        self.wait_for_systemd(executor).await?;

        run(executor, &["systemctl", "enable", "systemd-networkd"]).await?;
        run(executor, &["systemctl", "restart", "systemd-networkd"]).await?;
        run(
            executor,
            &["ln", "-sf", "/run/systemd/resolve/resolv.conf", "/etc/resolv.conf"],
        )
        .await?;
        run(executor, &["systemctl", "enable", "systemd-resolved"]).await?;
        run(executor, &["systemctl", "restart", "systemd-resolved"]).await?;
        run(executor, &["systemctl", "restart", "systemd-networkd"]).await?;

        self.wait_for_network(executor).await?;

        run(executor, &["apt-get", "update"]).await?;
        // dirmngr for apt keyrings, fuse and udev for snapd
        run(executor, &["apt-get", "install", "dirmngr", "fuse", "udev", "--yes"]).await?;
        run(executor, &["systemctl", "enable", "systemd-udevd"]).await?;
        run(executor, &["systemctl", "start", "systemd-udevd"]).await?;
        run(executor, &["apt-get", "install", "snapd", "sudo", "--yes"]).await?;
        run(executor, &["systemctl", "start", "snapd"]).await?;

        if self.waits_for_seed() {
            run(executor, &["snap", "wait", "system", "seed.loaded"]).await?;
        } else {
            tracing::debug!(grace = ?self.config.legacy_seed_grace, "Sleeping for snapd seed");
            tokio::time::sleep(self.config.legacy_seed_grace).await;
        }

        tracing::info!(
            env = %executor.describe(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Bootstrap complete"
        );
        Ok(())
    }

    /// `snap wait` only exists on 18.04 and later.
    fn waits_for_seed(&self) -> bool {
        self.image
            .numeric_version()
            .map(|v| v >= (18, 4))
            .unwrap_or(true)
    }

    async fn wait_for_systemd<E: Executor + ?Sized>(&self, executor: &E) -> Result<()> {
        let command = &argv(&["systemctl", "is-system-running"]);
        let outcome = wait_until(&self.config.systemd_poll, || async move {
            let output = executor.execute_run(command, &ExecOptions::default()).await?;
            let state = output.stdout_lossy().trim().to_string();
            tracing::debug!(state = %state, "systemctl is-system-running");
            // degraded: operational with failed units
            Ok(state == "running" || state == "degraded")
        })
        .await?;
        self.readiness("systemd", &self.config.systemd_poll, outcome)
    }

    async fn wait_for_network<E: Executor + ?Sized>(&self, executor: &E) -> Result<()> {
        tracing::info!("Waiting for network to be ready");
        let command = &argv(&["getent", "hosts", "snapcraft.io"]);
        let outcome = wait_until(&self.config.network_poll, || async move {
            let output = executor.execute_run(command, &ExecOptions::default()).await?;
            Ok(output.success())
        })
        .await?;
        self.readiness("network", &self.config.network_poll, outcome)
    }

    fn readiness(&self, check: &str, policy: &RetryPolicy, outcome: Readiness) -> Result<()> {
        match (outcome, self.config.on_timeout) {
            (Readiness::Ready { attempts }, _) => {
                tracing::debug!(check, attempts, "Ready");
                Ok(())
            }
            (Readiness::TimedOut { attempts }, ReadinessFailure::Warn) => {
                tracing::warn!(check, attempts, "Readiness check timed out, continuing");
                Ok(())
            }
            (Readiness::TimedOut { .. }, ReadinessFailure::Abort) => {
                Err(CoreError::ReadinessTimeout {
                    check: check.to_string(),
                    waited: policy.max_wait,
                })
            }
        }
    }
}

fn argv(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

async fn run<E: Executor + ?Sized>(executor: &E, command: &[&str]) -> Result<()> {
    executor
        .execute_run(&argv(command), &ExecOptions::checked())
        .await?;
    Ok(())
}
