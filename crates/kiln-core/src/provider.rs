//! Provider: provisions a build environment and tears it down again.

use crate::bootstrap::Bootstrapper;
use crate::cache::ImageCache;
use crate::config::{LxdConfig, MIN_RUNTIME_VERSION};
use crate::error::{CoreError, Result};
use crate::executor::{Environment, Executor};
use crate::host::HostExecutor;
use crate::instance::Instance;
use kiln_lxd::{InstanceStatus, Remote, RuntimeClient, Scope};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Where build environments come from.
pub enum Backend {
    /// Run directly on the host.
    Host(HostExecutor),
    /// Run in an LXD instance.
    Lxd {
        /// Runtime client.
        runtime: Arc<dyn RuntimeClient>,
        /// Provider configuration.
        config: LxdConfig,
    },
}

/// Progress of a provider through setup and teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderState {
    /// Nothing done yet.
    Uninitialized,
    /// Runtime installed and recent enough.
    RuntimeVerified,
    /// Image remote registered.
    RemoteRegistered,
    /// Launch image available.
    ImageReady,
    /// Environment ready for commands.
    InstanceReady,
    /// Instance stopped.
    TornDown,
    /// Instance deleted.
    Deleted,
}

impl fmt::Display for ProviderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "Uninitialized"),
            Self::RuntimeVerified => write!(f, "RuntimeVerified"),
            Self::RemoteRegistered => write!(f, "RemoteRegistered"),
            Self::ImageReady => write!(f, "ImageReady"),
            Self::InstanceReady => write!(f, "InstanceReady"),
            Self::TornDown => write!(f, "TornDown"),
            Self::Deleted => write!(f, "Deleted"),
        }
    }
}

/// Provisions one build environment.
///
/// `setup` is safe to call repeatedly: an existing instance is reused,
/// started if stopped and left alone if running.
pub struct Provider {
    backend: Backend,
    state: ProviderState,
    environment: Option<Environment>,
}

impl Provider {
    /// Provider running commands on the host.
    pub fn host(executor: HostExecutor) -> Self {
        Self::new(Backend::Host(executor))
    }

    /// Provider running commands in an LXD instance.
    pub fn lxd(runtime: Arc<dyn RuntimeClient>, config: LxdConfig) -> Self {
        Self::new(Backend::Lxd { runtime, config })
    }

    /// Provider for `backend`.
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            state: ProviderState::Uninitialized,
            environment: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> ProviderState {
        self.state
    }

    /// The environment from the last `setup`, if any.
    pub fn environment(&self) -> Option<&Environment> {
        self.environment.as_ref()
    }

    /// Provision the environment and return it ready for commands.
    pub async fn setup(&mut self) -> Result<&Environment> {
        let start = Instant::now();
        let environment = match &self.backend {
            Backend::Host(host) => {
                tracing::info!("Using host environment");
                Environment::Host(host.clone())
            }
            Backend::Lxd { runtime, config } => {
                let runtime = runtime.clone();
                let config = config.clone();
                self.setup_lxd(runtime, &config).await?
            }
        };

        self.state = ProviderState::InstanceReady;
        tracing::info!(
            env = %environment.describe(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Environment ready"
        );
        let environment: &Environment = self.environment.insert(environment);
        Ok(environment)
    }

    async fn setup_lxd(
        &mut self,
        runtime: Arc<dyn RuntimeClient>,
        config: &LxdConfig,
    ) -> Result<Environment> {
        runtime.ensure_installed().await?;
        let version = runtime.version().await?;
        if version < MIN_RUNTIME_VERSION {
            return Err(CoreError::UnsupportedVersion {
                found: version,
                minimum: MIN_RUNTIME_VERSION,
            });
        }
        tracing::debug!(version = %version, "Runtime verified");
        self.state = ProviderState::RuntimeVerified;

        ensure_remote(runtime.as_ref(), &config.image_remote).await?;
        self.state = ProviderState::RemoteRegistered;

        let (image, image_remote) = if config.use_intermediate_image {
            let cache = ImageCache::new(
                runtime.clone(),
                Scope::new(config.project.clone(), config.remote.clone()),
                config.run_environment.clone(),
                config.bootstrap.clone(),
            );
            let outcome = cache
                .ensure(&config.image_remote.name, &config.image.image_ref())
                .await?;
            (outcome.alias, config.remote.clone())
        } else {
            (
                config.image.version().to_string(),
                config.image_remote.name.clone(),
            )
        };
        self.state = ProviderState::ImageReady;

        let instance = Instance::new(
            config.instance_id(),
            runtime,
            config.run_environment.clone(),
        );
        match instance.status().await? {
            InstanceStatus::Absent => {
                instance
                    .launch(&image, &image_remote, config.ephemeral)
                    .await?;
                if !config.use_intermediate_image {
                    Bootstrapper::new(config.image, config.bootstrap.clone())
                        .run(&instance)
                        .await?;
                }
            }
            InstanceStatus::Stopped => instance.start().await?,
            InstanceStatus::Running => {
                tracing::debug!(instance = %instance.id(), "Instance already running");
            }
            InstanceStatus::Other(status) => {
                return Err(CoreError::InvalidState {
                    expected: "running or stopped".to_string(),
                    actual: status,
                });
            }
        }

        Ok(Environment::Container(instance))
    }

    /// Adopt an existing environment without provisioning anything.
    ///
    /// Returns `None` when the instance does not exist. The host is always
    /// available.
    pub async fn attach(&mut self) -> Result<Option<&Environment>> {
        let environment = match &self.backend {
            Backend::Host(host) => Environment::Host(host.clone()),
            Backend::Lxd { runtime, config } => {
                let instance = Instance::new(
                    config.instance_id(),
                    runtime.clone(),
                    config.run_environment.clone(),
                );
                if !instance.exists().await? {
                    tracing::debug!(instance = %instance.id(), "Nothing to attach to");
                    return Ok(None);
                }
                Environment::Container(instance)
            }
        };
        self.state = ProviderState::InstanceReady;
        let environment: &Environment = self.environment.insert(environment);
        Ok(Some(environment))
    }

    /// Stop the environment, and delete it when `clean`.
    ///
    /// A provider that was never set up, or whose instance is already
    /// gone, has nothing to tear down.
    pub async fn teardown(&mut self, clean: bool) -> Result<()> {
        let Some(environment) = self.environment.as_ref() else {
            tracing::debug!("No environment to tear down");
            return Ok(());
        };

        if let Environment::Container(instance) = environment {
            if !instance.exists().await? {
                tracing::debug!(instance = %instance.id(), "Instance already gone");
                return Ok(());
            }
            if instance.is_running().await? {
                instance.stop().await?;
            }
            // stopping an ephemeral instance already deleted it
            if clean && instance.exists().await? {
                instance.delete(true).await?;
            }
        }

        self.state = if clean {
            ProviderState::Deleted
        } else {
            ProviderState::TornDown
        };
        tracing::info!(state = %self.state, "Environment torn down");
        Ok(())
    }
}

/// Register `remote` unless a remote of that name exists, in which case its
/// address and protocol must match.
async fn ensure_remote(runtime: &dyn RuntimeClient, remote: &Remote) -> Result<()> {
    let remotes = runtime.remote_list().await?;
    match remotes.get(&remote.name) {
        Some(existing) if existing.addr != remote.addr || existing.protocol != remote.protocol => {
            Err(CoreError::RemoteMismatch {
                name: remote.name.clone(),
                expected_addr: remote.addr.clone(),
                actual_addr: existing.addr.clone(),
                expected_protocol: remote.protocol.clone(),
                actual_protocol: existing.protocol.clone(),
            })
        }
        Some(_) => {
            tracing::debug!(remote = %remote.name, "Remote already registered");
            Ok(())
        }
        None => {
            tracing::info!(remote = %remote.name, addr = %remote.addr, "Registering remote");
            runtime.remote_add(remote).await?;
            Ok(())
        }
    }
}
