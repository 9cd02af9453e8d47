//! Provider configuration types.

use crate::bootstrap::BootstrapConfig;
use crate::error::CoreError;
use crate::host::DEFAULT_PATH;
use crate::image::BuilddImage;
use kiln_lxd::{InstanceId, Remote, RunEnvironment, DEFAULT_PROJECT, LOCAL_REMOTE};

/// Remote serving Ubuntu buildd images.
pub const BUILDD_REMOTE_NAME: &str = "ubuntu-buildd";
/// Address of the buildd image remote.
pub const BUILDD_REMOTE_ADDR: &str = "https://cloud-images.ubuntu.com/buildd/releases";
/// Protocol of the buildd image remote.
pub const BUILDD_REMOTE_PROTOCOL: &str = "simplestreams";

/// Oldest runtime version whose behaviour kiln relies on.
pub const MIN_RUNTIME_VERSION: kiln_lxd::RuntimeVersion = kiln_lxd::RuntimeVersion::new(4, 8);

/// Run environment applied to commands in build instances by default.
pub fn default_run_environment() -> RunEnvironment {
    RunEnvironment::from([
        ("DEBIAN_FRONTEND".to_string(), "noninteractive".to_string()),
        ("DEBCONF_NONINTERACTIVE_SEEN".to_string(), "true".to_string()),
        ("PATH".to_string(), DEFAULT_PATH.to_string()),
    ])
}

/// Configuration for an LXD-backed provider.
#[derive(Debug, Clone)]
pub struct LxdConfig {
    /// Name of the working instance.
    pub instance_name: String,
    /// Base image.
    pub image: BuilddImage,
    /// Remote the base image is pulled from.
    pub image_remote: Remote,
    /// Runtime project.
    pub project: String,
    /// Runtime remote instances live on (default: local).
    pub remote: String,
    /// Delete the working instance when it stops (default: true).
    pub ephemeral: bool,
    /// Launch from a cached bootstrapped image (default: true).
    pub use_intermediate_image: bool,
    /// Default environment for commands run in the instance.
    pub run_environment: RunEnvironment,
    /// Bootstrap tunables.
    pub bootstrap: BootstrapConfig,
}

impl Default for LxdConfig {
    fn default() -> Self {
        Self {
            instance_name: String::new(),
            image: BuilddImage::Focal,
            image_remote: Remote::new(BUILDD_REMOTE_NAME, BUILDD_REMOTE_ADDR, BUILDD_REMOTE_PROTOCOL),
            project: DEFAULT_PROJECT.to_string(),
            remote: LOCAL_REMOTE.to_string(),
            ephemeral: true,
            use_intermediate_image: true,
            run_environment: default_run_environment(),
            bootstrap: BootstrapConfig::default(),
        }
    }
}

impl LxdConfig {
    /// Create a new config builder.
    pub fn builder() -> LxdConfigBuilder {
        LxdConfigBuilder::default()
    }

    /// Identity of the working instance.
    pub fn instance_id(&self) -> InstanceId {
        InstanceId::new(self.instance_name.clone())
            .with_project(self.project.clone())
            .with_remote(self.remote.clone())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.instance_name.is_empty() {
            return Err(CoreError::Config("instance_name is required".into()));
        }
        if !is_valid_instance_name(&self.instance_name) {
            return Err(CoreError::Config(format!(
                "invalid instance name {:?}: use letters, digits and '-', starting with a letter",
                self.instance_name
            )));
        }
        if self.project.is_empty() {
            return Err(CoreError::Config("project must not be empty".into()));
        }
        if self.remote.is_empty() {
            return Err(CoreError::Config("remote must not be empty".into()));
        }
        let remote = &self.image_remote;
        if remote.name.is_empty() || remote.addr.is_empty() || remote.protocol.is_empty() {
            return Err(CoreError::Config(
                "image remote needs a name, address and protocol".into(),
            ));
        }
        if self.bootstrap.hostname.is_empty() {
            return Err(CoreError::Config("hostname must not be empty".into()));
        }
        Ok(())
    }
}

/// LXD instance names: 1-63 chars, letters, digits and dashes, starting
/// with a letter and not ending with a dash.
fn is_valid_instance_name(name: &str) -> bool {
    name.len() <= 63
        && name.starts_with(|c: char| c.is_ascii_alphabetic())
        && !name.ends_with('-')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Builder for LxdConfig.
#[derive(Debug, Default)]
pub struct LxdConfigBuilder {
    config: LxdConfig,
}

impl LxdConfigBuilder {
    /// Set the working instance name.
    pub fn instance_name(mut self, name: impl Into<String>) -> Self {
        self.config.instance_name = name.into();
        self
    }

    /// Set the base image.
    pub fn image(mut self, image: BuilddImage) -> Self {
        self.config.image = image;
        self
    }

    /// Set the image remote.
    pub fn image_remote(mut self, remote: Remote) -> Self {
        self.config.image_remote = remote;
        self
    }

    /// Set the project.
    pub fn project(mut self, project: impl Into<String>) -> Self {
        self.config.project = project.into();
        self
    }

    /// Set the remote instances live on.
    pub fn remote(mut self, remote: impl Into<String>) -> Self {
        self.config.remote = remote.into();
        self
    }

    /// Whether the working instance is ephemeral.
    pub fn ephemeral(mut self, ephemeral: bool) -> Self {
        self.config.ephemeral = ephemeral;
        self
    }

    /// Whether to launch from a cached bootstrapped image.
    pub fn use_intermediate_image(mut self, enabled: bool) -> Self {
        self.config.use_intermediate_image = enabled;
        self
    }

    /// Replace the default run environment.
    pub fn run_environment(mut self, env: RunEnvironment) -> Self {
        self.config.run_environment = env;
        self
    }

    /// Set bootstrap tunables.
    pub fn bootstrap(mut self, bootstrap: BootstrapConfig) -> Self {
        self.config.bootstrap = bootstrap;
        self
    }

    /// Build the configuration, validating all required fields.
    pub fn build(self) -> Result<LxdConfig, CoreError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
