//! Configuration for the `kiln` binary.
//!
//! Configuration is loaded from environment variables with sensible defaults.

use kiln_core::{
    BootstrapConfig, BuilddImage, CoreError, LxdConfig, ReadinessFailure, BUILDD_REMOTE_ADDR,
    BUILDD_REMOTE_NAME, BUILDD_REMOTE_PROTOCOL, DEFAULT_HOSTNAME,
};
use kiln_lxd::{Remote, DEFAULT_PROJECT, LOCAL_REMOTE};

/// Which kind of environment to provision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// An LXD instance (default)
    #[default]
    Lxd,
    /// The host itself
    Host,
}

impl BackendKind {
    /// Parse from string (case-insensitive).
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "host" | "local" => Self::Host,
            _ => Self::Lxd,
        }
    }
}

/// Configuration for the kiln binary.
#[derive(Debug, Clone)]
pub struct KilnConfig {
    /// Environment kind (default: lxd).
    pub backend: BackendKind,

    /// Working instance name.
    pub instance_name: String,

    /// Base image (default: focal).
    pub image: BuilddImage,

    /// Runtime project.
    pub project: String,

    /// Runtime remote instances live on.
    pub remote: String,

    /// Delete the instance when it stops (default: true).
    pub ephemeral: bool,

    /// Launch from a cached bootstrapped image (default: true).
    pub use_intermediate_image: bool,

    /// Image remote name.
    pub image_remote_name: String,

    /// Image remote address.
    pub image_remote_addr: String,

    /// Image remote protocol.
    pub image_remote_protocol: String,

    /// Hostname set inside bootstrapped images.
    pub hostname: String,

    /// Fail setup when a readiness check times out (default: false).
    pub strict_readiness: bool,

    /// Run host commands through sudo (host backend only).
    pub sudo: bool,

    /// User for sudo (host backend only).
    pub sudo_user: Option<String>,
}

impl Default for KilnConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Lxd,
            instance_name: "kiln-builder".to_string(),
            image: BuilddImage::Focal,
            project: DEFAULT_PROJECT.to_string(),
            remote: LOCAL_REMOTE.to_string(),
            ephemeral: true,
            use_intermediate_image: true,
            image_remote_name: BUILDD_REMOTE_NAME.to_string(),
            image_remote_addr: BUILDD_REMOTE_ADDR.to_string(),
            image_remote_protocol: BUILDD_REMOTE_PROTOCOL.to_string(),
            hostname: DEFAULT_HOSTNAME.to_string(),
            strict_readiness: false,
            sudo: false,
            sudo_user: None,
        }
    }
}

fn flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| v != "false" && v != "0")
        .unwrap_or(default)
}

fn string(name: &str, default: String) -> String {
    std::env::var(name).unwrap_or(default)
}

impl KilnConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `KILN_BACKEND` | `lxd` (lxd, host) |
    /// | `KILN_INSTANCE` | `kiln-builder` |
    /// | `KILN_IMAGE` | `20.04` (16.04, 18.04, 20.04 or codename) |
    /// | `KILN_PROJECT` | `default` |
    /// | `KILN_REMOTE` | `local` |
    /// | `KILN_EPHEMERAL` | `true` |
    /// | `KILN_INTERMEDIATE_IMAGE` | `true` |
    /// | `KILN_IMAGE_REMOTE_NAME` | `ubuntu-buildd` |
    /// | `KILN_IMAGE_REMOTE_ADDR` | `https://cloud-images.ubuntu.com/buildd/releases` |
    /// | `KILN_IMAGE_REMOTE_PROTOCOL` | `simplestreams` |
    /// | `KILN_HOSTNAME` | `kiln-builder` |
    /// | `KILN_STRICT_READINESS` | `false` |
    /// | `KILN_SUDO` | `false` |
    /// | `KILN_SUDO_USER` | unset |
    pub fn from_env() -> Result<Self, CoreError> {
        let default = Self::default();

        let image = match std::env::var("KILN_IMAGE") {
            Ok(v) => v.parse()?,
            Err(_) => default.image,
        };

        Ok(Self {
            backend: std::env::var("KILN_BACKEND")
                .map(|v| BackendKind::parse(&v))
                .unwrap_or(default.backend),
            instance_name: string("KILN_INSTANCE", default.instance_name),
            image,
            project: string("KILN_PROJECT", default.project),
            remote: string("KILN_REMOTE", default.remote),
            ephemeral: flag("KILN_EPHEMERAL", default.ephemeral),
            use_intermediate_image: flag("KILN_INTERMEDIATE_IMAGE", default.use_intermediate_image),
            image_remote_name: string("KILN_IMAGE_REMOTE_NAME", default.image_remote_name),
            image_remote_addr: string("KILN_IMAGE_REMOTE_ADDR", default.image_remote_addr),
            image_remote_protocol: string(
                "KILN_IMAGE_REMOTE_PROTOCOL",
                default.image_remote_protocol,
            ),
            hostname: string("KILN_HOSTNAME", default.hostname),
            strict_readiness: flag("KILN_STRICT_READINESS", default.strict_readiness),
            sudo: flag("KILN_SUDO", default.sudo),
            sudo_user: std::env::var("KILN_SUDO_USER").ok(),
        })
    }

    /// Provider configuration for the LXD backend.
    pub fn lxd_config(&self) -> Result<LxdConfig, CoreError> {
        let bootstrap = BootstrapConfig {
            hostname: self.hostname.clone(),
            on_timeout: if self.strict_readiness {
                ReadinessFailure::Abort
            } else {
                ReadinessFailure::Warn
            },
            ..Default::default()
        };

        LxdConfig::builder()
            .instance_name(self.instance_name.clone())
            .image(self.image)
            .image_remote(Remote::new(
                self.image_remote_name.clone(),
                self.image_remote_addr.clone(),
                self.image_remote_protocol.clone(),
            ))
            .project(self.project.clone())
            .remote(self.remote.clone())
            .ephemeral(self.ephemeral)
            .use_intermediate_image(self.use_intermediate_image)
            .bootstrap(bootstrap)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = KilnConfig::default();
        assert_eq!(config.backend, BackendKind::Lxd);
        assert_eq!(config.instance_name, "kiln-builder");
        assert_eq!(config.image, BuilddImage::Focal);
        assert!(config.ephemeral);
        assert!(config.use_intermediate_image);
        assert!(!config.strict_readiness);
    }

    #[test]
    fn test_backend_kind_parsing() {
        assert_eq!(BackendKind::parse("host"), BackendKind::Host);
        assert_eq!(BackendKind::parse("HOST"), BackendKind::Host);
        assert_eq!(BackendKind::parse("lxd"), BackendKind::Lxd);
        assert_eq!(BackendKind::parse("anything"), BackendKind::Lxd);
    }

    #[test]
    fn test_lxd_config_carries_settings() {
        let config = KilnConfig {
            instance_name: "snapcraft-hello".into(),
            image: BuilddImage::Bionic,
            ephemeral: false,
            strict_readiness: true,
            hostname: "hello-builder".into(),
            ..Default::default()
        };
        let lxd = config.lxd_config().unwrap();
        assert_eq!(lxd.instance_name, "snapcraft-hello");
        assert_eq!(lxd.image, BuilddImage::Bionic);
        assert!(!lxd.ephemeral);
        assert_eq!(lxd.bootstrap.on_timeout, ReadinessFailure::Abort);
        assert_eq!(lxd.bootstrap.hostname, "hello-builder");
        assert_eq!(lxd.image_remote.name, "ubuntu-buildd");
    }

    #[test]
    fn test_lxd_config_rejects_bad_instance_name() {
        let config = KilnConfig {
            instance_name: "not valid".into(),
            ..Default::default()
        };
        assert!(config.lxd_config().is_err());
    }
}
