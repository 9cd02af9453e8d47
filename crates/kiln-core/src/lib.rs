//! # kiln-core
//!
//! Build-environment provisioning for kiln.
//!
//! This crate turns a container runtime into ready-to-use build
//! environments: it launches or resumes instances, bootstraps bare buildd
//! images, caches bootstrapped images, and moves files and directory trees
//! between the host and the environment.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                       kiln-core (host)                     │
//! ├────────────────────────────────────────────────────────────┤
//! │                                                            │
//! │  ┌─────────────────┐      ┌────────────────────────────┐   │
//! │  │    Provider     │─────▶│  ImageCache                │   │
//! │  │   - setup()     │      │   - ensure()               │   │
//! │  │   - teardown()  │      └────────────────────────────┘   │
//! │  └─────────────────┘                  │                    │
//! │           │                           ▼                    │
//! │           │               ┌────────────────────────────┐   │
//! │           │               │  Bootstrapper              │   │
//! │           │               │   networking, apt, snapd   │   │
//! │           ▼               └────────────────────────────┘   │
//! │  ┌─────────────────┐                                       │
//! │  │  Environment    │      ┌────────────────────────────┐   │
//! │  │   Host | Lxd    │─────▶│  sync: tar over a pipe     │   │
//! │  └─────────────────┘      └────────────────────────────┘   │
//! │           │                                                │
//! └───────────┼────────────────────────────────────────────────┘
//!             ▼
//! ┌────────────────────────────────────────────────────────────┐
//! │              kiln-lxd: RuntimeClient (lxc CLI)             │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use kiln_core::{BuilddImage, Executor, ExecOptions, LxdConfig, Provider};
//! use kiln_lxd::Lxc;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # async fn example() -> kiln_core::Result<()> {
//! let config = LxdConfig::builder()
//!     .instance_name("kiln-hello")
//!     .image(BuilddImage::Focal)
//!     .build()?;
//!
//! let mut provider = Provider::lxd(Arc::new(Lxc::new()), config);
//! let env = provider.setup().await?;
//!
//! env.sync_to(Path::new("./src"), Path::new("/root/project")).await?;
//! let output = env
//!     .execute_run(
//!         &["make".to_string(), "-C".to_string(), "/root/project".to_string()],
//!         &ExecOptions::checked(),
//!     )
//!     .await?;
//! println!("{}", output.stdout_lossy());
//!
//! provider.teardown(true).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **One Executor Contract**: host and container environments run commands the same way
//! - **Instance Lifecycle**: launch, resume, stop, delete; ephemeral or persistent
//! - **Image Bootstrap**: networking, package manager and snapd set up with readiness polling
//! - **Intermediate Images**: bootstrap once, launch from the published image afterwards
//! - **Directory Sync**: streamed tar transfer when a bind mount is not available

mod bootstrap;
mod cache;
mod config;
mod error;
mod executor;
mod host;
mod image;
mod instance;
mod provider;
mod retry;
pub mod sync;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use bootstrap::{BootstrapConfig, Bootstrapper, ReadinessFailure, DEFAULT_HOSTNAME};
pub use cache::{CacheOutcome, ImageCache};
pub use config::{
    default_run_environment, LxdConfig, LxdConfigBuilder, BUILDD_REMOTE_ADDR,
    BUILDD_REMOTE_NAME, BUILDD_REMOTE_PROTOCOL, MIN_RUNTIME_VERSION,
};
pub use error::{CoreError, Result};
pub use executor::{Environment, ExecOptions, ExecOutput, Executor, ProcessIo};
pub use host::{HostExecutor, DEFAULT_PATH};
pub use image::{BuilddImage, ImageRef, BUILDD_REVISION};
pub use instance::Instance;
pub use provider::{Backend, Provider, ProviderState};
pub use retry::{wait_until, Readiness, RetryPolicy};
