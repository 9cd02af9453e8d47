//! # kiln-lxd
//!
//! Runtime client layer for kiln build environments.
//! Provides the [`RuntimeClient`] contract and an implementation driving
//! LXD through the `lxc` command-line tool.
//!
//! ## Quick Start
//!
//! ```no_run
//! use kiln_lxd::{InstanceId, LaunchRequest, Lxc, RuntimeClient};
//! use std::collections::BTreeMap;
//!
//! # async fn example() -> kiln_lxd::Result<()> {
//! let lxc = Lxc::new();
//! lxc.ensure_installed().await?;
//!
//! let id = InstanceId::new("builder");
//! lxc.launch(&LaunchRequest {
//!     instance: id.clone(),
//!     image_remote: "ubuntu".into(),
//!     image: "20.04".into(),
//!     config: BTreeMap::new(),
//!     ephemeral: true,
//! })
//! .await?;
//!
//! let output = lxc
//!     .exec(&id, &["echo".to_string(), "hi".to_string()], &BTreeMap::new(), None)
//!     .output()
//!     .await?;
//! assert_eq!(output.stdout, b"hi\n");
//!
//! // Ephemeral instances are deleted on stop
//! lxc.stop(&id).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Instance Lifecycle**: launch, start, stop, delete, list
//! - **Exec**: prepared `tokio::process::Command`s, so callers own stdio wiring
//! - **File Transfer**: push with mode/ownership, pull (optionally recursive)
//! - **Devices, Images, Remotes, Profiles**: the administrative surface kiln needs
//! - **Installer**: installs LXD from the snap store and reports its version

mod client;
mod command;
mod error;
mod lxc;
mod lxd;
mod types;

pub use client::RuntimeClient;
pub use command::quote_command;
pub use error::{LxdError, Result};
pub use lxc::Lxc;
pub use lxd::Lxd;
pub use types::{
    Device, FilePush, ImageAlias, ImageInfo, InstanceId, InstanceInfo, InstanceStatus,
    LaunchRequest, Remote, RemoteInfo, RunEnvironment, RuntimeVersion, Scope, ServerInfo,
    DEFAULT_PROJECT, LOCAL_REMOTE,
};
