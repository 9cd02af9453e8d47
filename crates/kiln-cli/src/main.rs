//! `kiln`: provision a build environment and work inside it.
//!
//! Every subcommand provisions (or reuses) the environment described by the
//! `KILN_*` variables, see [`config::KilnConfig::from_env`].

mod config;

use clap::{Parser, Subcommand};
use config::{BackendKind, KilnConfig};
use kiln_core::{ExecOptions, Executor, HostExecutor, ProcessIo, Provider};
use kiln_lxd::Lxc;
use std::path::PathBuf;
use std::process::{ExitCode, Stdio};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "Provision build environments in LXD instances or on the host")]
#[command(version)]
struct Cli {
    /// Instance name (overrides KILN_INSTANCE)
    #[arg(long, global = true)]
    instance: Option<String>,

    /// Run on the host instead of in an instance
    #[arg(long, global = true)]
    host: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision the environment and leave it running
    Setup,

    /// Run a command in the environment
    Exec {
        /// Working directory inside the environment
        #[arg(long)]
        cwd: Option<String>,

        /// Command and arguments
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },

    /// Copy a host file or directory into the environment
    Push { source: PathBuf, destination: PathBuf },

    /// Copy a file or directory out of the environment
    Pull { source: PathBuf, destination: PathBuf },

    /// Bind-mount a host directory into the environment
    Mount { source: PathBuf, destination: PathBuf },

    /// Stop the environment
    Teardown {
        /// Delete the instance as well
        #[arg(long)]
        clean: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr so command output stays clean on stdout
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("kiln=info,kiln_core=info,kiln_lxd=info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(Cli::parse()).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn provider(config: &KilnConfig) -> anyhow::Result<Provider> {
    match config.backend {
        BackendKind::Host => {
            let mut host = HostExecutor::new();
            if config.sudo {
                host = host.with_sudo(config.sudo_user.clone());
            }
            Ok(Provider::host(host))
        }
        BackendKind::Lxd => Ok(Provider::lxd(Arc::new(Lxc::new()), config.lxd_config()?)),
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut config = KilnConfig::from_env()?;
    if let Some(instance) = cli.instance {
        config.instance_name = instance;
    }
    if cli.host {
        config.backend = BackendKind::Host;
    }
    tracing::debug!(?config, "Configuration loaded");

    let mut provider = provider(&config)?;

    match cli.command {
        Commands::Setup => {
            let env = provider.setup().await?;
            println!("{}", env.describe());
        }
        Commands::Exec { cwd, command } => {
            let env = provider.setup().await?;
            let mut options = ExecOptions::default();
            if let Some(cwd) = cwd {
                options = options.cwd(cwd);
            }
            let io = ProcessIo {
                stdin: Stdio::inherit(),
                stdout: Stdio::inherit(),
                stderr: Stdio::inherit(),
            };
            let mut child = env.execute_popen(&command, &options, io)?;
            let status = child.wait().await?;
            let code = status.code().unwrap_or(1);
            return Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)));
        }
        Commands::Push {
            source,
            destination,
        } => {
            let env = provider.setup().await?;
            env.sync_to(&source, &destination).await?;
        }
        Commands::Pull {
            source,
            destination,
        } => {
            let env = provider.setup().await?;
            env.sync_from(&source, &destination).await?;
        }
        Commands::Mount {
            source,
            destination,
        } => {
            let env = provider.setup().await?;
            if !env.supports_mount() {
                anyhow::bail!("{} does not support mounts", env.describe());
            }
            env.mount(&source, &destination).await?;
        }
        Commands::Teardown { clean } => {
            if provider.attach().await?.is_none() {
                tracing::info!(instance = %config.instance_name, "Nothing to tear down");
                return Ok(ExitCode::SUCCESS);
            }
            provider.teardown(clean).await?;
        }
    }

    Ok(ExitCode::SUCCESS)
}
