//! SentryLab - Home Assistant discovery for Docker hosts on Proxmox
//!
//! Registers a VM/CT and its containers in Home Assistant over MQTT and keeps
//! their state topics current:
//! - `setup`: discovery configs + initial state
//! - `monitor`: periodic state publication
//! - `remove`: clears every retained topic of the device
//! - `status`: observe only, prints what it finds

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use sentrylab_agent::{
    Agent, BrokerClient, ConfigError, DeviceTarget, GuestKind, OfflinePublisher, OfflineReason,
    ProxmoxExecutor, Publish, Settings,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::level_filters::LevelFilter;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sentrylab")]
#[command(about = "Home Assistant MQTT discovery and monitoring of Docker hosts on Proxmox")]
#[command(version)]
struct Cli {
    /// Config file (default: SENTRYLAB_CONFIG, then the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log publishes instead of sending them
    #[arg(long, global = true)]
    dry_run: bool,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Ct,
    Vm,
}

impl From<KindArg> for GuestKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Ct => GuestKind::Ct,
            KindArg::Vm => GuestKind::Vm,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Publish discovery configs and the current state of a guest
    Setup {
        vmid: u32,
        /// Guest type assumed when the VMID cannot be found
        #[arg(long, value_enum, default_value_t = KindArg::Ct)]
        kind: KindArg,
    },
    /// Publish the state of a guest every poll interval
    Monitor {
        vmid: u32,
        /// Single pass, then exit
        #[arg(long)]
        once: bool,
        #[arg(long, value_enum, default_value_t = KindArg::Ct)]
        kind: KindArg,
    },
    /// Clear every retained topic of a guest
    Remove {
        vmid: u32,
        /// Container whose topics must be cleared even if it is gone
        #[arg(long = "container")]
        containers: Vec<String>,
        #[arg(long, value_enum, default_value_t = KindArg::Ct)]
        kind: KindArg,
    },
    /// Inspect a guest and print what was found, without publishing
    Status {
        vmid: u32,
        #[arg(long, value_enum, default_value_t = KindArg::Ct)]
        kind: KindArg,
    },
}

impl Commands {
    fn target(&self) -> DeviceTarget {
        let (vmid, kind) = match self {
            Commands::Setup { vmid, kind }
            | Commands::Monitor { vmid, kind, .. }
            | Commands::Remove { vmid, kind, .. }
            | Commands::Status { vmid, kind } => (*vmid, *kind),
        };
        DeviceTarget {
            vmid,
            kind_hint: kind.into(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.downcast_ref::<ConfigError>().is_some() => {
            error!("Configuration error: {:#}", e);
            ExitCode::from(2)
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { LevelFilter::DEBUG } else { LevelFilter::INFO };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(cli: Cli) -> Result<()> {
    let mut settings = Settings::load(cli.config.as_deref()).await?;
    if cli.dry_run {
        settings.agent.dry_run = true;
    }
    let proxmox_host = settings.proxmox_host()?;
    let target = cli.command.target();

    info!("SentryLab v{} on {}", env!("CARGO_PKG_VERSION"), proxmox_host);

    let executor = Arc::new(ProxmoxExecutor::new(
        settings.agent.ssh_target.clone(),
        settings.agent.command_timeout_secs,
    ));

    let broker = match &cli.command {
        Commands::Status { .. } => None,
        _ => connect(&settings, &proxmox_host, target.vmid).await,
    };
    let mqtt: Arc<dyn Publish> = match &broker {
        Some(client) => client.clone() as Arc<dyn Publish>,
        None if settings.agent.dry_run => Arc::new(OfflinePublisher::new(OfflineReason::DryRun)),
        None => Arc::new(OfflinePublisher::new(OfflineReason::Unavailable)),
    };

    let agent = Agent::new(&settings, &proxmox_host, mqtt, executor);
    let result = match &cli.command {
        Commands::Setup { .. } => agent.setup(&target).await.map(|_| ()),
        Commands::Monitor { once, .. } => agent.monitor(&target, *once).await,
        Commands::Remove { containers, .. } => agent.remove(&target, containers).await.map(|report| {
            if report.skipped {
                warn!("Removal skipped: MQTT broker unavailable");
            } else {
                info!("Removal done: {} topics cleared, {} failed", report.attempted - report.failed, report.failed);
            }
        }),
        Commands::Status { .. } => {
            print!("{}", agent.status(&target).await);
            Ok(())
        }
    };

    drop(agent);
    if let Some(client) = broker {
        match Arc::try_unwrap(client) {
            Ok(client) => client.shutdown().await,
            Err(_) => warn!("MQTT client still in use, not disconnected cleanly"),
        }
    }

    result.context("Workflow failed")
}

/// Broker connection, or `None` for dry-run and degraded mode.
async fn connect(settings: &Settings, proxmox_host: &str, vmid: u32) -> Option<Arc<BrokerClient>> {
    if settings.agent.dry_run {
        info!("Dry run: nothing is sent to the MQTT broker");
        return None;
    }
    if !settings.mqtt_enabled() {
        warn!("MQTT broker not configured (MQTT_BROKER), running without publishing");
        return None;
    }

    let short_id = uuid::Uuid::new_v4().simple().to_string();
    let client_id = format!("sentrylab-{}-{}-{}", proxmox_host, vmid, &short_id[..8]);
    match BrokerClient::connect(&settings.mqtt, &client_id).await {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            warn!("MQTT broker unreachable ({}), running without publishing", e);
            None
        }
    }
}
