//! Razer Battery Tray - battery status for Razer peripherals, reconstructed
//! from Synapse diagnostic log files.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use razer_battery_tray::config::{ConfigLoader, SettingsStore, SynapseVersion};
use razer_battery_tray::supervisor::{SynapseLogPaths, WatcherSupervisor};
use razer_battery_tray::tray::ConsoleTray;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum VersionArg {
    Auto,
    V3,
    V4,
}

impl From<VersionArg> for SynapseVersion {
    fn from(arg: VersionArg) -> Self {
        match arg {
            VersionArg::Auto => SynapseVersion::Auto,
            VersionArg::V3 => SynapseVersion::V3,
            VersionArg::V4 => SynapseVersion::V4,
        }
    }
}

#[derive(Parser)]
#[command(
    name = "razer-battery-tray",
    about = "Battery status for Razer peripherals, fed by Synapse log files",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch Synapse logs and print device updates.
    Watch {
        /// Config file path (default: search standard locations).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Polling interval in seconds.
        #[arg(long)]
        poll_seconds: Option<u64>,
        /// Show only the device with this handle.
        #[arg(long)]
        device_handle: Option<String>,
        /// Log format to watch.
        #[arg(long, value_enum)]
        synapse_version: Option<VersionArg>,
    },
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Watch {
            config,
            poll_seconds,
            device_handle,
            synapse_version,
        } => {
            let loader = config.map_or_else(ConfigLoader::new, ConfigLoader::with_path);
            let mut settings = match loader.load() {
                Ok(settings) => settings,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to load configuration");
                    std::process::exit(1);
                }
            };
            if let Some(seconds) = poll_seconds {
                settings.polling_throttle_seconds = seconds;
            }
            if let Some(handle) = device_handle {
                settings.shown_device_handle = handle;
            }
            if let Some(version) = synapse_version {
                settings.synapse_version = version.into();
            }

            let Some(paths) = SynapseLogPaths::discover() else {
                tracing::error!("Could not resolve the local application-data directory");
                std::process::exit(1);
            };
            tracing::info!(
                synapse3_log = %paths.synapse3_log_path.display(),
                synapse4_dir = %paths.synapse4_log_dir.display(),
                poll_seconds = settings.polling_throttle_seconds,
                version = ?settings.synapse_version,
                "Starting Razer battery watcher"
            );

            let store = SettingsStore::new(settings);
            let mut supervisor =
                WatcherSupervisor::new(paths, store, Arc::new(ConsoleTray::new()));

            let shutdown = CancellationToken::new();
            {
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        tracing::info!("Shutting down");
                        shutdown.cancel();
                    }
                });
            }

            supervisor.run(shutdown).await;
        }
    }
}
