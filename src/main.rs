//! # meshlink daemon
//!
//! Connects to one mesh radio, keeps the session alive, maps the mesh with periodic
//! traceroutes and lets several client applications share the radio through the
//! virtual node proxy.
//!
//! ```bash
//! meshlink run --config /etc/meshlink.toml
//! meshlink validate --config /etc/meshlink.toml
//! meshlink example-config > meshlink.toml
//! ```
//!
//! Without `--config`, settings come from the defaults plus `MESHTASTIC_NODE_IP`,
//! `MESHTASTIC_TCP_PORT` and the `MESHLINK_*` variables.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{debug, error, info, warn};

use meshlink::config::MeshLinkConfig;
use meshlink::error::Result;
use meshlink::utils::logging::init_logging;
use meshlink::utils::metrics::global_metrics;
use meshlink::utils::timeout::SHUTDOWN_TIMEOUT;
use meshlink::{DeviceLink, MemoryStorage, ProtocolDispatcher, TracerouteScheduler, VirtualNodeProxy};

#[derive(Parser, Debug)]
#[command(name = "meshlink")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Connect to the device and run the proxy and scheduler (default)
    Run,

    /// Validate the configuration and exit
    Validate,

    /// Print a configuration file with every default filled in
    ExampleConfig,
}

fn load_config(path: Option<&PathBuf>) -> Result<MeshLinkConfig> {
    match path {
        Some(path) => MeshLinkConfig::from_file(path),
        None => MeshLinkConfig::from_env(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::ExampleConfig => {
            println!("{}", MeshLinkConfig::example_config());
            ExitCode::SUCCESS
        }
        Commands::Validate => match load_config(cli.config.as_ref()) {
            Ok(config) => {
                let errors = config.validate();
                if errors.is_empty() {
                    println!("Configuration is valid");
                    ExitCode::SUCCESS
                } else {
                    for e in errors {
                        eprintln!("  - {e}");
                    }
                    ExitCode::FAILURE
                }
            }
            Err(e) => {
                eprintln!("{e}");
                ExitCode::FAILURE
            }
        },
        Commands::Run => {
            let config = match load_config(cli.config.as_ref()) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("{e}");
                    return ExitCode::FAILURE;
                }
            };
            if let Err(e) = init_logging(&config.logging) {
                eprintln!("Failed to initialize logging: {e}");
                return ExitCode::FAILURE;
            }
            match run(config).await {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    error!(error = %e, "meshlink exited with error");
                    ExitCode::FAILURE
                }
            }
        }
    }
}

async fn run(config: MeshLinkConfig) -> Result<()> {
    config.validate_strict()?;

    let storage = Arc::new(MemoryStorage::with_history_limit(config.storage.history_limit));
    let device = DeviceLink::new(config.device.clone());
    let dispatcher = ProtocolDispatcher::new(Arc::new(device.clone()), storage);
    dispatcher.attach(&device)?;
    dispatcher.on_domain_event(|event| debug!(kind = event.kind(), "Domain event"))?;

    info!(address = %config.device.address(), "Connecting to device");
    device.connect()?;

    let scheduler = if config.traceroute.enabled {
        Some(TracerouteScheduler::new(dispatcher.clone(), config.traceroute.clone())?.spawn())
    } else {
        None
    };

    let proxy = if config.proxy.enabled {
        let proxy = VirtualNodeProxy::bind(&config.proxy, dispatcher.clone()).await?;
        info!(address = %proxy.local_addr()?, "Virtual node proxy listening");
        Some(proxy.spawn())
    } else {
        None
    };

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutting down");

    if let Some(task) = proxy {
        task.shutdown(SHUTDOWN_TIMEOUT).await;
    }
    if let Some(task) = scheduler {
        task.shutdown(SHUTDOWN_TIMEOUT).await;
    }
    device.disconnect().await;

    global_metrics().log_metrics();
    Ok(())
}
