//! Lock gateway: mirrors smart locks and door openers onto an MQTT broker.

mod config;
mod gateway;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use lockbridge_storage::{FileRegion, RestartSupervisor};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::{BridgeConfig, DEFAULT_CONFIG_PATH};
use crate::gateway::Exit;

/// Exit code asking the service manager to start the gateway again.
const RESTART_EXIT_CODE: u8 = 3;

#[derive(Parser, Debug)]
#[command(name = "lockbridge")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `lockbridge_bridge=trace`.
    #[arg(long, global = true, env = "LOCKBRIDGE_LOG")]
    log: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the gateway (default).
    Run,
    /// Validate the configuration file and print the effective settings.
    CheckConfig,
    /// Print the reason recorded before the last restart.
    RestartReason,
}

fn init_tracing(filter: Option<&str>) {
    let filter = filter
        .map(EnvFilter::new)
        .unwrap_or_else(|| {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lockbridge=info"))
        });
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(args: &Args) -> Result<BridgeConfig> {
    match &args.config {
        Some(path) => BridgeConfig::load(path, true),
        None => BridgeConfig::load(Path::new(DEFAULT_CONFIG_PATH), false),
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    let config = load_config(&args)?;
    match args.command.unwrap_or(Command::Run) {
        Command::Run => {
            info!("lockbridge {} starting", lockbridge_core::VERSION);
            match gateway::run(config).await? {
                Exit::Shutdown => Ok(ExitCode::SUCCESS),
                Exit::Restart(reason) => {
                    info!("Exiting for restart ({})", reason);
                    Ok(ExitCode::from(RESTART_EXIT_CODE))
                }
            }
        }
        Command::CheckConfig => {
            println!("{:#?}", config);
            Ok(ExitCode::SUCCESS)
        }
        Command::RestartReason => {
            let restarts = RestartSupervisor::new(
                FileRegion::new(&config.storage.restart_record),
                config.restart.policy(),
            );
            match restarts.read_last_reason()? {
                Some(reason) => println!("{} ({})", reason, reason.code()),
                None => println!("none recorded"),
            }
            println!("bootloop counter: {}", restarts.bootloop_counter()?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.log.as_deref());

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
