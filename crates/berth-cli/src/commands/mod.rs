//! CLI command definitions and dispatch.

pub mod create;
pub mod events;
pub mod inspect;
pub mod logs;
pub mod ps;
pub mod rm;
pub mod start;
pub mod stop;

use std::path::PathBuf;

use anyhow::Context;
use berth_common::config::EngineConfig;
use berth_common::constants;
use berth_common::types::ContainerId;
use berth_runtime::ContainerManager;
use clap::{Parser, Subcommand};

/// berth: daemon-less container lifecycle engine.
#[derive(Parser, Debug)]
#[command(name = "berth", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Directory holding container records, logs and the image catalog.
    #[arg(long, global = true, env = "BERTH_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Engine configuration file (defaults to `<data-dir>/config.json`).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    pub log_json: bool,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a container from an image.
    Create(create::CreateArgs),
    /// Start created or stopped containers.
    Start(start::StartArgs),
    /// Stop running containers.
    Stop(stop::StopArgs),
    /// Remove containers.
    Rm(rm::RmArgs),
    /// List containers.
    Ps(ps::PsArgs),
    /// Show the full record of a container.
    Inspect(inspect::InspectArgs),
    /// Show the captured output of a container.
    Logs(logs::LogsArgs),
    /// Stream lifecycle events until interrupted.
    Events(events::EventsArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the engine cannot be opened or the command fails.
pub async fn execute(cli: Cli) -> anyhow::Result<()> {
    let engine = open_engine(cli.data_dir, cli.config).await?;
    match cli.command {
        Command::Create(args) => create::execute(&engine, args),
        Command::Start(args) => start::execute(&engine, args).await,
        Command::Stop(args) => stop::execute(&engine, args).await,
        Command::Rm(args) => rm::execute(&engine, args).await,
        Command::Ps(args) => ps::execute(&engine, &args),
        Command::Inspect(args) => inspect::execute(&engine, &args),
        Command::Logs(args) => logs::execute(&engine, &args),
        Command::Events(args) => events::execute(&engine, &args).await,
    }
}

async fn open_engine(
    data_dir: Option<PathBuf>,
    config_path: Option<PathBuf>,
) -> anyhow::Result<ContainerManager> {
    let config = match config_path {
        Some(path) => {
            let mut config = EngineConfig::load(&path)
                .with_context(|| format!("loading {}", path.display()))?;
            if let Some(dir) = data_dir {
                config.data_dir = dir;
            }
            config
        }
        None => {
            let dir = data_dir.unwrap_or_else(|| constants::data_dir().clone());
            let path = dir.join(constants::CONFIG_FILE);
            let mut config = EngineConfig::load_or_default(&path)
                .with_context(|| format!("loading {}", path.display()))?;
            config.data_dir = dir;
            config
        }
    };
    tracing::debug!(data_dir = %config.data_dir.display(), "configuration loaded");
    ContainerManager::open_native(config)
        .await
        .context("opening the engine")
}

/// Resolves every reference, failing on the first unknown one.
fn resolve_all(engine: &ContainerManager, references: &[String]) -> anyhow::Result<Vec<ContainerId>> {
    references
        .iter()
        .map(|reference| {
            engine
                .resolve(reference)
                .with_context(|| format!("no such container: {reference}"))
        })
        .collect()
}
