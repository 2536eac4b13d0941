//! `berth stop`: stop running containers.

use std::time::Duration;

use berth_runtime::ContainerManager;
use clap::Args;

/// Arguments for the `stop` command.
#[derive(Args, Debug)]
pub struct StopArgs {
    /// Container IDs or names.
    #[arg(required = true)]
    pub containers: Vec<String>,

    /// Seconds to wait after the graceful signal before killing.
    #[arg(short, long)]
    pub time: Option<u64>,
}

/// Executes the `stop` command.
///
/// # Errors
///
/// Returns an error if a container is unknown or not running.
pub async fn execute(engine: &ContainerManager, args: StopArgs) -> anyhow::Result<()> {
    let timeout = args
        .time
        .map_or_else(|| engine.default_stop_timeout(), Duration::from_secs);
    for id in super::resolve_all(engine, &args.containers)? {
        engine.stop(&id, timeout).await?;
        println!("{id}");
    }
    Ok(())
}
