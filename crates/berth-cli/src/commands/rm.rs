//! `berth rm`: remove containers.

use berth_common::types::ContainerState;
use berth_runtime::ContainerManager;
use clap::Args;

/// Arguments for the `rm` command.
#[derive(Args, Debug)]
pub struct RmArgs {
    /// Container IDs or names.
    #[arg(required = true)]
    pub containers: Vec<String>,

    /// Stop running containers first.
    #[arg(short, long)]
    pub force: bool,
}

/// Executes the `rm` command.
///
/// # Errors
///
/// Returns an error if a container is unknown, or running without `--force`.
pub async fn execute(engine: &ContainerManager, args: RmArgs) -> anyhow::Result<()> {
    for id in super::resolve_all(engine, &args.containers)? {
        if args.force && engine.inspect(&id)?.state == ContainerState::Running {
            engine.stop(&id, engine.default_stop_timeout()).await?;
        }
        engine.remove(&id).await?;
        println!("{id}");
    }
    Ok(())
}
