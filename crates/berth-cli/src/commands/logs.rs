//! `berth logs`: show the captured output of a container.

use berth_runtime::ContainerManager;
use clap::Args;

/// Arguments for the `logs` command.
#[derive(Args, Debug)]
pub struct LogsArgs {
    /// Container ID or name.
    pub container: String,
}

/// Executes the `logs` command.
///
/// # Errors
///
/// Returns an error if the container is not found or its log is unreadable.
pub fn execute(engine: &ContainerManager, args: &LogsArgs) -> anyhow::Result<()> {
    let id = engine.resolve(&args.container)?;
    let logs = engine.logs(&id)?;

    if logs.is_empty() {
        tracing::info!(id = %id, "no output captured");
    } else {
        print!("{logs}");
    }
    Ok(())
}
