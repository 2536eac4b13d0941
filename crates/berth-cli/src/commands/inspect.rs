//! `berth inspect`: show the full record of a container.

use berth_runtime::ContainerManager;
use clap::Args;

/// Arguments for the `inspect` command.
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Container ID or name.
    pub container: String,
}

/// Executes the `inspect` command, printing the record as JSON.
///
/// # Errors
///
/// Returns an error if the container is not found.
pub fn execute(engine: &ContainerManager, args: &InspectArgs) -> anyhow::Result<()> {
    let id = engine.resolve(&args.container)?;
    let record = engine.inspect(&id)?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}
