//! `berth ps`: list containers.

use berth_common::types::ContainerState;
use berth_runtime::ContainerManager;
use berth_runtime::container::ListFilter;
use clap::Args;

use crate::output;

/// Arguments for the `ps` command.
#[derive(Args, Debug)]
pub struct PsArgs {
    /// Show all containers (default shows just running).
    #[arg(short, long)]
    pub all: bool,

    /// Only containers in this state.
    #[arg(long, conflicts_with = "all")]
    pub state: Option<ContainerState>,

    /// Only containers whose name starts with this prefix.
    #[arg(long)]
    pub name: Option<String>,

    /// Print JSON instead of a table.
    #[arg(long)]
    pub json: bool,
}

/// Executes the `ps` command.
///
/// # Errors
///
/// Returns an error if the state store cannot be read.
pub fn execute(engine: &ContainerManager, args: &PsArgs) -> anyhow::Result<()> {
    let state = match (args.state, args.all) {
        (Some(state), _) => Some(state),
        (None, true) => None,
        (None, false) => Some(ContainerState::Running),
    };
    let filter = ListFilter {
        state,
        name_prefix: args.name.clone(),
    };
    let containers = engine.list(&filter)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&containers)?);
    } else {
        print!("{}", output::format_table(&containers, chrono::Utc::now()));
    }
    Ok(())
}
