//! `berth create`: create a container from an image.

use berth_common::types::PortSpec;
use berth_runtime::{ContainerManager, CreateRequest};
use clap::Args;

/// Arguments for the `create` command.
#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Image reference, `name[:tag]`.
    pub image: String,

    /// Unique container name.
    #[arg(long)]
    pub name: Option<String>,

    /// Publish a port, `[host:]container[/tcp|udp]`. Without a host port
    /// one is picked from the configured range.
    #[arg(short, long = "publish", value_name = "PORT")]
    pub publish: Vec<PortSpec>,
}

/// Executes the `create` command and prints the new container id.
///
/// # Errors
///
/// Returns an error if the engine rejects the request.
pub fn execute(engine: &ContainerManager, args: CreateArgs) -> anyhow::Result<()> {
    let request = CreateRequest {
        image_ref: args.image,
        name: args.name,
        ports: args.publish,
    };
    let id = engine.create(request)?;
    println!("{id}");
    Ok(())
}
