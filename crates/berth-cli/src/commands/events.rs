//! `berth events`: stream lifecycle events until interrupted.
//!
//! The engine keeps watching the running containers while this command is
//! active, so their exits show up as they happen.

use berth_runtime::ContainerManager;
use berth_runtime::events::BusMessage;
use clap::Args;
use futures::StreamExt;

use crate::output;

/// Arguments for the `events` command.
#[derive(Args, Debug)]
pub struct EventsArgs {
    /// Only events for these containers (IDs or names).
    pub containers: Vec<String>,

    /// Print events as JSON lines.
    #[arg(long)]
    pub json: bool,
}

/// Executes the `events` command.
///
/// # Errors
///
/// Returns an error if a container filter does not resolve.
pub async fn execute(engine: &ContainerManager, args: &EventsArgs) -> anyhow::Result<()> {
    let only = super::resolve_all(engine, &args.containers)?;
    let mut stream = Box::pin(engine.subscribe_events().into_stream());

    loop {
        tokio::select! {
            message = stream.next() => {
                let Some(message) = message else { break };
                match message {
                    BusMessage::Event(event) => {
                        if !only.is_empty() && !only.contains(&event.container_id) {
                            continue;
                        }
                        if args.json {
                            println!("{}", serde_json::to_string(&event)?);
                        } else {
                            println!("{}", output::format_event(&event));
                        }
                    }
                    BusMessage::Overflow { dropped } => {
                        tracing::warn!(dropped, "event stream fell behind");
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                engine.shutdown();
            }
        }
    }
    Ok(())
}
