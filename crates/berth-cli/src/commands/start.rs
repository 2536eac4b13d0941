//! `berth start`: start created or stopped containers.

use berth_common::types::ContainerState;
use berth_runtime::ContainerManager;
use berth_runtime::events::BusMessage;
use clap::Args;

use crate::output;

/// Arguments for the `start` command.
#[derive(Args, Debug)]
pub struct StartArgs {
    /// Container IDs or names.
    #[arg(required = true)]
    pub containers: Vec<String>,

    /// Stay in the foreground, printing events until the containers stop.
    /// Ctrl-C stops them.
    #[arg(short, long)]
    pub attach: bool,
}

/// Executes the `start` command.
///
/// # Errors
///
/// Returns an error if a container is unknown or fails to start.
pub async fn execute(engine: &ContainerManager, args: StartArgs) -> anyhow::Result<()> {
    let ids = super::resolve_all(engine, &args.containers)?;
    let mut events = engine.subscribe_events();

    for id in &ids {
        engine.start(id).await?;
        println!("{id}");
    }
    if !args.attach {
        return Ok(());
    }

    let mut running = ids.clone();
    while !running.is_empty() {
        tokio::select! {
            message = events.recv() => {
                match message {
                    Some(BusMessage::Event(event)) => {
                        if running.contains(&event.container_id) {
                            println!("{}", output::format_event(&event));
                            if event.to_state != Some(ContainerState::Running) {
                                running.retain(|id| id != &event.container_id);
                            }
                        }
                    }
                    Some(BusMessage::Overflow { dropped }) => {
                        tracing::warn!(dropped, "event stream fell behind");
                    }
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, stopping attached containers");
                for id in &running {
                    engine.stop(id, engine.default_stop_timeout()).await?;
                }
                running.clear();
            }
        }
    }
    Ok(())
}
