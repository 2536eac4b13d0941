//! Isolation provider abstraction.
//!
//! The engine never touches namespaces or process creation directly; it
//! hands a resolved [`IsolationRequest`] to an [`IsolationProvider`] and
//! works with the returned [`IsolationHandle`].

pub mod native;

use std::path::PathBuf;

use async_trait::async_trait;
use berth_common::constants::{CONTAINER_ID_ENV, PORT_ENV_PREFIX};
use berth_common::error::Result;
use berth_common::types::{ContainerId, ExitCode, PortBinding, StopSignal};
use serde::{Deserialize, Serialize};

/// What to run for an image, as produced by an image resolver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchSpec {
    /// Program and arguments.
    pub command: Vec<String>,
    /// Environment variables.
    pub env: Vec<(String, String)>,
    /// Working directory, inherited when unset.
    pub working_dir: Option<PathBuf>,
}

/// Everything a provider needs to start one workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsolationRequest {
    /// Container the workload belongs to.
    pub container_id: ContainerId,
    /// Resolved launch specification.
    pub launch: LaunchSpec,
    /// Port bindings to apply.
    pub port_bindings: Vec<PortBinding>,
}

impl IsolationRequest {
    /// Environment for the workload: the image env followed by the
    /// container id and one `BERTH_PORT_<port>_<PROTO>=<host port>` entry
    /// per binding.
    #[must_use]
    pub fn environment(&self) -> Vec<(String, String)> {
        let mut env = self.launch.env.clone();
        env.push((CONTAINER_ID_ENV.to_string(), self.container_id.to_string()));
        for binding in &self.port_bindings {
            env.push((
                format!(
                    "{PORT_ENV_PREFIX}{}_{}",
                    binding.container_port,
                    binding.protocol.to_string().to_ascii_uppercase()
                ),
                binding.host_port.to_string(),
            ));
        }
        env
    }
}

/// Provider-side identity of a launched workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IsolationHandle {
    /// OS process id.
    pub pid: u32,
    /// Kernel start time, used to tell the workload from a recycled pid.
    pub start_time: Option<u64>,
}

/// Supplies OS-level process isolation.
#[async_trait]
pub trait IsolationProvider: Send + Sync {
    /// Starts an isolated workload.
    ///
    /// # Errors
    ///
    /// Returns [`berth_common::error::BerthError::Launch`] with the
    /// provider's own detail when the workload cannot be started.
    async fn isolate(&self, request: &IsolationRequest) -> Result<IsolationHandle>;

    /// Delivers `signal` to the workload. Signalling a workload that has
    /// already exited succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal cannot be delivered to a live workload.
    fn terminate(&self, handle: &IsolationHandle, signal: StopSignal) -> Result<()>;

    /// Waits until a workload started by this provider instance exits.
    ///
    /// Returns [`ExitCode::Unknown`] when the status cannot be observed.
    async fn await_exit(&self, handle: &IsolationHandle) -> ExitCode;

    /// Whether the workload behind `handle` is still alive and is still
    /// the same process that was launched.
    fn is_running(&self, handle: &IsolationHandle) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_common::types::Protocol;

    #[test]
    fn environment_announces_ports_and_id() {
        let request = IsolationRequest {
            container_id: ContainerId::new("abc"),
            launch: LaunchSpec {
                command: vec!["nginx".into()],
                env: vec![("MODE".into(), "prod".into())],
                working_dir: None,
            },
            port_bindings: vec![PortBinding {
                host_port: 8080,
                container_port: 80,
                protocol: Protocol::Tcp,
            }],
        };
        let env = request.environment();
        assert_eq!(env[0], ("MODE".to_string(), "prod".to_string()));
        assert!(env.contains(&("BERTH_CONTAINER_ID".to_string(), "abc".to_string())));
        assert!(env.contains(&("BERTH_PORT_80_TCP".to_string(), "8080".to_string())));
    }
}
