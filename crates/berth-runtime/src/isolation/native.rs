//! Native isolation provider: workloads are host processes in their own
//! process group, optionally inside fresh Linux namespaces.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use berth_common::config::NamespaceSet;
use berth_common::error::{BerthError, Result};
use berth_common::types::{ExitCode, StopSignal};
use berth_core::process::ProcessFingerprint;
use tokio::process::{Child, Command};

use super::{IsolationHandle, IsolationProvider, IsolationRequest};

/// `PATH` given to workloads whose image does not set one.
const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Provider that launches workloads as child processes of the engine.
///
/// Output goes to `<logs_dir>/<id>.log`. Children are not killed when the
/// engine exits; a restarted engine re-adopts them by pid and start time.
#[derive(Debug)]
pub struct NativeIsolation {
    logs_dir: PathBuf,
    namespaces: NamespaceSet,
    children: Mutex<HashMap<u32, Child>>,
}

impl NativeIsolation {
    /// Creates a provider writing workload output under `logs_dir`.
    #[must_use]
    pub fn new(logs_dir: impl Into<PathBuf>, namespaces: NamespaceSet) -> Self {
        Self {
            logs_dir: logs_dir.into(),
            namespaces,
            children: Mutex::new(HashMap::new()),
        }
    }

    fn build_command(&self, request: &IsolationRequest) -> Result<Command> {
        let (program, args) =
            request
                .launch
                .command
                .split_first()
                .ok_or_else(|| BerthError::Launch {
                    message: "image defines no command".into(),
                })?;

        let stdout = crate::logs::open_for_append(&self.logs_dir, &request.container_id)
            .map_err(|e| BerthError::Launch {
                message: e.to_string(),
            })?;
        let stderr = stdout.try_clone().map_err(|e| BerthError::Launch {
            message: format!("cannot share log file: {e}"),
        })?;

        let mut cmd = Command::new(program);
        let _ = cmd
            .args(args)
            .env_clear()
            .envs(request.environment())
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(false);
        if !request.launch.env.iter().any(|(k, _)| k == "PATH") {
            let _ = cmd.env("PATH", DEFAULT_PATH);
        }
        if let Some(dir) = &request.launch.working_dir {
            let _ = cmd.current_dir(dir);
        }
        #[cfg(unix)]
        {
            let _ = cmd.process_group(0);
        }
        #[cfg(target_os = "linux")]
        {
            if self.namespaces.any() {
                let namespaces = self.namespaces;
                // SAFETY: the closure runs in the forked child before exec and
                // only issues the unshare(2) syscall, which is async-signal-safe.
                unsafe {
                    let _ = cmd.pre_exec(move || {
                        berth_core::namespace::unshare_namespaces(&namespaces)
                    });
                }
            }
        }
        Ok(cmd)
    }
}

#[cfg(unix)]
fn exit_code(status: std::process::ExitStatus) -> ExitCode {
    use std::os::unix::process::ExitStatusExt;

    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .map_or(ExitCode::Unknown, ExitCode::Code)
}

#[cfg(not(unix))]
fn exit_code(status: std::process::ExitStatus) -> ExitCode {
    status.code().map_or(ExitCode::Unknown, ExitCode::Code)
}

#[async_trait]
impl IsolationProvider for NativeIsolation {
    async fn isolate(&self, request: &IsolationRequest) -> Result<IsolationHandle> {
        let mut cmd = self.build_command(request)?;
        let child = cmd.spawn().map_err(|e| BerthError::Launch {
            message: format!("{}: {e}", request.launch.command.join(" ")),
        })?;
        let pid = child.id().ok_or_else(|| BerthError::Launch {
            message: "workload exited before its pid could be read".into(),
        })?;
        let fingerprint = ProcessFingerprint::capture(pid);
        let _ = self
            .children
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(pid, child);

        tracing::info!(id = %request.container_id, pid, "workload spawned");
        Ok(IsolationHandle {
            pid,
            start_time: fingerprint.start_time,
        })
    }

    fn terminate(&self, handle: &IsolationHandle, signal: StopSignal) -> Result<()> {
        if !self.is_running(handle) {
            tracing::debug!(pid = handle.pid, %signal, "workload already gone, signal skipped");
            return Ok(());
        }
        // The workload leads its own process group; signal all of it.
        match berth_core::process::send_group_signal(handle.pid, signal) {
            Err(BerthError::NotFound { .. }) => Ok(()),
            other => other,
        }
    }

    async fn await_exit(&self, handle: &IsolationHandle) -> ExitCode {
        let child = self
            .children
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle.pid);
        let Some(mut child) = child else {
            tracing::warn!(pid = handle.pid, "not a child of this engine, exit status unobservable");
            return ExitCode::Unknown;
        };
        match child.wait().await {
            Ok(status) => exit_code(status),
            Err(e) => {
                tracing::warn!(pid = handle.pid, error = %e, "waiting for workload failed");
                ExitCode::Unknown
            }
        }
    }

    fn is_running(&self, handle: &IsolationHandle) -> bool {
        ProcessFingerprint {
            pid: handle.pid,
            start_time: handle.start_time,
        }
        .matches_live_process()
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;
    use crate::isolation::LaunchSpec;
    use berth_common::types::ContainerId;

    fn request(command: &[&str]) -> IsolationRequest {
        IsolationRequest {
            container_id: ContainerId::generate(),
            launch: LaunchSpec {
                command: command.iter().map(|s| (*s).to_string()).collect(),
                env: Vec::new(),
                working_dir: None,
            },
            port_bindings: Vec::new(),
        }
    }

    #[tokio::test]
    async fn exit_code_and_output_are_captured() {
        let dir = tempfile::tempdir().expect("tempdir");
        let provider = NativeIsolation::new(dir.path(), NamespaceSet::default());
        let req = request(&["/bin/sh", "-c", "echo hello; exit 3"]);

        let handle = provider.isolate(&req).await.expect("spawn");
        assert_eq!(provider.await_exit(&handle).await, ExitCode::Code(3));
        assert!(!provider.is_running(&handle));

        let logs = crate::logs::read_logs(dir.path(), &req.container_id).expect("logs");
        assert_eq!(logs, "hello\n");
    }

    #[tokio::test]
    async fn terminate_reports_signal_exit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let provider = NativeIsolation::new(dir.path(), NamespaceSet::default());
        let handle = provider
            .isolate(&request(&["/bin/sleep", "30"]))
            .await
            .expect("spawn");
        assert!(provider.is_running(&handle));

        provider.terminate(&handle, StopSignal::Term).expect("signal");
        assert_eq!(provider.await_exit(&handle).await, ExitCode::Code(128 + 15));
        provider
            .terminate(&handle, StopSignal::Kill)
            .expect("signalling a dead workload is fine");
    }

    #[tokio::test]
    async fn terminate_reaches_forked_children() {
        let dir = tempfile::tempdir().expect("tempdir");
        let provider = NativeIsolation::new(dir.path(), NamespaceSet::default());
        let req = request(&["/bin/sh", "-c", "sleep 30 & echo $!; wait"]);
        let handle = provider.isolate(&req).await.expect("spawn");

        let mut child = None;
        for _ in 0..50 {
            let logs = crate::logs::read_logs(dir.path(), &req.container_id).expect("logs");
            child = logs.trim().parse::<u32>().ok();
            if child.is_some() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
        let child = child.expect("shell reported its child pid");
        assert!(berth_core::process::is_alive(child));

        provider.terminate(&handle, StopSignal::Term).expect("signal");
        assert_eq!(provider.await_exit(&handle).await, ExitCode::Code(128 + 15));

        let mut gone = false;
        for _ in 0..50 {
            if !berth_core::process::is_alive(child) {
                gone = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
        assert!(gone, "child {child} outlived its workload");
    }

    #[tokio::test]
    async fn missing_binary_is_a_launch_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let provider = NativeIsolation::new(dir.path(), NamespaceSet::default());
        let err = provider
            .isolate(&request(&["/definitely/not/here"]))
            .await
            .expect_err("no such binary");
        assert_eq!(err.kind(), berth_common::error::ErrorKind::Launch);

        let empty = provider.isolate(&request(&[])).await.expect_err("no command");
        assert_eq!(empty.kind(), berth_common::error::ErrorKind::Launch);
    }
}
