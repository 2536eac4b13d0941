//! Process supervision.
//!
//! Launches workloads through the isolation provider and watches each one
//! from its own background task. A watcher publishes the exit status on a
//! per-pid watch channel, which `stop` waits on, and sends an
//! [`ExitNotice`] to the container manager. Watchers never take container
//! locks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use berth_common::config::TerminationPolicy;
use berth_common::error::{BerthError, Result};
use berth_common::types::{ContainerId, ExitCode};
use tokio::sync::{mpsc, watch};

use crate::isolation::{IsolationHandle, IsolationProvider, IsolationRequest};

/// Sent by a watcher when a workload terminates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitNotice {
    /// Container that owned the workload.
    pub container_id: ContainerId,
    /// Workload pid.
    pub pid: u32,
    /// Observed exit status.
    pub exit_code: ExitCode,
}

/// Outcome of [`Supervisor::terminate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Termination {
    /// Observed exit status.
    pub exit_code: ExitCode,
    /// Whether the graceful deadline expired and the forced signal was sent.
    pub escalated: bool,
}

type ExitTable = HashMap<u32, watch::Receiver<Option<ExitCode>>>;

/// Owns the OS-level lifecycle of the workloads.
pub struct Supervisor {
    provider: Arc<dyn IsolationProvider>,
    notices: mpsc::UnboundedSender<ExitNotice>,
    exits: Mutex<ExitTable>,
    policy: TerminationPolicy,
    kill_grace: Duration,
    poll_interval: Duration,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("policy", &self.policy)
            .field("kill_grace", &self.kill_grace)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    /// Creates a supervisor reporting exits on `notices`.
    #[must_use]
    pub fn new(
        provider: Arc<dyn IsolationProvider>,
        notices: mpsc::UnboundedSender<ExitNotice>,
        policy: TerminationPolicy,
        kill_grace: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            provider,
            notices,
            exits: Mutex::new(HashMap::new()),
            policy,
            kill_grace,
            poll_interval,
        }
    }

    fn exits(&self) -> std::sync::MutexGuard<'_, ExitTable> {
        self.exits.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Launches a workload and starts watching it.
    ///
    /// # Errors
    ///
    /// Propagates the provider's [`BerthError::Launch`].
    pub async fn launch(&self, request: &IsolationRequest) -> Result<IsolationHandle> {
        let handle = self.provider.isolate(request).await?;
        self.watch(request.container_id.clone(), handle, false);
        Ok(handle)
    }

    /// Watches a workload this engine did not launch, e.g. one that
    /// survived an engine restart. Its exit is detected by polling and its
    /// status is unknown.
    pub fn adopt(&self, container_id: ContainerId, handle: IsolationHandle) {
        tracing::info!(id = %container_id, pid = handle.pid, "adopting workload");
        self.watch(container_id, handle, true);
    }

    fn watch(&self, container_id: ContainerId, handle: IsolationHandle, adopted: bool) {
        let (tx, rx) = watch::channel(None);
        let _ = self.exits().insert(handle.pid, rx);

        let provider = Arc::clone(&self.provider);
        let notices = self.notices.clone();
        let poll_interval = self.poll_interval;
        let _watcher = tokio::spawn(async move {
            let exit_code = if adopted {
                while provider.is_running(&handle) {
                    tokio::time::sleep(poll_interval).await;
                }
                ExitCode::Unknown
            } else {
                provider.await_exit(&handle).await
            };
            tracing::info!(id = %container_id, pid = handle.pid, %exit_code, "workload exited");
            let _ = tx.send(Some(exit_code));
            let _ = notices.send(ExitNotice {
                container_id,
                pid: handle.pid,
                exit_code,
            });
        });
    }

    /// Whether a watcher exists for `pid`.
    #[must_use]
    pub fn is_watched(&self, pid: u32) -> bool {
        self.exits().contains_key(&pid)
    }

    /// Drops the exit channel of a workload whose exit has been handled.
    pub fn forget(&self, pid: u32) {
        let _ = self.exits().remove(&pid);
    }

    /// Whether the workload is still alive.
    #[must_use]
    pub fn is_running(&self, handle: &IsolationHandle) -> bool {
        self.provider.is_running(handle)
    }

    /// Waits up to `timeout` for a watched workload to exit.
    ///
    /// # Errors
    ///
    /// Returns [`BerthError::TerminationTimeout`] when the deadline passes
    /// and [`BerthError::NotFound`] when `pid` is not watched.
    pub async fn wait_exit(&self, pid: u32, timeout: Duration) -> Result<ExitCode> {
        let mut rx = self.exits().get(&pid).cloned().ok_or_else(|| BerthError::NotFound {
            kind: "process",
            id: pid.to_string(),
        })?;
        match tokio::time::timeout(timeout, rx.wait_for(Option::is_some)).await {
            Ok(Ok(status)) => Ok((*status).unwrap_or(ExitCode::Unknown)),
            // The watcher went away without reporting.
            Ok(Err(_)) => Ok(ExitCode::Unknown),
            Err(_) => Err(BerthError::TerminationTimeout {
                pid,
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    /// Stops a workload: the graceful signal, up to `timeout` of waiting,
    /// then the forced signal exactly once.
    ///
    /// If the workload survives even the forced signal for the configured
    /// grace period its status is reported as unknown.
    ///
    /// # Errors
    ///
    /// Returns an error if a signal cannot be delivered or the workload is
    /// not watched.
    pub async fn terminate(
        &self,
        handle: &IsolationHandle,
        timeout: Duration,
    ) -> Result<Termination> {
        self.provider
            .terminate(handle, self.policy.graceful_signal)?;
        match self.wait_exit(handle.pid, timeout).await {
            Ok(exit_code) => Ok(Termination {
                exit_code,
                escalated: false,
            }),
            Err(err @ BerthError::TerminationTimeout { .. }) => {
                tracing::warn!(
                    pid = handle.pid,
                    error = %err,
                    signal = %self.policy.forced_signal,
                    "escalating to forced termination"
                );
                self.provider
                    .terminate(handle, self.policy.forced_signal)?;
                let exit_code = match self.wait_exit(handle.pid, self.kill_grace).await {
                    Ok(code) => code,
                    Err(e) => {
                        tracing::warn!(pid = handle.pid, error = %e, "workload survived forced termination");
                        ExitCode::Unknown
                    }
                };
                Ok(Termination {
                    exit_code,
                    escalated: true,
                })
            }
            Err(e) => Err(e),
        }
    }
}
