//! Container records and their state transitions.
//!
//! A record is never patched in place: every transition produces a complete
//! new record that the caller persists as a whole.

use berth_common::constants::LAUNCH_FAILURE_EXIT_CODE;
use berth_common::error::{BerthError, Result};
use berth_common::types::{
    ContainerId, ContainerState, ExitCode, ImageRef, PortBinding, Transition,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable record of one container.
///
/// Fields added after the first release are optional or defaulted so that
/// records written by older engines keep loading; unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    /// Unique, immutable identifier.
    pub id: ContainerId,
    /// Image the container was created from.
    pub image_ref: ImageRef,
    /// Optional human-readable label, unique among live containers.
    #[serde(default)]
    pub name: Option<String>,
    /// Current lifecycle state.
    pub state: ContainerState,
    /// Host to container port bindings.
    #[serde(default)]
    pub port_bindings: Vec<PortBinding>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Start time of the current or most recent run.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// End time of the most recent run.
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// Exit status of the most recent run.
    #[serde(default)]
    pub exit_code: Option<ExitCode>,
    /// Workload pid, present only while running.
    #[serde(default)]
    pub pid: Option<u32>,
    /// Kernel start time of the workload, used to recognise it after a restart.
    #[serde(default)]
    pub pid_start_time: Option<u64>,
}

impl ContainerRecord {
    /// Creates a record in the `created` state.
    #[must_use]
    pub fn new(
        id: ContainerId,
        image_ref: ImageRef,
        name: Option<String>,
        port_bindings: Vec<PortBinding>,
    ) -> Self {
        Self {
            id,
            image_ref,
            name,
            state: ContainerState::Created,
            port_bindings,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            exit_code: None,
            pid: None,
            pid_start_time: None,
        }
    }

    fn transitioned(&self, transition: Transition) -> Result<Self> {
        let state = self
            .state
            .apply(transition)
            .ok_or_else(|| BerthError::InvalidState {
                id: self.id.clone(),
                state: self.state,
                operation: transition.operation(),
            })?;
        Ok(Self {
            state,
            ..self.clone()
        })
    }

    /// Checks that `transition` leaves from the current state.
    ///
    /// # Errors
    ///
    /// Returns [`BerthError::InvalidState`] otherwise.
    pub fn ensure(&self, transition: Transition) -> Result<()> {
        self.transitioned(transition).map(|_| ())
    }

    /// The record after a successful launch.
    ///
    /// # Errors
    ///
    /// Returns [`BerthError::InvalidState`] unless `created` or `stopped`.
    pub fn started(&self, pid: u32, pid_start_time: Option<u64>) -> Result<Self> {
        let mut next = self.transitioned(Transition::Start)?;
        next.started_at = Some(Utc::now());
        next.finished_at = None;
        next.exit_code = None;
        next.pid = Some(pid);
        next.pid_start_time = pid_start_time;
        Ok(next)
    }

    /// The record after the workload failed to launch.
    ///
    /// # Errors
    ///
    /// Returns [`BerthError::InvalidState`] unless `created` or `stopped`.
    pub fn launch_failed(&self) -> Result<Self> {
        let mut next = self.transitioned(Transition::LaunchFailed)?;
        next.finished_at = Some(Utc::now());
        next.exit_code = Some(ExitCode::Code(LAUNCH_FAILURE_EXIT_CODE));
        next.pid = None;
        next.pid_start_time = None;
        Ok(next)
    }

    /// The record after a requested stop.
    ///
    /// # Errors
    ///
    /// Returns [`BerthError::InvalidState`] unless `running`.
    pub fn stopped(&self, exit_code: ExitCode) -> Result<Self> {
        let mut next = self.transitioned(Transition::Stop)?;
        next.finish(exit_code);
        Ok(next)
    }

    /// The record after the workload died on its own.
    ///
    /// # Errors
    ///
    /// Returns [`BerthError::InvalidState`] unless `running`.
    pub fn exited(&self, exit_code: ExitCode) -> Result<Self> {
        let mut next = self.transitioned(Transition::Exit)?;
        next.finish(exit_code);
        Ok(next)
    }

    /// The record at the start of removal.
    ///
    /// # Errors
    ///
    /// Returns [`BerthError::InvalidState`] when `running` or already `removing`.
    pub fn removing(&self) -> Result<Self> {
        self.transitioned(Transition::BeginRemove)
    }

    fn finish(&mut self, exit_code: ExitCode) {
        self.finished_at = Some(Utc::now());
        self.exit_code = Some(exit_code);
        self.pid = None;
        self.pid_start_time = None;
    }

    /// Condensed view for listings.
    #[must_use]
    pub fn summary(&self) -> ContainerSummary {
        ContainerSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            image_ref: self.image_ref.clone(),
            state: self.state,
            port_bindings: self.port_bindings.clone(),
            created_at: self.created_at,
            exit_code: self.exit_code,
        }
    }
}

/// Listing entry returned by `list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSummary {
    /// Container identifier.
    pub id: ContainerId,
    /// Optional name.
    pub name: Option<String>,
    /// Image reference.
    pub image_ref: ImageRef,
    /// Current state.
    pub state: ContainerState,
    /// Port bindings.
    pub port_bindings: Vec<PortBinding>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Exit status of the last run.
    pub exit_code: Option<ExitCode>,
}

/// Selection criteria for `list`. The default matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    /// Only containers in this state.
    pub state: Option<ContainerState>,
    /// Only named containers whose name starts with this prefix.
    pub name_prefix: Option<String>,
}

impl ListFilter {
    /// Whether `record` passes the filter.
    #[must_use]
    pub fn matches(&self, record: &ContainerRecord) -> bool {
        if self.state.is_some_and(|state| state != record.state) {
            return false;
        }
        match &self.name_prefix {
            Some(prefix) => record
                .name
                .as_deref()
                .is_some_and(|name| name.starts_with(prefix.as_str())),
            None => true,
        }
    }
}
