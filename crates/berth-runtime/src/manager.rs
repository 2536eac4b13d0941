//! Container manager: the public engine API.
//!
//! The manager is the only writer of the state store. State-changing
//! operations on one container are serialized by a per-id async mutex;
//! operations on different containers run in parallel. Workload exits
//! arrive from the supervisor's watchers over a channel and are applied
//! under the same per-id lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use berth_common::config::EngineConfig;
use berth_common::error::{BerthError, Result};
use berth_common::types::{
    ContainerId, ContainerState, ExitCode, ImageRef, PortBinding, PortSpec, Transition,
};
use tokio::sync::mpsc;

use crate::container::{ContainerRecord, ContainerSummary, ListFilter};
use crate::events::{EventBus, EventDetail, LifecycleEvent, Subscription};
use crate::image::{CatalogResolver, ImageResolver};
use crate::isolation::native::NativeIsolation;
use crate::isolation::{IsolationHandle, IsolationProvider, IsolationRequest};
use crate::ports::PortAllocator;
use crate::store::{FileStore, StateStore};
use crate::supervisor::{ExitNotice, Supervisor};

const MAX_NAME_LEN: usize = 128;

/// Parameters of [`ContainerManager::create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRequest {
    /// Image reference, `name[:tag]`.
    pub image_ref: String,
    /// Optional unique name.
    pub name: Option<String>,
    /// Requested port bindings.
    pub ports: Vec<PortSpec>,
}

impl CreateRequest {
    /// Starts a request for `image_ref` with no name and no ports.
    #[must_use]
    pub fn new(image_ref: impl Into<String>) -> Self {
        Self {
            image_ref: image_ref.into(),
            name: None,
            ports: Vec::new(),
        }
    }

    /// Sets the container name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Adds a port binding.
    #[must_use]
    pub fn port(mut self, spec: PortSpec) -> Self {
        self.ports.push(spec);
        self
    }
}

/// A write that reached memory but not the store.
#[derive(Debug, Clone)]
enum PendingWrite {
    Put(ContainerRecord),
    Delete,
}

type IdLock = Arc<tokio::sync::Mutex<()>>;

struct Inner {
    config: EngineConfig,
    store: Arc<dyn StateStore>,
    ports: PortAllocator,
    supervisor: Supervisor,
    events: EventBus,
    resolver: Arc<dyn ImageResolver>,
    locks: Mutex<HashMap<ContainerId, IdLock>>,
    names: Mutex<HashMap<String, ContainerId>>,
    pending: Mutex<HashMap<ContainerId, PendingWrite>>,
}

/// Creates, starts, stops, removes and tracks containers.
///
/// Cloning is cheap; all clones drive the same engine.
#[derive(Clone)]
pub struct ContainerManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ContainerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerManager")
            .field("data_dir", &self.inner.config.data_dir)
            .field("supervisor", &self.inner.supervisor)
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ContainerManager {
    /// Opens an engine over explicit collaborators.
    ///
    /// Before returning it reconciles the persisted records with reality:
    /// interrupted removals are completed, `running` records whose workload
    /// is gone become `exited` with an unknown exit code, surviving
    /// workloads are re-adopted, and the port table and name index are
    /// rebuilt. Must be called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the store cannot
    /// be listed.
    pub async fn open(
        config: EngineConfig,
        store: Arc<dyn StateStore>,
        provider: Arc<dyn IsolationProvider>,
        resolver: Arc<dyn ImageResolver>,
    ) -> Result<Self> {
        config.validate()?;
        let (notices_tx, notices_rx) = mpsc::unbounded_channel();
        let supervisor = Supervisor::new(
            provider,
            notices_tx,
            config.termination,
            Duration::from_millis(config.kill_grace_ms),
            Duration::from_millis(config.orphan_poll_interval_ms),
        );
        let manager = Self {
            inner: Arc::new(Inner {
                ports: PortAllocator::new(config.port_range),
                events: EventBus::new(config.event_queue_capacity),
                config,
                store,
                supervisor,
                resolver,
                locks: Mutex::new(HashMap::new()),
                names: Mutex::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
            }),
        };

        manager.reconcile()?;
        let _exit_loop = tokio::spawn(exit_loop(Arc::downgrade(&manager.inner), notices_rx));
        tracing::info!(data_dir = %manager.inner.config.data_dir.display(), "engine ready");
        Ok(manager)
    }

    /// Opens an engine with the on-disk store, the native isolation
    /// provider and the image catalog, all under `config.data_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store or catalog cannot be loaded.
    pub async fn open_native(config: EngineConfig) -> Result<Self> {
        let store = Arc::new(FileStore::open(config.containers_dir())?);
        let provider = Arc::new(NativeIsolation::new(config.logs_dir(), config.namespaces));
        let resolver = Arc::new(CatalogResolver::load(config.image_catalog())?);
        Self::open(config, store, provider, resolver).await
    }

    /// The configuration the engine runs with.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Graceful stop deadline used when the caller has none.
    #[must_use]
    pub fn default_stop_timeout(&self) -> Duration {
        Duration::from_millis(self.inner.config.default_stop_timeout_ms)
    }

    /// Creates a container in the `created` state and returns its id.
    ///
    /// # Errors
    ///
    /// - [`BerthError::InvalidSpec`] for a malformed image reference, name or
    ///   port request, or an image the resolver does not know.
    /// - [`BerthError::DuplicateName`] if the name is taken.
    /// - [`BerthError::AlreadyBound`] if a requested host port is reserved.
    /// - [`BerthError::StoreIo`] if the record cannot be persisted.
    ///
    /// Nothing stays reserved when an error is returned.
    pub fn create(&self, request: CreateRequest) -> Result<ContainerId> {
        let image_ref = ImageRef::parse(&request.image_ref)?;
        match self.inner.resolver.resolve(&image_ref) {
            Ok(_) => {}
            Err(BerthError::NotFound { .. }) => {
                return Err(BerthError::InvalidSpec {
                    message: format!("unknown image: {image_ref}"),
                });
            }
            Err(e) => return Err(e),
        }
        if let Some(name) = &request.name {
            validate_name(name)?;
        }
        validate_ports(&request.ports)?;

        let id = self.fresh_id();
        self.claim_name(request.name.as_deref(), &id)?;
        let bindings = match self.reserve_ports(&id, &request.ports) {
            Ok(bindings) => bindings,
            Err(e) => {
                self.release_name(request.name.as_deref(), &id);
                return Err(e);
            }
        };

        let record = ContainerRecord::new(id.clone(), image_ref, request.name, bindings);
        if let Err(e) = self.inner.store.put(&record) {
            let _ = self.inner.ports.release_all(&id);
            self.release_name(record.name.as_deref(), &id);
            return Err(e);
        }

        tracing::info!(
            id = %id,
            image = %record.image_ref,
            name = record.name.as_deref().unwrap_or("-"),
            ports = ?record.port_bindings,
            "container created"
        );
        self.publish(&id, None, Some(ContainerState::Created), EventDetail::Created);
        Ok(id)
    }

    /// Launches the container's workload.
    ///
    /// On launch failure the container becomes `exited` with a synthetic
    /// exit code, its ports are released, a `launch_failed` event is
    /// published and [`BerthError::Launch`] is returned.
    ///
    /// # Errors
    ///
    /// - [`BerthError::NotFound`] for an unknown id.
    /// - [`BerthError::InvalidState`] unless `created` or `stopped`.
    /// - [`BerthError::Launch`] as described above.
    /// - [`BerthError::StoreIo`] if the transition cannot be persisted.
    pub async fn start(&self, id: &ContainerId) -> Result<()> {
        let id_lock = self.lock_for(id);
        let _guard = id_lock.lock().await;

        let record = self.current(id)?;
        record.ensure(Transition::Start)?;

        let launch = match self.inner.resolver.resolve(&record.image_ref) {
            Ok(launch) => launch,
            Err(e) => return self.fail_launch(&record, e.to_string()),
        };
        let request = IsolationRequest {
            container_id: id.clone(),
            launch,
            port_bindings: record.port_bindings.clone(),
        };

        match self.inner.supervisor.launch(&request).await {
            Ok(handle) => {
                let next = record.started(handle.pid, handle.start_time)?;
                tracing::info!(id = %id, pid = handle.pid, "container started");
                self.transition(&record, next, EventDetail::Started { pid: handle.pid })
            }
            Err(BerthError::Launch { message }) => self.fail_launch(&record, message),
            Err(e) => self.fail_launch(&record, e.to_string()),
        }
    }

    fn fail_launch(&self, record: &ContainerRecord, message: String) -> Result<()> {
        let next = record.launch_failed()?;
        let _ = self.inner.ports.release_all(&record.id);
        tracing::warn!(id = %record.id, error = %message, "container failed to launch");
        self.transition(
            record,
            next,
            EventDetail::LaunchFailed {
                message: message.clone(),
            },
        )?;
        Err(BerthError::Launch { message })
    }

    /// Stops a running container: graceful signal, up to `timeout` of
    /// waiting, then a single forced signal.
    ///
    /// An expired deadline is not an error; it is logged and reported as
    /// a `termination_timeout` event.
    ///
    /// # Errors
    ///
    /// - [`BerthError::NotFound`] for an unknown id.
    /// - [`BerthError::InvalidState`] unless `running`.
    /// - [`BerthError::StoreIo`] if the transition cannot be persisted.
    pub async fn stop(&self, id: &ContainerId, timeout: Duration) -> Result<()> {
        let id_lock = self.lock_for(id);
        let _guard = id_lock.lock().await;

        let record = self.current(id)?;
        record.ensure(Transition::Stop)?;

        let Some(pid) = record.pid else {
            tracing::warn!(id = %id, "running record without pid, marking stopped");
            let next = record.stopped(ExitCode::Unknown)?;
            return self.transition(
                &record,
                next,
                EventDetail::Stopped {
                    exit_code: ExitCode::Unknown,
                },
            );
        };
        let handle = IsolationHandle {
            pid,
            start_time: record.pid_start_time,
        };
        if !self.inner.supervisor.is_watched(pid) {
            self.inner.supervisor.adopt(id.clone(), handle);
        }

        let termination = self.inner.supervisor.terminate(&handle, timeout).await?;
        let next = record.stopped(termination.exit_code)?;
        let detail = if termination.escalated {
            let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
            tracing::warn!(id = %id, pid, timeout_ms, "graceful stop timed out, workload killed");
            EventDetail::TerminationTimeout {
                timeout_ms,
                exit_code: termination.exit_code,
            }
        } else {
            EventDetail::Stopped {
                exit_code: termination.exit_code,
            }
        };
        tracing::info!(id = %id, exit_code = %termination.exit_code, "container stopped");
        self.transition(&record, next, detail)
    }

    /// Removes a container that is not running, releasing its ports and
    /// deleting its record and captured output.
    ///
    /// # Errors
    ///
    /// - [`BerthError::NotFound`] for an unknown or already removed id.
    /// - [`BerthError::InvalidState`] while `running`.
    /// - [`BerthError::StoreIo`] if the deletion cannot be persisted; the
    ///   removal completes on the next operation on this id or at the next
    ///   engine start.
    pub async fn remove(&self, id: &ContainerId) -> Result<()> {
        let id_lock = self.lock_for(id);
        let _guard = id_lock.lock().await;

        let record = self.current(id)?;
        // A record already in `removing` is an interrupted removal; finish it.
        if record.state != ContainerState::Removing {
            let removing = record.removing()?;
            self.transition(&record, removing, EventDetail::Removing)?;
        }

        let _ = self.inner.ports.release_all(id);
        self.release_name(record.name.as_deref(), id);
        if let Err(e) = crate::logs::remove_logs(&self.inner.config.logs_dir(), id) {
            tracing::warn!(id = %id, error = %e, "could not delete container logs");
        }

        match self.inner.store.delete(id) {
            Ok(()) | Err(BerthError::NotFound { .. }) => {}
            Err(e) => {
                let _ = lock(&self.inner.pending).insert(id.clone(), PendingWrite::Delete);
                return Err(e);
            }
        }
        let _ = lock(&self.inner.locks).remove(id);

        tracing::info!(id = %id, "container removed");
        self.publish(id, Some(ContainerState::Removing), None, EventDetail::Removed);
        Ok(())
    }

    /// Lists containers matching `filter`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`BerthError::StoreIo`] if the store cannot be read.
    pub fn list(&self, filter: &ListFilter) -> Result<Vec<ContainerSummary>> {
        let records = self.inner.store.list(&ListFilter::default())?;
        let pending = lock(&self.inner.pending);
        Ok(records
            .into_iter()
            .filter_map(|record| match pending.get(&record.id) {
                Some(PendingWrite::Put(newer)) => Some(newer.clone()),
                Some(PendingWrite::Delete) => None,
                None => Some(record),
            })
            .filter(|record| filter.matches(record))
            .map(|record| record.summary())
            .collect())
    }

    /// Returns the full record of a container.
    ///
    /// # Errors
    ///
    /// Returns [`BerthError::NotFound`] for an unknown id.
    pub fn inspect(&self, id: &ContainerId) -> Result<ContainerRecord> {
        self.view(id)
    }

    /// Resolves a full id, a name or an unambiguous id prefix.
    ///
    /// # Errors
    ///
    /// Returns [`BerthError::NotFound`] when nothing matches and
    /// [`BerthError::InvalidSpec`] when a prefix matches several containers.
    pub fn resolve(&self, id_or_name: &str) -> Result<ContainerId> {
        let exact = ContainerId::new(id_or_name);
        if self.view(&exact).is_ok() {
            return Ok(exact);
        }
        if let Some(id) = lock(&self.inner.names).get(id_or_name) {
            return Ok(id.clone());
        }
        let mut matches = self
            .list(&ListFilter::default())?
            .into_iter()
            .filter(|s| s.id.as_str().starts_with(id_or_name));
        match (matches.next(), matches.next()) {
            (Some(only), None) if !id_or_name.is_empty() => Ok(only.id),
            (Some(_), _) => Err(BerthError::InvalidSpec {
                message: format!("ambiguous container reference: {id_or_name}"),
            }),
            (None, _) => Err(BerthError::container_not_found(id_or_name)),
        }
    }

    /// Returns the captured output of a container's workload.
    ///
    /// # Errors
    ///
    /// Returns [`BerthError::NotFound`] for an unknown id, or an I/O error
    /// if the log file cannot be read.
    pub fn logs(&self, id: &ContainerId) -> Result<String> {
        let _ = self.view(id)?;
        crate::logs::read_logs(&self.inner.config.logs_dir(), id)
    }

    /// Subscribes to lifecycle events published from now on.
    #[must_use]
    pub fn subscribe_events(&self) -> Subscription {
        self.inner.events.subscribe()
    }

    /// Ends all event subscriptions. Workloads keep running.
    pub fn shutdown(&self) {
        tracing::info!("engine shutting down");
        self.inner.events.close();
    }

    fn lock_for(&self, id: &ContainerId) -> IdLock {
        Arc::clone(lock(&self.inner.locks).entry(id.clone()).or_default())
    }

    fn fresh_id(&self) -> ContainerId {
        loop {
            let id = ContainerId::generate();
            if self.inner.store.get(&id).is_err() && !lock(&self.inner.pending).contains_key(&id) {
                return id;
            }
        }
    }

    fn claim_name(&self, name: Option<&str>, id: &ContainerId) -> Result<()> {
        let Some(name) = name else {
            return Ok(());
        };
        let mut names = lock(&self.inner.names);
        if names.contains_key(name) {
            return Err(BerthError::DuplicateName {
                name: name.to_string(),
            });
        }
        let _ = names.insert(name.to_string(), id.clone());
        Ok(())
    }

    fn release_name(&self, name: Option<&str>, id: &ContainerId) {
        let Some(name) = name else {
            return;
        };
        let mut names = lock(&self.inner.names);
        if names.get(name) == Some(id) {
            let _ = names.remove(name);
        }
    }

    /// Explicit host ports are reserved before automatic ones so an
    /// automatic pick cannot steal a port requested in the same call.
    fn reserve_ports(&self, id: &ContainerId, specs: &[PortSpec]) -> Result<Vec<PortBinding>> {
        let reserved = reserve_all(&self.inner.ports, id, specs);
        if reserved.is_err() {
            let _ = self.inner.ports.release_all(id);
        }
        reserved
    }

    /// The latest known record, including writes the store has not accepted.
    fn view(&self, id: &ContainerId) -> Result<ContainerRecord> {
        match lock(&self.inner.pending).get(id) {
            Some(PendingWrite::Put(record)) => return Ok(record.clone()),
            Some(PendingWrite::Delete) => return Err(BerthError::container_not_found(id.as_str())),
            None => {}
        }
        self.inner.store.get(id)
    }

    /// The record an operation acts on. A pending write is flushed first;
    /// while it keeps failing the operation fails with `StoreIo`. An id
    /// that turns out to be unknown loses its lock entry.
    fn current(&self, id: &ContainerId) -> Result<ContainerRecord> {
        let pending = lock(&self.inner.pending).remove(id);
        match pending {
            None => {
                let stored = self.inner.store.get(id);
                if matches!(stored, Err(BerthError::NotFound { .. })) {
                    let _ = lock(&self.inner.locks).remove(id);
                }
                stored
            }
            Some(PendingWrite::Put(record)) => match self.inner.store.put(&record) {
                Ok(()) => {
                    tracing::info!(id = %id, state = %record.state, "pending write reconciled");
                    Ok(record)
                }
                Err(e) => {
                    let _ = lock(&self.inner.pending).insert(id.clone(), PendingWrite::Put(record));
                    Err(e)
                }
            },
            Some(PendingWrite::Delete) => match self.inner.store.delete(id) {
                Ok(()) | Err(BerthError::NotFound { .. }) => {
                    tracing::info!(id = %id, "pending removal reconciled");
                    let _ = lock(&self.inner.locks).remove(id);
                    Err(BerthError::container_not_found(id.as_str()))
                }
                Err(e) => {
                    let _ = lock(&self.inner.pending).insert(id.clone(), PendingWrite::Delete);
                    Err(e)
                }
            },
        }
    }

    /// Persists `next` and announces the transition from `prev`.
    ///
    /// The event is published even when the store rejects the write: the
    /// transition already happened and the record is kept as pending until
    /// a later write succeeds. A successful write supersedes any older
    /// pending write for the id.
    fn transition(
        &self,
        prev: &ContainerRecord,
        next: ContainerRecord,
        detail: EventDetail,
    ) -> Result<()> {
        let (id, from, to) = (next.id.clone(), prev.state, next.state);
        let committed = self.inner.store.put(&next);
        match &committed {
            Ok(()) => {
                let _ = lock(&self.inner.pending).remove(&id);
            }
            Err(e) => {
                tracing::warn!(id = %id, state = %to, error = %e, "transition not persisted, keeping it pending");
                let _ = lock(&self.inner.pending).insert(id.clone(), PendingWrite::Put(next));
            }
        }
        self.publish(&id, Some(from), Some(to), detail);
        committed
    }

    fn publish(
        &self,
        id: &ContainerId,
        from: Option<ContainerState>,
        to: Option<ContainerState>,
        detail: EventDetail,
    ) {
        self.inner
            .events
            .publish(&LifecycleEvent::new(id.clone(), from, to, detail));
    }

    async fn handle_exit(&self, notice: ExitNotice) {
        let id = &notice.container_id;
        let id_lock = self.lock_for(id);
        let _guard = id_lock.lock().await;
        self.inner.supervisor.forget(notice.pid);

        // Flush pending writes so the exit lands on the latest record.
        let record = match self.current(id) {
            Ok(record) => record,
            Err(BerthError::NotFound { .. }) => {
                tracing::debug!(id = %id, pid = notice.pid, "exit for unknown container ignored");
                return;
            }
            Err(e) => match self.view(id) {
                Ok(record) => {
                    tracing::warn!(id = %id, error = %e, "store still failing, applying exit to the pending record");
                    record
                }
                Err(_) => return,
            },
        };
        if record.state != ContainerState::Running || record.pid != Some(notice.pid) {
            tracing::debug!(id = %id, pid = notice.pid, state = %record.state, "stale exit ignored");
            return;
        }
        let Ok(next) = record.exited(notice.exit_code) else {
            return;
        };
        let _ = self.inner.ports.release_all(id);
        tracing::info!(id = %id, pid = notice.pid, exit_code = %notice.exit_code, "container exited");
        if let Err(e) = self.transition(
            &record,
            next,
            EventDetail::Exited {
                exit_code: notice.exit_code,
            },
        ) {
            tracing::warn!(id = %id, error = %e, "exit recorded in memory only");
        }
    }

    fn reconcile(&self) -> Result<()> {
        let records = self.inner.store.list(&ListFilter::default())?;
        let mut live = Vec::with_capacity(records.len());

        for record in records {
            match record.state {
                ContainerState::Removing => match self.inner.store.delete(&record.id) {
                    Ok(()) | Err(BerthError::NotFound { .. }) => {
                        tracing::info!(id = %record.id, "completed interrupted removal");
                    }
                    Err(e) => {
                        tracing::warn!(id = %record.id, error = %e, "interrupted removal still pending");
                        let _ = lock(&self.inner.pending).insert(record.id.clone(), PendingWrite::Delete);
                    }
                },
                ContainerState::Running => {
                    let survivor = record
                        .pid
                        .map(|pid| IsolationHandle {
                            pid,
                            start_time: record.pid_start_time,
                        })
                        .filter(|handle| self.inner.supervisor.is_running(handle));
                    if let Some(handle) = survivor {
                        self.inner.supervisor.adopt(record.id.clone(), handle);
                        live.push(record);
                        continue;
                    }
                    tracing::warn!(
                        id = %record.id,
                        pid = ?record.pid,
                        "workload vanished while the engine was down"
                    );
                    let next = record.exited(ExitCode::Unknown)?;
                    let reason = format!(
                        "workload {} not found after engine restart",
                        record.pid.map_or_else(|| "-".to_string(), |p| p.to_string())
                    );
                    if let Err(e) = self.transition(&record, next.clone(), EventDetail::Reconciled { reason }) {
                        tracing::warn!(id = %record.id, error = %e, "reconciled state not persisted");
                    }
                    live.push(next);
                }
                _ => live.push(record),
            }
        }

        {
            let mut names = lock(&self.inner.names);
            names.clear();
            for record in &live {
                if let Some(name) = &record.name {
                    let _ = names.insert(name.clone(), record.id.clone());
                }
            }
        }
        self.inner.ports.rebuild(&live);
        tracing::info!(containers = live.len(), "state reconciled");
        Ok(())
    }
}

fn reserve_all(
    ports: &PortAllocator,
    id: &ContainerId,
    specs: &[PortSpec],
) -> Result<Vec<PortBinding>> {
    for host in specs.iter().filter_map(|spec| spec.host) {
        ports.reserve(host, id)?;
    }
    let mut bindings = Vec::with_capacity(specs.len());
    for spec in specs {
        let host_port = match spec.host {
            Some(port) => port,
            None => ports.reserve_any(id)?,
        };
        bindings.push(PortBinding {
            host_port,
            container_port: spec.container,
            protocol: spec.protocol,
        });
    }
    Ok(bindings)
}

async fn exit_loop(inner: Weak<Inner>, mut notices: mpsc::UnboundedReceiver<ExitNotice>) {
    while let Some(notice) = notices.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let manager = ContainerManager { inner };
        let _handler = tokio::spawn(async move { manager.handle_exit(notice).await });
    }
    tracing::debug!("exit loop finished");
}

fn validate_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = name.len() <= MAX_NAME_LEN
        && chars.next().is_some_and(|c| c.is_ascii_alphanumeric())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if valid {
        Ok(())
    } else {
        Err(BerthError::InvalidSpec {
            message: format!("invalid container name: {name:?}"),
        })
    }
}

fn validate_ports(specs: &[PortSpec]) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for spec in specs {
        if spec.container == 0 || spec.host == Some(0) {
            return Err(BerthError::InvalidSpec {
                message: "port 0 is not a valid binding".into(),
            });
        }
        if let Some(host) = spec.host {
            if !seen.insert(host) {
                return Err(BerthError::InvalidSpec {
                    message: format!("host port {host} requested twice"),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_common::types::Protocol;

    #[test]
    fn names_follow_the_usual_charset() {
        assert!(validate_name("web").is_ok());
        assert!(validate_name("web_1.blue-2").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("-web").is_err());
        assert!(validate_name("web app").is_err());
        assert!(validate_name(&"a".repeat(MAX_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn port_requests_are_validated() {
        assert!(validate_ports(&[PortSpec::fixed(8080, 80, Protocol::Tcp)]).is_ok());
        assert!(validate_ports(&[PortSpec::automatic(0, Protocol::Tcp)]).is_err());
        assert!(validate_ports(&[PortSpec::fixed(0, 80, Protocol::Tcp)]).is_err());
        assert!(
            validate_ports(&[
                PortSpec::fixed(8080, 80, Protocol::Tcp),
                PortSpec::fixed(8080, 81, Protocol::Udp),
            ])
            .is_err()
        );
        assert!(
            validate_ports(&[
                PortSpec::automatic(80, Protocol::Tcp),
                PortSpec::automatic(80, Protocol::Udp),
            ])
            .is_ok()
        );
    }

    #[test]
    fn create_request_builder_collects_ports() {
        let req = CreateRequest::new("nginx:alpine")
            .name("web")
            .port(PortSpec::fixed(8080, 80, Protocol::Tcp));
        assert_eq!(req.name.as_deref(), Some("web"));
        assert_eq!(req.ports.len(), 1);
    }

    #[tokio::test]
    async fn unknown_ids_leave_no_lock_entries() {
        use berth_common::config::NamespaceSet;

        use crate::image::StaticResolver;
        use crate::store::MemoryStore;

        let dir = tempfile::tempdir().expect("tempdir");
        let config = EngineConfig::with_data_dir(dir.path());
        let engine = ContainerManager::open(
            config.clone(),
            Arc::new(MemoryStore::new()),
            Arc::new(NativeIsolation::new(config.logs_dir(), NamespaceSet::default())),
            Arc::new(StaticResolver::new()),
        )
        .await
        .expect("open");

        for n in 0..3 {
            let ghost = ContainerId::new(format!("ghost{n}"));
            assert!(engine.start(&ghost).await.is_err());
            assert!(engine.stop(&ghost, Duration::from_secs(1)).await.is_err());
            assert!(engine.remove(&ghost).await.is_err());
            engine
                .handle_exit(ExitNotice {
                    container_id: ghost,
                    pid: 4242,
                    exit_code: ExitCode::Code(0),
                })
                .await;
        }
        assert!(lock(&engine.inner.locks).is_empty());
    }
}
