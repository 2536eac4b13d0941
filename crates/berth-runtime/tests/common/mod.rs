//! Test doubles shared by the integration tests.

#![allow(dead_code, clippy::expect_used, clippy::unwrap_used, missing_docs)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use berth_common::config::{EngineConfig, PortRange};
use berth_common::error::{BerthError, Result};
use berth_common::types::{ContainerId, ExitCode, StopSignal};
use berth_runtime::container::{ContainerRecord, ListFilter};
use berth_runtime::events::{BusMessage, LifecycleEvent, Subscription};
use berth_runtime::image::StaticResolver;
use berth_runtime::isolation::{
    IsolationHandle, IsolationProvider, IsolationRequest, LaunchSpec,
};
use berth_runtime::store::{MemoryStore, StateStore};
use berth_runtime::ContainerManager;
use tokio::sync::watch;

/// How a scripted workload behaves, chosen by the first word of its command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    /// `serve`: runs until any signal arrives.
    Serve,
    /// `stubborn`: ignores everything but `SIGKILL`.
    Stubborn,
    /// `broken`: cannot be launched.
    Broken,
    /// `oneshot <code>`: exits with `code` after 50ms.
    Oneshot(i32),
}

impl Behaviour {
    fn of(command: &[String]) -> Self {
        match command.first().map(String::as_str) {
            Some("stubborn") => Self::Stubborn,
            Some("broken") => Self::Broken,
            Some("oneshot") => Self::Oneshot(
                command
                    .get(1)
                    .and_then(|c| c.parse().ok())
                    .unwrap_or_default(),
            ),
            _ => Self::Serve,
        }
    }
}

fn signal_number(signal: StopSignal) -> i32 {
    match signal {
        StopSignal::Hup => 1,
        StopSignal::Int => 2,
        StopSignal::Quit => 3,
        StopSignal::Kill => 9,
        StopSignal::Term => 15,
    }
}

struct Workload {
    behaviour: Behaviour,
    status: Arc<watch::Sender<Option<ExitCode>>>,
}

/// Isolation provider that simulates workloads without spawning anything.
#[derive(Default)]
pub struct ScriptedIsolation {
    next_pid: AtomicU32,
    workloads: Mutex<HashMap<u32, Workload>>,
    signals: Mutex<Vec<(u32, StopSignal)>>,
    requests: Mutex<Vec<IsolationRequest>>,
}

impl ScriptedIsolation {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_pid: AtomicU32::new(1000),
            ..Self::default()
        })
    }

    /// Pretends a workload with `pid` is alive, as if it survived a restart.
    pub fn with_live(self: Arc<Self>, pid: u32) -> Arc<Self> {
        let _ = self.workloads.lock().unwrap().insert(
            pid,
            Workload {
                behaviour: Behaviour::Serve,
                status: Arc::new(watch::Sender::new(None)),
            },
        );
        self
    }

    pub fn signals(&self) -> Vec<(u32, StopSignal)> {
        self.signals.lock().unwrap().clone()
    }

    pub fn requests(&self) -> Vec<IsolationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl IsolationProvider for ScriptedIsolation {
    async fn isolate(&self, request: &IsolationRequest) -> Result<IsolationHandle> {
        self.requests.lock().unwrap().push(request.clone());
        let behaviour = Behaviour::of(&request.launch.command);
        if behaviour == Behaviour::Broken {
            return Err(BerthError::Launch {
                message: "exec format error".into(),
            });
        }
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let status = Arc::new(watch::Sender::new(None));
        if let Behaviour::Oneshot(code) = behaviour {
            let status = Arc::clone(&status);
            let _ = tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                let _ = status.send_replace(Some(ExitCode::Code(code)));
            });
        }
        let _ = self
            .workloads
            .lock()
            .unwrap()
            .insert(pid, Workload { behaviour, status });
        Ok(IsolationHandle {
            pid,
            start_time: Some(u64::from(pid)),
        })
    }

    fn terminate(&self, handle: &IsolationHandle, signal: StopSignal) -> Result<()> {
        self.signals.lock().unwrap().push((handle.pid, signal));
        let workloads = self.workloads.lock().unwrap();
        let Some(workload) = workloads.get(&handle.pid) else {
            return Ok(());
        };
        let dies = workload.behaviour != Behaviour::Stubborn || signal == StopSignal::Kill;
        if dies && workload.status.borrow().is_none() {
            let _ = workload
                .status
                .send_replace(Some(ExitCode::Code(128 + signal_number(signal))));
        }
        Ok(())
    }

    async fn await_exit(&self, handle: &IsolationHandle) -> ExitCode {
        let rx = self
            .workloads
            .lock()
            .unwrap()
            .get(&handle.pid)
            .map(|w| w.status.subscribe());
        let Some(mut rx) = rx else {
            return ExitCode::Unknown;
        };
        match rx.wait_for(Option::is_some).await {
            Ok(status) => (*status).unwrap_or(ExitCode::Unknown),
            Err(_) => ExitCode::Unknown,
        }
    }

    fn is_running(&self, handle: &IsolationHandle) -> bool {
        self.workloads
            .lock()
            .unwrap()
            .get(&handle.pid)
            .is_some_and(|w| w.status.borrow().is_none())
    }
}

/// Store wrapper whose writes can be made to fail on demand.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    failing: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_writes(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(BerthError::StoreIo {
                message: "disk full".into(),
            })
        } else {
            Ok(())
        }
    }
}

impl StateStore for FlakyStore {
    fn put(&self, record: &ContainerRecord) -> Result<()> {
        self.check()?;
        self.inner.put(record)
    }

    fn get(&self, id: &ContainerId) -> Result<ContainerRecord> {
        self.inner.get(id)
    }

    fn list(&self, filter: &ListFilter) -> Result<Vec<ContainerRecord>> {
        self.inner.list(filter)
    }

    fn delete(&self, id: &ContainerId) -> Result<()> {
        self.check()?;
        self.inner.delete(id)
    }
}

fn launch(command: &[&str]) -> LaunchSpec {
    LaunchSpec {
        command: command.iter().map(|s| (*s).to_string()).collect(),
        ..LaunchSpec::default()
    }
}

/// Images known to the test engines.
pub fn resolver() -> Arc<StaticResolver> {
    Arc::new(
        StaticResolver::new()
            .with_image("nginx:alpine", launch(&["stubborn"]))
            .and_then(|r| r.with_image("redis:7", launch(&["serve"])))
            .and_then(|r| r.with_image("broken:1", launch(&["broken"])))
            .and_then(|r| r.with_image("job:ok", launch(&["oneshot", "0"])))
            .and_then(|r| r.with_image("job:fail", launch(&["oneshot", "3"])))
            .expect("images"),
    )
}

pub fn config() -> EngineConfig {
    EngineConfig {
        port_range: PortRange::new(40000, 40009),
        event_queue_capacity: 64,
        kill_grace_ms: 1000,
        orphan_poll_interval_ms: 10,
        ..EngineConfig::with_data_dir(std::env::temp_dir().join("berth-tests"))
    }
}

pub async fn engine_over(
    store: Arc<dyn StateStore>,
    provider: Arc<ScriptedIsolation>,
) -> ContainerManager {
    ContainerManager::open(config(), store, provider, resolver())
        .await
        .expect("engine opens")
}

pub async fn engine() -> (ContainerManager, Arc<ScriptedIsolation>) {
    let provider = ScriptedIsolation::new();
    let engine = engine_over(Arc::new(MemoryStore::new()), Arc::clone(&provider)).await;
    (engine, provider)
}

/// Next lifecycle event, skipping overflow markers.
pub async fn next_event(events: &mut Subscription) -> LifecycleEvent {
    loop {
        match tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("event within deadline")
            .expect("bus open")
        {
            BusMessage::Event(event) => return event,
            BusMessage::Overflow { .. } => {}
        }
    }
}
