//! Engine restart tests: persisted records are reconciled against the
//! workloads that actually survived.

#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use berth_common::error::ErrorKind;
use berth_common::types::{
    ContainerId, ContainerState, ExitCode, ImageRef, PortBinding, PortSpec, Protocol, StopSignal,
};
use berth_runtime::container::ContainerRecord;
use berth_runtime::store::{FileStore, StateStore};
use berth_runtime::CreateRequest;

use common::{engine_over, ScriptedIsolation};

fn record(name: &str, host_port: u16) -> ContainerRecord {
    ContainerRecord::new(
        ContainerId::generate(),
        ImageRef::parse("redis:7").unwrap(),
        Some(name.to_string()),
        vec![PortBinding {
            host_port,
            container_port: 6379,
            protocol: Protocol::Tcp,
        }],
    )
}

#[tokio::test]
async fn vanished_workloads_become_exited_with_unknown_code() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(FileStore::open(dir.path()).expect("store"));

    let dead = record("db", 8080).started(4242, Some(1)).unwrap();
    let idle = record("idle", 9090);
    let half_removed = record("gone", 7070).removing().unwrap();
    for r in [&dead, &idle, &half_removed] {
        store.put(r).expect("seed");
    }

    let engine = engine_over(store, ScriptedIsolation::new()).await;

    let reconciled = engine.inspect(&dead.id).expect("dead");
    assert_eq!(reconciled.state, ContainerState::Exited);
    assert_eq!(reconciled.exit_code, Some(ExitCode::Unknown));
    assert!(reconciled.pid.is_none());

    let on_disk = FileStore::open(dir.path()).expect("reopen");
    assert_eq!(on_disk.get(&dead.id).unwrap().state, ContainerState::Exited);
    assert_eq!(
        on_disk.get(&half_removed.id).unwrap_err().kind(),
        ErrorKind::NotFound
    );

    let _ = engine
        .create(CreateRequest::new("redis:7").port(PortSpec::fixed(8080, 80, Protocol::Tcp)))
        .expect("exited container released 8080");
    let err = engine
        .create(CreateRequest::new("redis:7").port(PortSpec::fixed(9090, 80, Protocol::Tcp)))
        .expect_err("created container still holds 9090");
    assert_eq!(err.kind(), ErrorKind::AlreadyBound);
    let err = engine
        .create(CreateRequest::new("redis:7").name("db"))
        .expect_err("names survive restarts");
    assert_eq!(err.kind(), ErrorKind::DuplicateName);
    let _ = engine
        .create(CreateRequest::new("redis:7").name("gone"))
        .expect("removed name is free");
}

#[tokio::test(start_paused = true)]
async fn surviving_workloads_are_adopted() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(FileStore::open(dir.path()).expect("store"));
    let alive = record("api", 8080).started(4242, Some(4242)).unwrap();
    store.put(&alive).expect("seed");

    let provider = ScriptedIsolation::new().with_live(4242);
    let engine = engine_over(store, Arc::clone(&provider)).await;
    assert_eq!(engine.inspect(&alive.id).unwrap().state, ContainerState::Running);

    engine
        .stop(&alive.id, Duration::from_secs(2))
        .await
        .expect("stop adopted workload");
    let stopped = engine.inspect(&alive.id).unwrap();
    assert_eq!(stopped.state, ContainerState::Stopped);
    assert_eq!(stopped.exit_code, Some(ExitCode::Unknown));
    assert_eq!(provider.signals(), vec![(4242, StopSignal::Term)]);
}

#[cfg(target_os = "linux")]
mod native {
    use super::*;
    use berth_common::config::{EngineConfig, PortRange};
    use berth_runtime::ContainerManager;

    fn config(dir: &std::path::Path) -> EngineConfig {
        EngineConfig {
            port_range: PortRange::new(41000, 41009),
            ..EngineConfig::with_data_dir(dir)
        }
    }

    #[tokio::test]
    async fn dead_pid_is_reconciled_on_open() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config(dir.path());

        let mut child = std::process::Command::new("true").spawn().expect("spawn");
        let pid = child.id();
        let _ = child.wait().expect("wait");

        let stale = record("db", 41000).started(pid, Some(1)).unwrap();
        FileStore::open(config.containers_dir())
            .expect("store")
            .put(&stale)
            .expect("seed");

        let engine = ContainerManager::open_native(config).await.expect("open");
        let record = engine.inspect(&stale.id).unwrap();
        assert_eq!(record.state, ContainerState::Exited);
        assert_eq!(record.exit_code, Some(ExitCode::Unknown));
    }

    #[tokio::test]
    async fn native_workload_runs_logs_and_stops() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config(dir.path());
        std::fs::write(
            config.image_catalog(),
            r#"{"shell:latest": {"command": ["/bin/sh", "-c", "echo ready on $BERTH_PORT_80_TCP; exec sleep 30"]}}"#,
        )
        .expect("catalog");

        let engine = ContainerManager::open_native(config).await.expect("open");
        let id = engine
            .create(CreateRequest::new("shell").port(PortSpec::fixed(41001, 80, Protocol::Tcp)))
            .expect("create");
        engine.start(&id).await.expect("start");

        let mut logs = String::new();
        for _ in 0..50 {
            logs = engine.logs(&id).expect("logs");
            if !logs.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(logs, "ready on 41001\n");

        engine.stop(&id, Duration::from_secs(5)).await.expect("stop");
        let record = engine.inspect(&id).unwrap();
        assert_eq!(record.state, ContainerState::Stopped);
        assert_eq!(record.exit_code, Some(ExitCode::Code(143)));

        engine.remove(&id).await.expect("remove");
        assert_eq!(engine.logs(&id).unwrap_err().kind(), ErrorKind::NotFound);
    }
}
