//! System-wide constants and default paths.

use std::path::PathBuf;
use std::sync::OnceLock;

/// Default base directory for berth data when running as root.
pub const SYSTEM_DATA_DIR: &str = "/var/lib/berth";

/// Returns the data directory, preferring `$HOME/.berth` and falling back
/// to `/var/lib/berth`.
fn resolve_data_dir() -> PathBuf {
    if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
        let user_dir = PathBuf::from(home).join(".berth");
        if std::fs::create_dir_all(&user_dir).is_ok() {
            return user_dir;
        }
    }
    PathBuf::from(SYSTEM_DATA_DIR)
}

static DATA_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Returns the resolved data directory for this session.
pub fn data_dir() -> &'static PathBuf {
    DATA_DIR.get_or_init(resolve_data_dir)
}

/// Directory (under the data dir) holding one JSON record per container.
pub const CONTAINERS_DIR: &str = "containers";

/// Directory (under the data dir) holding captured workload output.
pub const LOGS_DIR: &str = "logs";

/// Image catalog file name (under the data dir).
pub const IMAGE_CATALOG_FILE: &str = "images.json";

/// Engine configuration file name (under the data dir).
pub const CONFIG_FILE: &str = "config.json";

/// First port of the default automatic allocation range (Linux ephemeral range).
pub const DEFAULT_PORT_RANGE_START: u16 = 32768;

/// Last port of the default automatic allocation range.
pub const DEFAULT_PORT_RANGE_END: u16 = 60999;

/// Default per-subscriber event queue capacity.
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 256;

/// Default graceful stop deadline.
pub const DEFAULT_STOP_TIMEOUT_MS: u64 = 10_000;

/// Default wait after the forced terminate before giving up on observing the exit.
pub const DEFAULT_KILL_GRACE_MS: u64 = 5_000;

/// Default liveness polling interval for workloads adopted after a restart.
pub const DEFAULT_ORPHAN_POLL_INTERVAL_MS: u64 = 500;

/// Exit code recorded when the workload could not be launched at all.
pub const LAUNCH_FAILURE_EXIT_CODE: i32 = 125;

/// Prefix of the environment variables that announce port bindings to a workload.
pub const PORT_ENV_PREFIX: &str = "BERTH_PORT_";

/// Environment variable carrying the container ID into the workload.
pub const CONTAINER_ID_ENV: &str = "BERTH_CONTAINER_ID";
