//! Engine configuration model.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{BerthError, Result};
use crate::types::StopSignal;

/// Root configuration for the berth engine.
///
/// Every field has a default so older or partial config files keep loading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Base directory for state, logs and the image catalog.
    pub data_dir: PathBuf,
    /// Range used by automatic host port allocation.
    pub port_range: PortRange,
    /// Maximum number of undelivered events per subscriber.
    pub event_queue_capacity: usize,
    /// Graceful stop deadline used when the caller does not pass one.
    pub default_stop_timeout_ms: u64,
    /// How long to wait for the exit after the forced terminate.
    pub kill_grace_ms: u64,
    /// Liveness polling interval for workloads adopted after a restart.
    pub orphan_poll_interval_ms: u64,
    /// Signals used to stop workloads.
    pub termination: TerminationPolicy,
    /// Namespaces the native isolation provider unshares for each workload.
    pub namespaces: NamespaceSet,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: constants::data_dir().clone(),
            port_range: PortRange::default(),
            event_queue_capacity: constants::DEFAULT_EVENT_QUEUE_CAPACITY,
            default_stop_timeout_ms: constants::DEFAULT_STOP_TIMEOUT_MS,
            kill_grace_ms: constants::DEFAULT_KILL_GRACE_MS,
            orphan_poll_interval_ms: constants::DEFAULT_ORPHAN_POLL_INTERVAL_MS,
            termination: TerminationPolicy::default(),
            namespaces: NamespaceSet::default(),
        }
    }
}

impl EngineConfig {
    /// Returns a default configuration rooted at `data_dir`.
    #[must_use]
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Loads a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid JSON, or
    /// fails [`EngineConfig::validate`].
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| BerthError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` if it exists, otherwise returns the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be loaded.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`BerthError::Config`] describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.port_range.start == 0 || self.port_range.start > self.port_range.end {
            return Err(BerthError::Config {
                message: format!(
                    "port_range must satisfy 0 < start <= end, got {}..={}",
                    self.port_range.start, self.port_range.end
                ),
            });
        }
        if self.event_queue_capacity == 0 {
            return Err(BerthError::Config {
                message: "event_queue_capacity must be at least 1".into(),
            });
        }
        if self.orphan_poll_interval_ms == 0 {
            return Err(BerthError::Config {
                message: "orphan_poll_interval_ms must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// Directory holding container records.
    #[must_use]
    pub fn containers_dir(&self) -> PathBuf {
        self.data_dir.join(constants::CONTAINERS_DIR)
    }

    /// Directory holding workload logs.
    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join(constants::LOGS_DIR)
    }

    /// Path of the image catalog.
    #[must_use]
    pub fn image_catalog(&self) -> PathBuf {
        self.data_dir.join(constants::IMAGE_CATALOG_FILE)
    }
}

/// Inclusive host port range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    /// First port in the range.
    pub start: u16,
    /// Last port in the range.
    pub end: u16,
}

impl PortRange {
    /// Creates an inclusive range.
    #[must_use]
    pub const fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    /// Whether `port` lies inside the range.
    #[must_use]
    pub const fn contains(&self, port: u16) -> bool {
        port >= self.start && port <= self.end
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self::new(
            constants::DEFAULT_PORT_RANGE_START,
            constants::DEFAULT_PORT_RANGE_END,
        )
    }
}

/// Signals used when stopping a workload: one graceful signal, then a
/// single forced signal once the deadline expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminationPolicy {
    /// Sent first.
    pub graceful_signal: StopSignal,
    /// Sent once after the stop deadline expires.
    pub forced_signal: StopSignal,
}

impl Default for TerminationPolicy {
    fn default() -> Self {
        Self {
            graceful_signal: StopSignal::Term,
            forced_signal: StopSignal::Kill,
        }
    }
}

/// Which Linux namespaces to unshare for each workload.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamespaceSet {
    /// Isolate the mount table.
    pub mount: bool,
    /// Isolate the hostname.
    pub uts: bool,
    /// Isolate System V IPC.
    pub ipc: bool,
    /// Isolate the network stack.
    pub network: bool,
}

impl NamespaceSet {
    /// Whether any namespace is requested.
    #[must_use]
    pub const fn any(&self) -> bool {
        self.mount || self.uts || self.ipc || self.network
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_is_default_filled() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"data_dir": "/tmp/berth", "port_range": {"start": 40000, "end": 40010}, "future_field": 1}"#,
        )
        .expect("write");

        let config = EngineConfig::load(&path).expect("load");
        assert_eq!(config.data_dir, PathBuf::from("/tmp/berth"));
        assert_eq!(config.port_range, PortRange::new(40000, 40010));
        assert_eq!(config.event_queue_capacity, constants::DEFAULT_EVENT_QUEUE_CAPACITY);
        assert_eq!(config.termination.forced_signal, StopSignal::Kill);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config =
            EngineConfig::load_or_default(&dir.path().join("absent.json")).expect("defaults");
        assert_eq!(config.port_range, PortRange::default());
    }

    #[test]
    fn inverted_port_range_is_rejected() {
        let mut config = EngineConfig::with_data_dir("/tmp/x");
        config.port_range = PortRange::new(5000, 4000);
        assert!(config.validate().is_err());
    }

    #[test]
    fn derived_paths_live_under_data_dir() {
        let config = EngineConfig::with_data_dir("/srv/berth");
        assert_eq!(config.containers_dir(), PathBuf::from("/srv/berth/containers"));
        assert_eq!(config.logs_dir(), PathBuf::from("/srv/berth/logs"));
        assert_eq!(config.image_catalog(), PathBuf::from("/srv/berth/images.json"));
    }
}
