//! Captured workload output.

use std::path::{Path, PathBuf};

use berth_common::error::{BerthError, Result};
use berth_common::types::ContainerId;

/// Returns the log file path for a container.
#[must_use]
pub fn log_path(logs_dir: &Path, container_id: &ContainerId) -> PathBuf {
    logs_dir.join(format!("{container_id}.log"))
}

/// Reads a container's captured output.
///
/// Returns an empty string if nothing has been captured yet.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read.
pub fn read_logs(logs_dir: &Path, container_id: &ContainerId) -> Result<String> {
    let path = log_path(logs_dir, container_id);
    if !path.exists() {
        return Ok(String::new());
    }
    std::fs::read_to_string(&path).map_err(|e| BerthError::Io { path, source: e })
}

/// Opens a container's log file for appending, creating the directory and
/// file when needed.
///
/// # Errors
///
/// Returns an error if the directory or file cannot be created.
pub fn open_for_append(logs_dir: &Path, container_id: &ContainerId) -> Result<std::fs::File> {
    std::fs::create_dir_all(logs_dir).map_err(|e| BerthError::Io {
        path: logs_dir.to_path_buf(),
        source: e,
    })?;
    let path = log_path(logs_dir, container_id);
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| BerthError::Io { path, source: e })
}

/// Deletes a container's log file. A missing file is not an error.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be removed.
pub fn remove_logs(logs_dir: &Path, container_id: &ContainerId) -> Result<()> {
    let path = log_path(logs_dir, container_id);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(BerthError::Io { path, source: e }),
    }
}
