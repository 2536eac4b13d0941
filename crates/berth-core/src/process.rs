//! Process probing and signal delivery.

use berth_common::error::{BerthError, Result};
use berth_common::types::StopSignal;

/// Identity of a live process: its pid plus the kernel start time, which
/// distinguishes the original workload from a later process that reuses
/// the same pid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessFingerprint {
    /// OS process id.
    pub pid: u32,
    /// Start time in clock ticks since boot, when the platform exposes it.
    pub start_time: Option<u64>,
}

impl ProcessFingerprint {
    /// Captures the fingerprint of a running process.
    #[must_use]
    pub fn capture(pid: u32) -> Self {
        Self {
            pid,
            start_time: start_time(pid),
        }
    }

    /// Whether a live process still matches this fingerprint.
    ///
    /// When either side lacks a start time only liveness is compared.
    #[must_use]
    pub fn matches_live_process(&self) -> bool {
        if !is_alive(self.pid) {
            return false;
        }
        match (self.start_time, start_time(self.pid)) {
            (Some(expected), Some(actual)) => expected == actual,
            _ => true,
        }
    }
}

#[cfg(target_os = "linux")]
fn nix_pid(pid: u32) -> Result<nix::unistd::Pid> {
    let raw = i32::try_from(pid).map_err(|_| BerthError::InvalidSpec {
        message: format!("pid out of range: {pid}"),
    })?;
    Ok(nix::unistd::Pid::from_raw(raw))
}

#[cfg(target_os = "linux")]
const fn nix_signal(signal: StopSignal) -> nix::sys::signal::Signal {
    use nix::sys::signal::Signal;

    match signal {
        StopSignal::Term => Signal::SIGTERM,
        StopSignal::Int => Signal::SIGINT,
        StopSignal::Quit => Signal::SIGQUIT,
        StopSignal::Hup => Signal::SIGHUP,
        StopSignal::Kill => Signal::SIGKILL,
    }
}

/// Whether `pid` names a live, non-zombie process.
#[cfg(target_os = "linux")]
#[must_use]
pub fn is_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;

    let Ok(target) = nix_pid(pid) else {
        return false;
    };
    match kill(target, None) {
        Ok(()) | Err(Errno::EPERM) => !matches!(proc_state(pid), Some('Z' | 'X')),
        Err(_) => false,
    }
}

/// Liveness probing needs Linux; elsewhere every pid reads as gone.
#[cfg(not(target_os = "linux"))]
#[must_use]
pub const fn is_alive(_pid: u32) -> bool {
    false
}

/// Sends `signal` to `pid`.
///
/// # Errors
///
/// Returns [`BerthError::NotFound`] if the process no longer exists and
/// [`BerthError::Io`] for other `kill(2)` failures.
#[cfg(target_os = "linux")]
pub fn send_signal(pid: u32, signal: StopSignal) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::kill;

    match kill(nix_pid(pid)?, nix_signal(signal)) {
        Ok(()) => {
            tracing::debug!(pid, %signal, "signal delivered");
            Ok(())
        }
        Err(Errno::ESRCH) => Err(BerthError::NotFound {
            kind: "process",
            id: pid.to_string(),
        }),
        Err(e) => Err(BerthError::Io {
            path: format!("/proc/{pid}").into(),
            source: std::io::Error::from(e),
        }),
    }
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error: signal delivery requires Linux.
#[cfg(not(target_os = "linux"))]
pub fn send_signal(_pid: u32, _signal: StopSignal) -> Result<()> {
    Err(BerthError::Config {
        message: "Linux required for native process control".into(),
    })
}

/// Sends `signal` to every process in the group led by `pgid`.
///
/// # Errors
///
/// Returns [`BerthError::NotFound`] if the group has no members left and
/// [`BerthError::Io`] for other `killpg(2)` failures.
#[cfg(target_os = "linux")]
pub fn send_group_signal(pgid: u32, signal: StopSignal) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::killpg;

    match killpg(nix_pid(pgid)?, nix_signal(signal)) {
        Ok(()) => {
            tracing::debug!(pgid, %signal, "signal delivered to process group");
            Ok(())
        }
        Err(Errno::ESRCH) => Err(BerthError::NotFound {
            kind: "process group",
            id: pgid.to_string(),
        }),
        Err(e) => Err(BerthError::Io {
            path: format!("/proc/{pgid}").into(),
            source: std::io::Error::from(e),
        }),
    }
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error: signal delivery requires Linux.
#[cfg(not(target_os = "linux"))]
pub fn send_group_signal(_pgid: u32, _signal: StopSignal) -> Result<()> {
    Err(BerthError::Config {
        message: "Linux required for native process control".into(),
    })
}

/// Reads the fields after the `(comm)` part of `/proc/<pid>/stat`.
#[cfg(target_os = "linux")]
fn stat_fields(pid: u32) -> Option<Vec<String>> {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    // comm may itself contain spaces and parentheses; the last ')' closes it.
    let rest = &stat[stat.rfind(')')? + 1..];
    Some(rest.split_whitespace().map(str::to_owned).collect())
}

#[cfg(target_os = "linux")]
fn proc_state(pid: u32) -> Option<char> {
    stat_fields(pid)?.first()?.chars().next()
}

/// Returns the process start time from `/proc/<pid>/stat` (field 22).
#[cfg(target_os = "linux")]
#[must_use]
pub fn start_time(pid: u32) -> Option<u64> {
    // Field 3 (state) is the first one after comm.
    stat_fields(pid)?.get(22 - 3)?.parse().ok()
}

/// Start times are unavailable off Linux.
#[cfg(not(target_os = "linux"))]
#[must_use]
pub const fn start_time(_pid: u32) -> Option<u64> {
    None
}
