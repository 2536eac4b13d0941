//! Linux namespace isolation for workloads.
//!
//! The unshare happens in the forked child right before `exec`, so the
//! functions called from there avoid allocation and logging.

use berth_common::config::NamespaceSet;

/// Translates the requested namespaces into `unshare(2)` flags.
#[cfg(target_os = "linux")]
#[must_use]
pub fn clone_flags(set: &NamespaceSet) -> nix::sched::CloneFlags {
    use nix::sched::CloneFlags;

    let mut flags = CloneFlags::empty();
    if set.mount {
        flags |= CloneFlags::CLONE_NEWNS;
    }
    if set.uts {
        flags |= CloneFlags::CLONE_NEWUTS;
    }
    if set.ipc {
        flags |= CloneFlags::CLONE_NEWIPC;
    }
    if set.network {
        flags |= CloneFlags::CLONE_NEWNET;
    }
    flags
}

/// Unshares the requested namespaces for the calling process.
///
/// Meant to run between `fork` and `exec`.
///
/// # Errors
///
/// Returns the raw OS error if `unshare(2)` fails, typically `EPERM` when
/// the engine lacks `CAP_SYS_ADMIN`.
#[cfg(target_os = "linux")]
pub fn unshare_namespaces(set: &NamespaceSet) -> std::io::Result<()> {
    if !set.any() {
        return Ok(());
    }
    nix::sched::unshare(clone_flags(set)).map_err(std::io::Error::from)
}

/// Namespaces only exist on Linux; any request fails elsewhere.
///
/// # Errors
///
/// Returns `Unsupported` when a namespace is requested.
#[cfg(not(target_os = "linux"))]
pub fn unshare_namespaces(set: &NamespaceSet) -> std::io::Result<()> {
    if set.any() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "namespaces require Linux",
        ));
    }
    Ok(())
}
