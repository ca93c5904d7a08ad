//! PID namespace isolation.
//!
//! Gives the launched command its own process ID space in which it is
//! PID 1 and cannot see host processes.

use hubroot_common::error::{HubrootError, Result};

/// Moves the calling process's *future children* into a new PID namespace.
///
/// After a successful call, the next `fork(2)` child sees itself as PID 1.
/// The caller itself keeps its PID. When that first child exits the
/// namespace is torn down and further forks fail, so this is only suitable
/// for single-shot launches.
///
/// # Errors
///
/// Returns `HubrootError::Isolation` if `unshare(CLONE_NEWPID)` fails,
/// usually because the process lacks `CAP_SYS_ADMIN`.
#[cfg(target_os = "linux")]
pub fn create_pid_namespace() -> Result<()> {
    use nix::sched::{CloneFlags, unshare};

    unshare(CloneFlags::CLONE_NEWPID).map_err(|e| HubrootError::Isolation {
        message: format!("PID namespace creation failed: {e}"),
    })?;
    tracing::debug!("PID namespace created");
    Ok(())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error: PID namespaces require Linux.
#[cfg(not(target_os = "linux"))]
pub fn create_pid_namespace() -> Result<()> {
    Err(HubrootError::Isolation {
        message: "PID namespaces require Linux".into(),
    })
}
