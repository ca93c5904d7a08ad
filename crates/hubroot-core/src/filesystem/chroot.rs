//! Root filesystem switching via `chroot(2)`.
//!
//! The change applies to the calling process and everything it spawns
//! afterwards. It cannot be undone, so it is allowed exactly once per
//! process and only after the root has been fully assembled.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use hubroot_common::error::{HubrootError, Result};

static ROOT_CHANGED: AtomicBool = AtomicBool::new(false);

/// Returns `true` once [`change_root`] has succeeded in this process.
#[must_use]
pub fn root_changed() -> bool {
    ROOT_CHANGED.load(Ordering::SeqCst)
}

/// Confines the calling process to `new_root` and moves the working
/// directory to the new `/`.
///
/// # Errors
///
/// Returns `HubrootError::Isolation` if the root was already changed, if
/// `new_root` is not a directory, or if `chroot(2)` / `chdir(2)` fail
/// (typically `EPERM` without `CAP_SYS_CHROOT`).
#[cfg(target_os = "linux")]
pub fn change_root(new_root: &Path) -> Result<()> {
    use nix::unistd::{chdir, chroot};

    if root_changed() {
        return Err(HubrootError::Isolation {
            message: "root filesystem has already been changed for this process".into(),
        });
    }
    if !new_root.is_dir() {
        return Err(HubrootError::Isolation {
            message: format!("new root {} is not a directory", new_root.display()),
        });
    }

    tracing::info!(new_root = %new_root.display(), "changing root filesystem");
    chroot(new_root).map_err(|e| HubrootError::Isolation {
        message: format!("chroot to {} failed: {e}", new_root.display()),
    })?;
    ROOT_CHANGED.store(true, Ordering::SeqCst);

    chdir("/").map_err(|e| HubrootError::Isolation {
        message: format!("chdir to new root failed: {e}"),
    })?;
    tracing::debug!("root filesystem changed");
    Ok(())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error: the launcher only supports Linux.
#[cfg(not(target_os = "linux"))]
pub fn change_root(new_root: &Path) -> Result<()> {
    Err(HubrootError::Isolation {
        message: format!(
            "cannot change root to {}: unsupported platform",
            new_root.display()
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_directory_is_rejected_without_changing_root() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let err = change_root(&dir.path().join("missing")).expect_err("should fail");
        assert!(matches!(err, HubrootError::Isolation { .. }));
        assert!(!root_changed());
    }

    #[test]
    fn regular_file_is_rejected() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let file = dir.path().join("rootfs.img");
        std::fs::write(&file, b"").expect("failed to write");
        assert!(change_root(&file).is_err());
        assert!(!root_changed());
    }

    /// Runs the root change in a forked child so the test harness keeps its root.
    #[cfg(target_os = "linux")]
    #[allow(unsafe_code)]
    #[test]
    fn change_root_confines_forked_child() {
        use nix::sys::wait::{WaitStatus, waitpid};
        use nix::unistd::{ForkResult, fork};

        if !crate::privilege::is_privileged() {
            return;
        }

        let dir = tempfile::tempdir().expect("failed to create tempdir");
        std::fs::write(dir.path().join("marker"), b"inside").expect("failed to write");

        // SAFETY: the child only performs the root change and a few
        // filesystem checks before calling `_exit`.
        match unsafe { fork() }.expect("fork failed") {
            ForkResult::Child => {
                let code = match change_root(dir.path()) {
                    Ok(()) if Path::new("/marker").exists() && change_root(Path::new("/")).is_err() => 0,
                    _ => 1,
                };
                // SAFETY: terminating the forked child without unwinding.
                unsafe { libc::_exit(code) }
            }
            ForkResult::Parent { child } => {
                let status = waitpid(child, None).expect("waitpid failed");
                assert_eq!(status, WaitStatus::Exited(child, 0));
            }
        }
    }
}
