//! Forked supervision of a run.
//!
//! A root change cannot be undone, so the process that changes its root
//! can never clean up the directory it was confined to. The supervisor
//! forks: the child does the work and exits with its code, the parent
//! stays outside and waits.

use hubroot_common::error::{HubrootError, Result};
use nix::errno::Errno;
use nix::sys::signal::{SigSet, SigmaskHow, Signal, sigprocmask};
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{ForkResult, Pid, fork};

use crate::process::ExitStatus;

/// Runs `work` in a forked child and waits for it.
///
/// See [`spawn`] for the child's side.
///
/// # Errors
///
/// Returns `HubrootError::Isolation` if the fork or the wait fails.
pub fn run_forked(work: impl FnOnce() -> i32) -> Result<ExitStatus> {
    let child = spawn(work)?;
    wait_for(child)
}

/// Forks and runs `work` in the child, returning the child's PID.
///
/// The child exits with the code `work` returns and never returns from
/// this function. Buffered standard output of the child is not flushed.
/// The caller must be single-threaded when it forks; signal handlers that
/// rely on helper threads belong in the parent, installed after the fork.
///
/// # Errors
///
/// Returns `HubrootError::Isolation` if the fork fails.
pub fn spawn(work: impl FnOnce() -> i32) -> Result<Pid> {
    // SAFETY: the child only runs `work` and then exits without unwinding
    // back into the caller.
    let forked = unsafe { fork() }.map_err(|e| HubrootError::Isolation {
        message: format!("fork failed: {e}"),
    })?;

    match forked {
        ForkResult::Child => {
            let code = work();
            // SAFETY: `_exit` never returns and skips the parent's atexit state.
            unsafe { libc::_exit(code) }
        }
        ForkResult::Parent { child } => {
            tracing::debug!(pid = child.as_raw(), "supervising forked run");
            Ok(child)
        }
    }
}

/// Holds back interrupt and termination signals around a fork.
///
/// Between the fork and the parent installing its handler, a Ctrl-C would
/// kill the parent with the default action. Blocked signals stay pending
/// and are delivered once [`DeferredSignals::restore`] runs, after the
/// handler is in place. The child inherits the blocked mask and must
/// restore it as well.
#[derive(Debug)]
pub struct DeferredSignals {
    previous: SigSet,
}

impl DeferredSignals {
    /// Blocks `SIGINT` and `SIGTERM` for the calling thread.
    ///
    /// # Errors
    ///
    /// Returns `HubrootError::Isolation` if the signal mask cannot be changed.
    pub fn block() -> Result<Self> {
        let mut deferred = SigSet::empty();
        deferred.add(Signal::SIGINT);
        deferred.add(Signal::SIGTERM);

        let mut previous = SigSet::empty();
        sigprocmask(SigmaskHow::SIG_BLOCK, Some(&deferred), Some(&mut previous))
            .map_err(mask_error)?;
        Ok(Self { previous })
    }

    /// Reinstates the mask that was in effect before [`Self::block`].
    /// Pending signals are delivered at this point.
    ///
    /// # Errors
    ///
    /// Returns `HubrootError::Isolation` if the signal mask cannot be changed.
    pub fn restore(&self) -> Result<()> {
        sigprocmask(SigmaskHow::SIG_SETMASK, Some(&self.previous), None)
            .map_err(mask_error)
    }
}

fn mask_error(e: Errno) -> HubrootError {
    HubrootError::Isolation {
        message: format!("failed to change signal mask: {e}"),
    }
}

/// Blocks until `child` terminates, retrying interrupted waits.
///
/// # Errors
///
/// Returns `HubrootError::Isolation` if `waitpid(2)` fails.
pub fn wait_for(child: Pid) -> Result<ExitStatus> {
    loop {
        match waitpid(child, None) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(ExitStatus::Exited(code)),
            Ok(WaitStatus::Signaled(_, signal, _)) => {
                tracing::warn!(pid = child.as_raw(), %signal, "supervised run killed by signal");
                return Ok(ExitStatus::Signaled(signal as i32));
            }
            Ok(_) | Err(Errno::EINTR) => {}
            Err(e) => {
                return Err(HubrootError::Isolation {
                    message: format!("waiting for pid {child} failed: {e}"),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_exit_code_is_returned() {
        let status = run_forked(|| 7).expect("supervise failed");
        assert_eq!(status, ExitStatus::Exited(7));
    }

    #[test]
    fn child_killed_by_signal_maps_to_offset() {
        let status = run_forked(|| {
            let _ = nix::sys::signal::raise(Signal::SIGKILL);
            0
        })
        .expect("supervise failed");
        assert_eq!(status, ExitStatus::Signaled(9));
        assert_eq!(status.code(), 137);
    }

    #[test]
    fn interrupt_before_handler_is_deferred() {
        use nix::sys::signal::{SigHandler, kill, signal};
        use nix::unistd::getpid;

        let status = run_forked(|| {
            let Ok(deferred) = DeferredSignals::block() else {
                return 1;
            };
            let _ = kill(getpid(), Signal::SIGINT);
            // SAFETY: `SigIgn` installs no handler code.
            let _ = unsafe { signal(Signal::SIGINT, SigHandler::SigIgn) };
            if deferred.restore().is_err() {
                return 2;
            }
            0
        })
        .expect("supervise failed");
        assert_eq!(status, ExitStatus::Exited(0));
    }

    #[test]
    fn restored_mask_lets_signals_through() {
        let status = run_forked(|| {
            let Ok(deferred) = DeferredSignals::block() else {
                return 1;
            };
            if deferred.restore().is_err() {
                return 2;
            }
            let _ = nix::sys::signal::raise(Signal::SIGTERM);
            0
        })
        .expect("supervise failed");
        assert_eq!(status, ExitStatus::Signaled(15));
    }

    #[test]
    fn waiting_on_unknown_pid_fails() {
        let err = wait_for(Pid::from_raw(i32::MAX)).expect_err("should fail");
        assert!(matches!(err, HubrootError::Isolation { .. }));
    }
}
