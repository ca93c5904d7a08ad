//! Privilege checks.
//!
//! `chroot(2)`, `unshare(CLONE_NEWPID)`, and `mknod(2)` all require
//! `CAP_SYS_CHROOT` / `CAP_SYS_ADMIN` / `CAP_MKNOD`. Checking the effective
//! UID up front lets callers fail before any network traffic.

/// Returns `true` when the process runs with an effective UID of 0.
#[cfg(unix)]
#[must_use]
pub fn is_privileged() -> bool {
    nix::unistd::Uid::effective().is_root()
}

/// Always `false` off Unix.
#[cfg(not(unix))]
#[must_use]
pub const fn is_privileged() -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn matches_effective_uid() {
        let uid = nix::unistd::geteuid();
        assert_eq!(is_privileged(), uid.as_raw() == 0);
    }
}
