//! Minimal `/dev` population for the assembled root.
//!
//! Images ship an empty or missing `/dev`. Many programs open
//! `/dev/null` unconditionally, so one entry is seeded before the root
//! change. The default is an empty regular file: opening, reading (EOF),
//! and writing all succeed, but writes accumulate on disk instead of
//! being discarded. [`seed_device_nodes`] creates the real character
//! device when the caller holds `CAP_MKNOD`.

use std::path::{Path, PathBuf};

use hubroot_common::error::{HubrootError, Result};

const NULL_DEVICE_MODE: u32 = 0o666;
const DEV_DIR_MODE: u32 = 0o755;

/// Returns the path of the `dev` directory inside `root`.
#[must_use]
pub fn dev_dir(root: &Path) -> PathBuf {
    root.join("dev")
}

/// Ensures `root/dev` exists and contains an empty `null` placeholder file.
///
/// An existing `dev/null` left by a layer is truncated to zero length.
///
/// # Errors
///
/// Returns `HubrootError::Filesystem` if the directory or file cannot be
/// created.
pub fn seed_minimal_devices(root: &Path) -> Result<()> {
    let dev = ensure_dev_dir(root)?;
    let null = dev.join("null");
    remove_if_special(&null)?;

    std::fs::write(&null, []).map_err(|e| HubrootError::Filesystem {
        path: null.clone(),
        source: e,
    })?;
    set_mode(&null, NULL_DEVICE_MODE)?;

    tracing::debug!(path = %null.display(), "seeded /dev/null placeholder");
    Ok(())
}

/// Creates `root/dev/null` as a real `1:3` character device.
///
/// Falls back to [`seed_minimal_devices`] when `mknod(2)` is refused for
/// lack of privilege.
///
/// # Errors
///
/// Returns `HubrootError::Filesystem` if `dev` cannot be prepared, or if
/// `mknod(2)` fails for a reason other than missing privilege.
#[cfg(target_os = "linux")]
pub fn seed_device_nodes(root: &Path) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::stat::{Mode, SFlag, makedev, mknod};

    let dev = ensure_dev_dir(root)?;
    let null = dev.join("null");
    remove_existing(&null)?;

    match mknod(
        &null,
        SFlag::S_IFCHR,
        Mode::from_bits_truncate(NULL_DEVICE_MODE),
        makedev(1, 3),
    ) {
        Ok(()) => {
            set_mode(&null, NULL_DEVICE_MODE)?;
            tracing::debug!(path = %null.display(), "created /dev/null character device");
            Ok(())
        }
        Err(Errno::EPERM | Errno::EACCES) => {
            tracing::warn!(
                path = %null.display(),
                "mknod not permitted, falling back to placeholder /dev/null"
            );
            seed_minimal_devices(root)
        }
        Err(e) => Err(HubrootError::Filesystem {
            path: null,
            source: std::io::Error::from(e),
        }),
    }
}

/// Non-Linux platforms only get the placeholder.
///
/// # Errors
///
/// Same as [`seed_minimal_devices`].
#[cfg(not(target_os = "linux"))]
pub fn seed_device_nodes(root: &Path) -> Result<()> {
    seed_minimal_devices(root)
}

/// Creates `root/dev` as a real directory. A symlink or other non-directory
/// left there by a layer is removed first, so seeding never writes through
/// it to a path outside `root`.
fn ensure_dev_dir(root: &Path) -> Result<PathBuf> {
    let dev = dev_dir(root);
    match std::fs::symlink_metadata(&dev) {
        Ok(meta) if meta.is_dir() => {}
        Ok(meta) => {
            tracing::debug!(
                path = %dev.display(),
                symlink = meta.file_type().is_symlink(),
                "replacing non-directory dev entry"
            );
            remove_existing(&dev)?;
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(HubrootError::Filesystem {
                path: dev,
                source: e,
            });
        }
    }
    std::fs::create_dir_all(&dev).map_err(|e| HubrootError::Filesystem {
        path: dev.clone(),
        source: e,
    })?;
    set_mode(&dev, DEV_DIR_MODE)?;
    Ok(dev)
}

/// Removes `path` unless it is absent or already a regular file.
fn remove_if_special(path: &Path) -> Result<()> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_file() => Ok(()),
        Ok(_) => remove_existing(path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(HubrootError::Filesystem {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

fn remove_existing(path: &Path) -> Result<()> {
    let meta = match std::fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(HubrootError::Filesystem {
                path: path.to_path_buf(),
                source: e,
            });
        }
    };
    let removed = if meta.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    removed.map_err(|e| HubrootError::Filesystem {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(|e| {
        HubrootError::Filesystem {
            path: path.to_path_buf(),
            source: e,
        }
    })
}

#[cfg(not(unix))]
#[allow(clippy::unnecessary_wraps)]
const fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use super::*;

    #[test]
    fn seed_creates_empty_readable_writable_null() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        seed_minimal_devices(dir.path()).expect("seed failed");

        let null = dir.path().join("dev").join("null");
        let meta = std::fs::metadata(&null).expect("dev/null missing");
        assert!(meta.is_file());
        assert_eq!(meta.len(), 0);

        let mut contents = Vec::new();
        let _ = std::fs::File::open(&null)
            .expect("open for read failed")
            .read_to_end(&mut contents)
            .expect("read failed");
        assert!(contents.is_empty());

        let _ = std::fs::OpenOptions::new()
            .write(true)
            .open(&null)
            .expect("open for write failed");
    }

    #[test]
    fn seed_truncates_existing_null_from_layer() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let dev = dir.path().join("dev");
        std::fs::create_dir_all(&dev).expect("mkdir failed");
        std::fs::File::create(dev.join("null"))
            .and_then(|mut f| f.write_all(b"left over"))
            .expect("write failed");

        seed_minimal_devices(dir.path()).expect("seed failed");
        let meta = std::fs::metadata(dev.join("null")).expect("dev/null missing");
        assert_eq!(meta.len(), 0);
    }

    #[test]
    fn seed_replaces_directory_named_null() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        std::fs::create_dir_all(dir.path().join("dev/null/nested")).expect("mkdir failed");

        seed_minimal_devices(dir.path()).expect("seed failed");
        assert!(dir.path().join("dev/null").is_file());
    }

    #[cfg(unix)]
    #[test]
    fn seed_sets_world_read_write_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("failed to create tempdir");
        seed_minimal_devices(dir.path()).expect("seed failed");
        let mode = std::fs::metadata(dir.path().join("dev/null"))
            .expect("dev/null missing")
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o666);
    }

    #[test]
    fn seed_replaces_file_named_dev() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        std::fs::write(dir.path().join("dev"), b"not a directory").expect("write failed");
        seed_minimal_devices(dir.path()).expect("seed failed");
        assert!(dir.path().join("dev/null").is_file());
    }

    #[cfg(unix)]
    #[test]
    fn seed_does_not_follow_dev_symlink_out_of_root() {
        use std::os::unix::fs::{PermissionsExt, symlink};

        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let outside = dir.path().join("outside");
        std::fs::create_dir(&outside).expect("mkdir failed");
        std::fs::set_permissions(&outside, std::fs::Permissions::from_mode(0o700))
            .expect("chmod failed");
        let root = dir.path().join("root");
        std::fs::create_dir(&root).expect("mkdir failed");
        symlink(&outside, root.join("dev")).expect("symlink failed");

        seed_minimal_devices(&root).expect("seed failed");

        assert!(!outside.join("null").exists());
        let mode = std::fs::metadata(&outside)
            .expect("outside missing")
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o700);
        let dev = std::fs::symlink_metadata(root.join("dev")).expect("dev missing");
        assert!(dev.is_dir());
        assert!(root.join("dev/null").is_file());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn device_nodes_do_not_follow_dev_symlink_out_of_root() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let outside = dir.path().join("outside");
        std::fs::create_dir(&outside).expect("mkdir failed");
        let root = dir.path().join("root");
        std::fs::create_dir(&root).expect("mkdir failed");
        std::os::unix::fs::symlink(&outside, root.join("dev")).expect("symlink failed");

        seed_device_nodes(&root).expect("seed failed");

        assert!(std::fs::read_dir(&outside).expect("read_dir failed").next().is_none());
        assert!(root.join("dev/null").exists());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn device_nodes_always_leave_a_usable_null() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        seed_device_nodes(dir.path()).expect("seed failed");

        let null = dir.path().join("dev/null");
        let mut file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&null)
            .expect("open failed");
        file.write_all(b"discard me").expect("write failed");
    }
}
