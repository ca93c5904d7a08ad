//! Root directory preparation around layer extraction.

use std::path::Path;

use hubroot_common::config::DeviceMode;
use hubroot_common::error::{HubrootError, Result};
use hubroot_core::filesystem::devices;

/// Creates the root directory if needed.
///
/// # Errors
///
/// Returns `HubrootError::Filesystem` if the directory cannot be created.
pub fn prepare_root_dir(root: &Path) -> Result<()> {
    std::fs::create_dir_all(root).map_err(|e| HubrootError::Filesystem {
        path: root.to_path_buf(),
        source: e,
    })?;
    tracing::debug!(root = %root.display(), "root directory ready");
    Ok(())
}

/// Seeds `/dev` inside `root` according to `mode`.
///
/// Must run after the last layer is extracted so no layer can replace
/// the seeded entries.
///
/// # Errors
///
/// Returns `HubrootError::Filesystem` if seeding fails.
pub fn seed_devices(root: &Path, mode: DeviceMode) -> Result<()> {
    tracing::info!(root = %root.display(), ?mode, "seeding device nodes");
    match mode {
        DeviceMode::Placeholder => devices::seed_minimal_devices(root),
        DeviceMode::CharDevice => devices::seed_device_nodes(root),
    }
}
