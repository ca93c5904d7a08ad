//! Single-shot run pipeline.
//!
//! A [`Pipeline`] moves through [`RunStage`]s strictly in order: resolve
//! the reference, authenticate, fetch the manifest, extract the layers and
//! seed devices, change root, run, exit. The first error is terminal; the
//! pipeline logs the last stage it reached and refuses further work.

use std::path::Path;

use hubroot_common::config::{LaunchConfig, RegistryConfig};
use hubroot_common::error::{HubrootError, Result};
use hubroot_common::types::{ImageReference, RunStage};
use hubroot_image::manifest::Manifest;
use hubroot_image::registry::{PulledLayer, RegistryClient};
use hubroot_image::rootfs;

use crate::process::{ExitStatus, Launcher, ProcessIo};

/// Everything known about an image once its root is assembled.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    /// The resolved reference.
    pub reference: ImageReference,
    /// The manifest the layers were taken from.
    pub manifest: Manifest,
    /// Layers in the order they were extracted.
    pub layers: Vec<PulledLayer>,
}

/// Drives one image from reference to exit status.
#[derive(Debug)]
pub struct Pipeline {
    registry: RegistryConfig,
    launch: LaunchConfig,
    stage: RunStage,
    failed: bool,
}

impl Pipeline {
    /// Creates a pipeline at [`RunStage::Created`].
    #[must_use]
    pub const fn new(registry: RegistryConfig, launch: LaunchConfig) -> Self {
        Self {
            registry,
            launch,
            stage: RunStage::Created,
            failed: false,
        }
    }

    /// The last stage reached.
    #[must_use]
    pub const fn stage(&self) -> RunStage {
        self.stage
    }

    /// Whether a step has failed. A failed pipeline accepts no further work.
    #[must_use]
    pub const fn has_failed(&self) -> bool {
        self.failed
    }

    /// Resolves `image`, pulls its layers into `root`, and seeds devices.
    ///
    /// Ends at [`RunStage::LayersExtracted`].
    ///
    /// # Errors
    ///
    /// Returns the first error from resolution, authentication, manifest
    /// retrieval, layer download and extraction, or device seeding.
    pub fn prepare_root(&mut self, image: &str, root: &Path) -> Result<PreparedImage> {
        self.ensure_at(RunStage::Created)?;
        let client = self.guard(RegistryClient::new(self.registry.clone()))?;

        let reference = self.advance(RunStage::Resolved, client.resolve(image))?;
        tracing::info!(image, reference = %reference, "image resolved");

        let token = self.advance(RunStage::Authenticated, client.authenticate(&reference))?;
        let manifest = self.advance(
            RunStage::ManifestFetched,
            client.fetch_manifest(&reference, &token),
        )?;

        let device_mode = self.launch.device_mode;
        let extracted = client
            .fetch_and_extract_layers(&manifest, &token, root)
            .and_then(|layers| rootfs::seed_devices(root, device_mode).map(|()| layers));
        let layers = self.advance(RunStage::LayersExtracted, extracted)?;

        Ok(PreparedImage {
            reference,
            manifest,
            layers,
        })
    }

    /// Changes root to `root` and runs `command` there.
    ///
    /// Ends at [`RunStage::Exited`]. A non-zero exit is a status, not an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns `HubrootError::Config` if the root has not been prepared,
    /// `HubrootError::Isolation` if the root change or namespace creation
    /// fails, and `HubrootError::Launch` if the command cannot be run.
    pub fn launch(
        &mut self,
        root: &Path,
        command: &str,
        args: &[String],
        io: ProcessIo<'_>,
    ) -> Result<ExitStatus> {
        self.ensure_at(RunStage::LayersExtracted)?;
        let launcher = Launcher::new(self.launch.clone());

        self.advance(RunStage::RootChanged, launcher.change_root(root))?;
        let status = self.advance(RunStage::Running, launcher.run(command, args, io))?;
        self.advance(RunStage::Exited, Ok(status))
    }

    /// Runs the whole pipeline: [`Self::prepare_root`] then [`Self::launch`].
    ///
    /// # Errors
    ///
    /// Returns the first error from either step.
    pub fn run(
        mut self,
        image: &str,
        root: &Path,
        command: &str,
        args: &[String],
        io: ProcessIo<'_>,
    ) -> Result<ExitStatus> {
        let prepared = self.prepare_root(image, root)?;
        tracing::info!(
            image = %prepared.reference,
            layers = prepared.layers.len(),
            root = %root.display(),
            "root assembled"
        );
        self.launch(root, command, args, io)
    }

    fn ensure_at(&self, expected: RunStage) -> Result<()> {
        if self.failed {
            return Err(HubrootError::Config {
                message: format!("pipeline already failed after stage {}", self.stage),
            });
        }
        if self.stage != expected {
            return Err(HubrootError::Config {
                message: format!("pipeline is at stage {}, expected {expected}", self.stage),
            });
        }
        Ok(())
    }

    /// Records a failure without moving to another stage.
    fn guard<T>(&mut self, result: Result<T>) -> Result<T> {
        result.map_err(|e| {
            self.failed = true;
            tracing::error!(stage = %self.stage, error = %e, "pipeline failed");
            e
        })
    }

    /// Moves to `target` on success; `target` must directly follow the
    /// current stage.
    fn advance<T>(&mut self, target: RunStage, result: Result<T>) -> Result<T> {
        if self.stage.next() != Some(target) {
            self.failed = true;
            return Err(HubrootError::Config {
                message: format!("cannot move from stage {} to {target}", self.stage),
            });
        }
        let value = self.guard(result)?;
        self.stage = target;
        tracing::debug!(stage = %target, "pipeline stage reached");
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline() -> Pipeline {
        Pipeline::new(RegistryConfig::default(), LaunchConfig::default())
    }

    #[test]
    fn new_pipeline_starts_created() {
        let p = pipeline();
        assert_eq!(p.stage(), RunStage::Created);
        assert!(!p.has_failed());
    }

    #[test]
    fn launch_before_prepare_is_rejected() {
        let mut p = pipeline();
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let err = p
            .launch(dir.path(), "true", &[], ProcessIo::default())
            .expect_err("should fail");
        assert!(matches!(err, HubrootError::Config { .. }));
        assert_eq!(p.stage(), RunStage::Created);
    }

    #[test]
    fn invalid_reference_fails_before_network() {
        let mut p = pipeline();
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let err = p.prepare_root(":latest", dir.path()).expect_err("should fail");
        assert!(matches!(err, HubrootError::InvalidReference { .. }));
        assert!(p.has_failed());
        assert_eq!(p.stage(), RunStage::Created);
    }

    #[test]
    fn failed_pipeline_refuses_further_work() {
        let mut p = pipeline();
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let _ = p.prepare_root("", dir.path()).expect_err("should fail");
        let err = p.prepare_root("alpine", dir.path()).expect_err("should fail");
        assert!(matches!(err, HubrootError::Config { ref message } if message.contains("already failed")));
    }

    #[test]
    fn skipping_a_stage_is_rejected() {
        let mut p = pipeline();
        let err = p
            .advance(RunStage::Authenticated, Ok(()))
            .expect_err("should fail");
        assert!(matches!(err, HubrootError::Config { .. }));
        assert!(p.has_failed());
    }
}
