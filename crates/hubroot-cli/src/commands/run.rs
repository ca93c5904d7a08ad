//! `hubroot run`: pull an image and run a command inside it.
//!
//! The root directory outlives the forked run: the child assembles the
//! root, changes into it, and runs the command; the parent only waits and
//! then removes the directory unless asked to keep it.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Args, ValueEnum};
use hubroot_common::config::{DeviceMode, LaunchConfig, RegistryConfig};
use hubroot_common::constants::{PIPELINE_FAILURE_EXIT_CODE, ROOT_DIR_PREFIX};
use hubroot_core::privilege;
use hubroot_runtime::pipeline::Pipeline;
use hubroot_runtime::process::{ExitStatus, ProcessIo};
use hubroot_runtime::supervisor::{self, DeferredSignals};
use tempfile::TempDir;

use crate::output;

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Image to run, as `name[:tag]`.
    pub image: String,

    /// Command to execute inside the image, followed by its arguments.
    #[arg(
        value_name = "COMMAND",
        required = true,
        num_args = 1..,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub command: Vec<String>,

    /// Registry endpoints and request policy.
    #[command(flatten)]
    pub registry: RegistryArgs,

    /// Kill the command after this many seconds.
    #[arg(long, value_name = "SECS")]
    pub run_timeout_secs: Option<u64>,

    /// Run the command in the current PID namespace.
    #[arg(long)]
    pub no_pid_namespace: bool,

    /// How `/dev/null` is provided inside the image.
    #[arg(long, value_enum, default_value_t = DeviceModeArg::Placeholder)]
    pub device_mode: DeviceModeArg,

    /// Keep the temporary root directory after the run.
    #[arg(long)]
    pub keep_root: bool,

    /// Assemble the image in this directory instead of a temporary one.
    /// The directory is never removed.
    #[arg(long, value_name = "DIR")]
    pub root_dir: Option<PathBuf>,
}

/// Registry options, each also readable from a `HUBROOT_*` variable.
#[derive(Args, Debug, Default)]
pub struct RegistryArgs {
    /// JSON file with registry settings; flags override its values.
    #[arg(long, env = "HUBROOT_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Registry base URL.
    #[arg(long, env = "HUBROOT_REGISTRY", value_name = "URL")]
    pub registry: Option<String>,

    /// Token endpoint URL.
    #[arg(long, env = "HUBROOT_AUTH_URL", value_name = "URL")]
    pub auth_url: Option<String>,

    /// Service name sent to the token endpoint.
    #[arg(long, env = "HUBROOT_SERVICE")]
    pub service: Option<String>,

    /// Namespace prepended to single-segment image names.
    #[arg(long, env = "HUBROOT_NAMESPACE")]
    pub namespace: Option<String>,

    /// Per-request deadline in seconds.
    #[arg(long, env = "HUBROOT_TIMEOUT_SECS", value_name = "SECS")]
    pub timeout_secs: Option<u64>,

    /// Retries for transient registry failures.
    #[arg(long, env = "HUBROOT_RETRIES")]
    pub retries: Option<u32>,
}

impl RegistryArgs {
    /// Builds the registry configuration: defaults, then the file, then flags.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be loaded or the result is invalid.
    pub fn to_config(&self) -> anyhow::Result<RegistryConfig> {
        let mut config = match &self.config {
            Some(path) => RegistryConfig::from_file(path)?,
            None => RegistryConfig::default(),
        };
        if let Some(url) = &self.registry {
            config.registry_url.clone_from(url);
        }
        if let Some(url) = &self.auth_url {
            config.auth_url.clone_from(url);
        }
        if let Some(service) = &self.service {
            config.service.clone_from(service);
        }
        if let Some(namespace) = &self.namespace {
            config.default_namespace.clone_from(namespace);
        }
        if let Some(secs) = self.timeout_secs {
            config.timeout_secs = secs;
        }
        if let Some(retries) = self.retries {
            config.max_retries = retries;
        }
        config.validate()?;
        Ok(config)
    }
}

/// `--device-mode` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DeviceModeArg {
    /// Empty regular file.
    Placeholder,
    /// Real character device, falling back to a placeholder.
    CharDevice,
}

impl From<DeviceModeArg> for DeviceMode {
    fn from(arg: DeviceModeArg) -> Self {
        match arg {
            DeviceModeArg::Placeholder => Self::Placeholder,
            DeviceModeArg::CharDevice => Self::CharDevice,
        }
    }
}

impl RunArgs {
    /// Launch settings selected by the flags.
    #[must_use]
    pub fn launch_config(&self) -> LaunchConfig {
        LaunchConfig {
            pid_namespace: !self.no_pid_namespace,
            device_mode: self.device_mode.into(),
            timeout_secs: self.run_timeout_secs,
        }
    }
}

/// Executes the `run` command.
///
/// # Errors
///
/// Returns an error if the configuration is invalid, the root directory
/// cannot be created, or the run cannot be supervised. Failures inside the
/// forked run surface as exit code 125 instead.
pub fn execute(args: RunArgs) -> anyhow::Result<ExitCode> {
    let registry = args.registry.to_config()?;
    let launch = args.launch_config();
    let (command, command_args) = args
        .command
        .split_first()
        .context("no command given")?;

    if !privilege::is_privileged() {
        tracing::warn!("not running as root; the root change will likely be refused");
    }

    let root = RootDir::create(args.root_dir.as_deref(), args.keep_root)?;
    tracing::info!(image = %args.image, root = %root.path().display(), "starting run");

    // Interrupts reach the whole process group; the parent outlives them
    // so the root can still be removed. They stay blocked until the
    // handler is installed.
    let deferred = DeferredSignals::block()?;
    let child = supervisor::spawn(|| {
        if let Err(e) = deferred.restore() {
            tracing::warn!(error = %e, "failed to restore signal mask in run");
        }
        run_in_child(registry, launch, &args.image, root.path(), command, command_args)
    });

    if child.is_ok() {
        if let Err(e) = ctrlc::set_handler(|| {}) {
            tracing::warn!(error = %e, "failed to install interrupt handler");
        }
    }
    if let Err(e) = deferred.restore() {
        tracing::warn!(error = %e, "failed to restore signal mask");
    }

    let status = supervisor::wait_for(child?);
    root.finish();
    let status = status?;

    tracing::info!(code = status.code(), "run finished");
    Ok(ExitCode::from(exit_byte(status)))
}

/// Body of the forked child. Never returns to the parent's code.
fn run_in_child(
    registry: RegistryConfig,
    launch: LaunchConfig,
    image: &str,
    root: &Path,
    command: &str,
    args: &[String],
) -> i32 {
    let mut pipeline = Pipeline::new(registry, launch);
    let result = pipeline.prepare_root(image, root).and_then(|prepared| {
        let pulled: u64 = prepared.layers.iter().map(|l| l.size_bytes).sum();
        tracing::info!(
            image = %prepared.reference,
            layers = prepared.layers.len(),
            size = %output::format_bytes(pulled),
            "image pulled"
        );
        pipeline.launch(root, command, args, ProcessIo::default())
    });

    match result {
        Ok(status) => status.code(),
        Err(e) => {
            output::report_failure(&e.to_string());
            i32::from(PIPELINE_FAILURE_EXIT_CODE)
        }
    }
}

fn exit_byte(status: ExitStatus) -> u8 {
    u8::try_from(status.code()).unwrap_or(PIPELINE_FAILURE_EXIT_CODE)
}

/// The directory the image is assembled in.
#[derive(Debug)]
enum RootDir {
    /// Removed when the run ends.
    Temporary(TempDir),
    /// Left in place.
    Kept(PathBuf),
}

impl RootDir {
    fn create(explicit: Option<&Path>, keep: bool) -> anyhow::Result<Self> {
        if let Some(path) = explicit {
            std::fs::create_dir_all(path)
                .with_context(|| format!("failed to create root directory {}", path.display()))?;
            return Ok(Self::Kept(path.to_path_buf()));
        }

        let dir = tempfile::Builder::new()
            .prefix(ROOT_DIR_PREFIX)
            .tempdir()
            .context("failed to create temporary root directory")?;
        if keep {
            Ok(Self::Kept(dir.keep()))
        } else {
            Ok(Self::Temporary(dir))
        }
    }

    fn path(&self) -> &Path {
        match self {
            Self::Temporary(dir) => dir.path(),
            Self::Kept(path) => path,
        }
    }

    fn finish(self) {
        match self {
            Self::Temporary(dir) => {
                let path = dir.path().to_path_buf();
                match dir.close() {
                    Ok(()) => tracing::debug!(root = %path.display(), "root directory removed"),
                    Err(e) => tracing::warn!(root = %path.display(), error = %e, "failed to remove root directory"),
                }
            }
            Self::Kept(path) => tracing::info!(root = %path.display(), "root directory kept"),
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::commands::{Cli, Command};

    fn parse(argv: &[&str]) -> RunArgs {
        let cli = Cli::try_parse_from(argv).expect("parse failed");
        match cli.command {
            Command::Run(args) => args,
        }
    }

    #[test]
    fn command_arguments_keep_their_hyphens() {
        let args = parse(&["hubroot", "run", "alpine:3.19", "echo", "-n", "hey"]);
        assert_eq!(args.image, "alpine:3.19");
        assert_eq!(args.command, ["echo", "-n", "hey"]);
    }

    #[test]
    fn command_is_required() {
        assert!(Cli::try_parse_from(["hubroot", "run", "alpine"]).is_err());
    }

    #[test]
    fn launch_flags_map_onto_config() {
        let args = parse(&[
            "hubroot",
            "run",
            "--no-pid-namespace",
            "--device-mode",
            "char-device",
            "--run-timeout-secs",
            "30",
            "alpine",
            "true",
        ]);
        let launch = args.launch_config();
        assert!(!launch.pid_namespace);
        assert_eq!(launch.device_mode, DeviceMode::CharDevice);
        assert_eq!(launch.timeout_secs, Some(30));
    }

    #[test]
    fn defaults_target_docker_hub() {
        let config = RegistryArgs::default().to_config().expect("config");
        assert_eq!(config, RegistryConfig::default());
    }

    #[test]
    fn registry_flags_override_file() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let file = dir.path().join("registry.json");
        std::fs::write(
            &file,
            r#"{"registry_url": "https://mirror.example", "max_retries": 5}"#,
        )
        .expect("write failed");

        let registry = RegistryArgs {
            config: Some(file),
            retries: Some(1),
            namespace: Some("team".into()),
            ..RegistryArgs::default()
        };
        let config = registry.to_config().expect("config");
        assert_eq!(config.registry_url, "https://mirror.example");
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.default_namespace, "team");
    }

    #[test]
    fn invalid_registry_url_is_rejected() {
        let registry = RegistryArgs {
            registry: Some("not a url".into()),
            ..RegistryArgs::default()
        };
        assert!(registry.to_config().is_err());
    }

    #[test]
    fn temporary_root_is_removed_on_finish() {
        let root = RootDir::create(None, false).expect("create failed");
        let path = root.path().to_path_buf();
        assert!(path.is_dir());
        root.finish();
        assert!(!path.exists());
    }

    #[test]
    fn kept_root_survives_finish() {
        let root = RootDir::create(None, true).expect("create failed");
        let path = root.path().to_path_buf();
        root.finish();
        assert!(path.is_dir());
        std::fs::remove_dir_all(&path).expect("cleanup failed");
    }

    #[test]
    fn explicit_root_dir_is_never_removed() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let explicit = dir.path().join("assembled");
        let root = RootDir::create(Some(&explicit), false).expect("create failed");
        root.finish();
        assert!(explicit.is_dir());
    }

    #[test]
    fn exit_codes_pass_through() {
        assert_eq!(exit_byte(ExitStatus::Exited(7)), 7);
        assert_eq!(exit_byte(ExitStatus::Signaled(15)), 143);
        assert_eq!(exit_byte(ExitStatus::Exited(-1)), PIPELINE_FAILURE_EXIT_CODE);
    }
}
