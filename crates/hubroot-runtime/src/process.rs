//! Process spawning inside the assembled root.
//!
//! The launcher changes the calling process's root, optionally moves its
//! future children into a fresh PID namespace, and runs one command to
//! completion. Output either goes straight to the caller's streams or is
//! relayed into injected writers.
//!
//! The command is killed if the launching process dies first; as PID 1
//! of its namespace it would otherwise ignore the terminal's signals.
//!
//! Once `unshare(CLONE_NEWPID)` has run, the kernel refuses to create new
//! threads in the calling process, so relay threads and their pipes are set
//! up before the namespace is created.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use hubroot_common::config::LaunchConfig;
use hubroot_common::constants::SIGNAL_EXIT_OFFSET;
use hubroot_common::error::{HubrootError, Result};
use hubroot_core::filesystem::chroot;
use hubroot_core::namespace::pid;
use nix::sys::signal::Signal;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Where one output stream of the child goes.
pub enum OutputSink<'a> {
    /// Share the caller's stream.
    Inherit,
    /// Discard the output.
    Null,
    /// Relay the output into this writer.
    Writer(&'a mut (dyn Write + Send)),
}

impl std::fmt::Debug for OutputSink<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inherit => f.write_str("Inherit"),
            Self::Null => f.write_str("Null"),
            Self::Writer(_) => f.write_str("Writer(..)"),
        }
    }
}

/// Output routing for a launched command. Stdin is always `/dev/null`.
#[derive(Debug)]
pub struct ProcessIo<'a> {
    /// Destination of the child's standard output.
    pub stdout: OutputSink<'a>,
    /// Destination of the child's standard error.
    pub stderr: OutputSink<'a>,
}

impl<'a> ProcessIo<'a> {
    /// Relays both streams into the given writers.
    pub fn capture(stdout: &'a mut (dyn Write + Send), stderr: &'a mut (dyn Write + Send)) -> Self {
        Self {
            stdout: OutputSink::Writer(stdout),
            stderr: OutputSink::Writer(stderr),
        }
    }
}

impl Default for ProcessIo<'_> {
    fn default() -> Self {
        Self {
            stdout: OutputSink::Inherit,
            stderr: OutputSink::Inherit,
        }
    }
}

/// How a launched command terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Normal exit with this code, zero or not.
    Exited(i32),
    /// Killed by this signal number.
    Signaled(i32),
}

impl ExitStatus {
    /// The code to exit with on the command's behalf: the exit code itself,
    /// or `128 + signal`.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Exited(code) => code,
            Self::Signaled(signal) => SIGNAL_EXIT_OFFSET + signal,
        }
    }

    /// Returns `true` for a zero exit code.
    #[must_use]
    pub const fn success(self) -> bool {
        matches!(self, Self::Exited(0))
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;

        match (status.code(), status.signal()) {
            (Some(code), _) => Self::Exited(code),
            (None, Some(signal)) => Self::Signaled(signal),
            (None, None) => Self::Exited(-1),
        }
    }
}

/// Runs one command inside an assembled root.
#[derive(Debug, Clone, Default)]
pub struct Launcher {
    config: LaunchConfig,
}

impl Launcher {
    /// Creates a launcher with the given settings.
    #[must_use]
    pub const fn new(config: LaunchConfig) -> Self {
        Self { config }
    }

    /// Returns the launch settings.
    #[must_use]
    pub const fn config(&self) -> &LaunchConfig {
        &self.config
    }

    /// Confines the calling process to `root`. Irreversible.
    ///
    /// # Errors
    ///
    /// Returns `HubrootError::Isolation` if the root change fails.
    pub fn change_root(&self, root: &Path) -> Result<()> {
        chroot::change_root(root)
    }

    /// Runs `command` with `args`, relaying output per `io`, and blocks
    /// until it terminates.
    ///
    /// With `pid_namespace` enabled the command becomes PID 1 of a new
    /// namespace; that namespace is entered by the calling process, so at
    /// most one command can be run per process.
    ///
    /// A non-zero exit or a fatal signal is reported as an [`ExitStatus`],
    /// not as an error.
    ///
    /// # Errors
    ///
    /// Returns `HubrootError::Launch` if the command cannot be spawned,
    /// cannot be waited on, or outlives the configured deadline, and
    /// `HubrootError::Isolation` if the PID namespace cannot be created.
    pub fn run(&self, command: &str, args: &[String], io: ProcessIo<'_>) -> Result<ExitStatus> {
        let ProcessIo { stdout, stderr } = io;
        let (stdout_stdio, stdout_relay) = route(stdout, command)?;
        let (stderr_stdio, stderr_relay) = route(stderr, command)?;

        std::thread::scope(|scope| {
            let relays: Vec<_> = [stdout_relay, stderr_relay]
                .into_iter()
                .flatten()
                .map(|(pipe, sink)| scope.spawn(move || relay_output(pipe, sink)))
                .collect();

            let status = self.spawn_and_wait(command, args, stdout_stdio, stderr_stdio);

            for relay in relays {
                match relay.join() {
                    Ok(Ok(bytes)) => tracing::trace!(bytes, "output relay finished"),
                    Ok(Err(e)) => tracing::warn!(error = %e, "output relay failed"),
                    Err(_) => tracing::warn!("output relay panicked"),
                }
            }
            status
        })
    }

    fn spawn_and_wait(
        &self,
        command: &str,
        args: &[String],
        stdout: Stdio,
        stderr: Stdio,
    ) -> Result<ExitStatus> {
        if self.config.pid_namespace {
            pid::create_pid_namespace()?;
        }

        let mut cmd = Command::new(command);
        let _ = cmd
            .args(args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);
        // SAFETY: `prctl(2)` is async-signal-safe and touches no shared state.
        let _ = unsafe {
            cmd.pre_exec(|| {
                nix::sys::prctl::set_pdeathsig(Signal::SIGKILL).map_err(io::Error::from)
            })
        };

        tracing::info!(command, ?args, "spawning command");
        let spawned = cmd.spawn();
        // Closes our copies of the pipe write ends so relays see EOF.
        drop(cmd);
        let mut child =
            spawned.map_err(|e| launch_error(command, format!("failed to spawn: {e}")))?;
        tracing::debug!(pid = child.id(), "command running");

        let status = ExitStatus::from(self.wait(&mut child, command)?);
        tracing::info!(command, code = status.code(), "command exited");
        Ok(status)
    }

    fn wait(&self, child: &mut Child, command: &str) -> Result<std::process::ExitStatus> {
        let wait_error = |e: io::Error| launch_error(command, format!("wait failed: {e}"));

        let Some(limit) = self.config.timeout() else {
            return child.wait().map_err(wait_error);
        };

        let deadline = Instant::now() + limit;
        loop {
            if let Some(status) = child.try_wait().map_err(wait_error)? {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                tracing::warn!(command, limit_secs = limit.as_secs(), "command exceeded its deadline, killing");
                let _ = child.kill();
                let _ = child.wait();
                return Err(launch_error(
                    command,
                    format!("timed out after {}s", limit.as_secs()),
                ));
            }
            std::thread::sleep(WAIT_POLL_INTERVAL);
        }
    }
}

type Relay<'a> = (File, &'a mut (dyn Write + Send));

/// Picks the child's stdio for one sink, creating a pipe for writers.
fn route<'a>(sink: OutputSink<'a>, command: &str) -> Result<(Stdio, Option<Relay<'a>>)> {
    match sink {
        OutputSink::Inherit => Ok((Stdio::inherit(), None)),
        OutputSink::Null => Ok((Stdio::null(), None)),
        OutputSink::Writer(writer) => {
            let (read, write) = nix::unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC)
                .map_err(|e| launch_error(command, format!("failed to create output pipe: {e}")))?;
            Ok((Stdio::from(write), Some((File::from(read), writer))))
        }
    }
}

fn relay_output(mut source: impl Read, sink: &mut (dyn Write + Send)) -> io::Result<u64> {
    let copied = io::copy(&mut source, sink)?;
    sink.flush()?;
    Ok(copied)
}

fn launch_error(command: &str, message: String) -> HubrootError {
    HubrootError::Launch {
        command: command.to_string(),
        message,
    }
}
