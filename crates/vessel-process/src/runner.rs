//! Running the launcher synchronously or in place of this process.

use std::ffi::OsString;
use std::io::{self, Write};
use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::PROCESS_TARGET;
use crate::error::RunnerError;

/// Status reported when the child died from a signal.
pub const KILLED_BY_SIGNAL: i32 = -1;

/// An environment given as `(name, value)` pairs.
pub type Environment = [(OsString, OsString)];

fn command(argv: &[OsString], env: Option<&Environment>) -> Result<(Command, PathBuf), RunnerError> {
    let (program, args) = argv.split_first().ok_or(RunnerError::EmptyCommand)?;
    let mut command = Command::new(program);
    command.args(args);
    if let Some(pairs) = env {
        command.env_clear();
        command.envs(pairs.iter().map(|(name, value)| (name, value)));
    }
    Ok((command, PathBuf::from(program)))
}

/// Runs `argv` to completion with the caller's standard streams.
///
/// With `env` set, the child sees exactly those variables; otherwise it
/// inherits the current environment. Returns the exit code, or
/// [`KILLED_BY_SIGNAL`] when the child was terminated by a signal.
///
/// # Errors
///
/// Returns [`RunnerError::Spawn`] when the child cannot be started and
/// [`RunnerError::Wait`] when its status cannot be collected.
pub fn run_sync(argv: &[OsString], env: Option<&Environment>) -> Result<i32, RunnerError> {
    let (mut command, program) = command(argv, env)?;
    debug!(target: PROCESS_TARGET, program = %program.display(), args = argv.len(), "spawning");
    let mut child = command.spawn().map_err(|source| RunnerError::Spawn {
        program: program.clone(),
        source: Arc::new(source),
    })?;
    let status = child.wait().map_err(|source| RunnerError::Wait {
        program: program.clone(),
        source: Arc::new(source),
    })?;
    Ok(exit_code(&program, status))
}

fn exit_code(program: &Path, status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        info!(target: PROCESS_TARGET, program = %program.display(), code, "child exited");
        code
    } else {
        warn!(
            target: PROCESS_TARGET,
            program = %program.display(),
            signal = status.signal(),
            "child killed by signal"
        );
        KILLED_BY_SIGNAL
    }
}

/// A child started on a terminal by [`spawn_on_terminal`].
#[derive(Debug)]
pub struct TerminalChild {
    child: Child,
    program: PathBuf,
}

impl TerminalChild {
    /// Process identifier of the child.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Collects the exit status if the child has finished.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Wait`] when the status cannot be queried.
    pub fn try_wait(&mut self) -> Result<Option<i32>, RunnerError> {
        let status = self.child.try_wait().map_err(|source| RunnerError::Wait {
            program: self.program.clone(),
            source: Arc::new(source),
        })?;
        Ok(status.map(|status| exit_code(&self.program, status)))
    }

    /// Blocks until the child exits.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Wait`] when the status cannot be collected.
    pub fn wait(mut self) -> Result<i32, RunnerError> {
        let status = self.child.wait().map_err(|source| RunnerError::Wait {
            program: self.program.clone(),
            source: Arc::new(source),
        })?;
        Ok(exit_code(&self.program, status))
    }
}

/// Starts `argv` in a new session with `terminal` as its standard streams
/// and controlling terminal.
///
/// # Errors
///
/// Returns [`RunnerError::Spawn`] when the terminal cannot be duplicated or
/// the child cannot be started.
pub fn spawn_on_terminal(
    argv: &[OsString],
    env: Option<&Environment>,
    terminal: BorrowedFd<'_>,
) -> Result<TerminalChild, RunnerError> {
    let (mut command, program) = command(argv, env)?;
    let spawn_failed = |source: io::Error| RunnerError::Spawn {
        program: program.clone(),
        source: Arc::new(source),
    };
    command
        .stdin(Stdio::from(terminal.try_clone_to_owned().map_err(spawn_failed)?))
        .stdout(Stdio::from(terminal.try_clone_to_owned().map_err(spawn_failed)?))
        .stderr(Stdio::from(terminal.try_clone_to_owned().map_err(spawn_failed)?));
    let raw = terminal.as_raw_fd();
    // SAFETY: the hook only issues `setsid` and `ioctl(TIOCSCTTY)`, both
    // async-signal-safe. `raw` stays open in the child until exec.
    unsafe {
        command.pre_exec(move || {
            rustix::process::setsid()?;
            rustix::process::ioctl_tiocsctty(BorrowedFd::borrow_raw(raw))?;
            Ok(())
        });
    }
    debug!(target: PROCESS_TARGET, program = %program.display(), "spawning on terminal");
    let child = command.spawn().map_err(spawn_failed)?;
    Ok(TerminalChild { child, program })
}

/// Replaces the current process with `argv`.
///
/// Standard output and error are flushed first. When `stdout` is given it
/// becomes the new image's standard output. Only returns when the
/// replacement failed.
#[must_use]
pub fn exec_replace(
    argv: &[OsString],
    env: Option<&Environment>,
    stdout: Option<OwnedFd>,
) -> RunnerError {
    let (mut command, program) = match command(argv, env) {
        Ok(parts) => parts,
        Err(error) => return error,
    };
    // Unflushed buffers would be lost with the old image.
    if let Err(error) = io::stdout().flush() {
        debug!(target: PROCESS_TARGET, %error, "flushing stdout failed");
    }
    if let Err(error) = io::stderr().flush() {
        debug!(target: PROCESS_TARGET, %error, "flushing stderr failed");
    }
    if let Some(fd) = stdout {
        command.stdout(Stdio::from(fd));
    }
    info!(target: PROCESS_TARGET, program = %program.display(), "replacing process image");
    let source = command.exec();
    RunnerError::Exec {
        program,
        source: Arc::new(source),
    }
}
