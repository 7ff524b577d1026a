//! Runs the launcher and cleans up whatever it leaves behind.

use std::io;
use std::os::fd::AsFd;
use std::time::{Duration, Instant};

use mio::{Events, Poll, Token};
use tracing::{debug, info, warn};
use vessel_config::Config;
use vessel_container::LauncherArgs;
use vessel_process::{
    TerminalChild, become_subreaper, exec_replace, run_sync, spawn_on_terminal, terminate_tree,
};
use vessel_pty::{BridgeState, BridgeTokens, PtyBridge, SignalRelay};

use crate::errors::AppError;

const SUPERVISOR_TARGET: &str = "vessel_cli::supervisor";

const TOKENS: BridgeTokens = BridgeTokens {
    input: Token(0),
    output: Token(1),
    pty: Token(2),
};
const FIRST_SIGNAL_TOKEN: Token = Token(3);

/// How often the interactive loop checks on the child.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long buffered output may take to drain once the child has exited.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// How the launcher is attached to this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    /// Wait for the launcher with inherited standard streams.
    Wait,
    /// Replace this process with the launcher.
    Exec,
    /// Attach the launcher to a new pseudo-terminal.
    Interactive,
}

impl Mode {
    pub(crate) const fn from_flags(interactive: bool, exec: bool) -> Self {
        if exec {
            Self::Exec
        } else if interactive {
            Self::Interactive
        } else {
            Self::Wait
        }
    }
}

/// Runs the launcher and returns its exit status.
///
/// Descendants still running afterwards are terminated using the grace
/// periods from `config`.
pub(crate) fn supervise(args: LauncherArgs, mode: Mode, config: &Config) -> Result<i32, AppError> {
    args.prepare_inheritance()?;
    match mode {
        Mode::Exec => {
            let (argv, fds) = args.into_parts();
            let error = exec_replace(&argv, None, None);
            drop(fds);
            Err(error.into())
        }
        Mode::Wait => {
            adopt_orphans();
            let status = run_sync(args.args(), None);
            drop(args);
            reap(config);
            status.map_err(AppError::from)
        }
        Mode::Interactive => {
            let status = interactive(args);
            reap(config);
            status
        }
    }
}

fn adopt_orphans() {
    if let Err(error) = become_subreaper() {
        warn!(target: SUPERVISOR_TARGET, %error, "orphaned descendants will not be tracked");
    }
}

fn reap(config: &Config) {
    if let Err(error) = terminate_tree(config.terminate_wait(), config.terminate_kill()) {
        warn!(target: SUPERVISOR_TARGET, %error, "descendants outlived termination");
    }
}

fn interactive(args: LauncherArgs) -> Result<i32, AppError> {
    let mut poll = Poll::new().map_err(AppError::EventLoop)?;
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut bridge = PtyBridge::new(stdin.as_fd(), stdout.as_fd(), poll.registry(), TOKENS)?;
    let mut signals = SignalRelay::new(poll.registry(), FIRST_SIGNAL_TOKEN)?;
    adopt_orphans();

    let child = {
        let slave = bridge.pty_slave().ok_or(AppError::SlaveUnavailable)?;
        spawn_on_terminal(args.args(), None, slave)
    };
    drop(args);
    bridge.close_slave();
    let mut child = child?;
    info!(target: SUPERVISOR_TARGET, pid = child.id(), "interactive session started");

    let status = pump(&mut poll, &mut bridge, &mut signals, &mut child);
    signals.close(poll.registry());
    drop(bridge);
    status
}

/// Drives the bridge until the child has exited and its output has drained.
fn pump(
    poll: &mut Poll,
    bridge: &mut PtyBridge,
    signals: &mut SignalRelay,
    child: &mut TerminalChild,
) -> Result<i32, AppError> {
    let mut events = Events::with_capacity(64);
    let mut exited: Option<(i32, Instant)> = None;
    loop {
        match exited {
            Some((status, since)) => {
                if bridge.state() == BridgeState::Closed || since.elapsed() >= DRAIN_GRACE {
                    debug!(target: SUPERVISOR_TARGET, state = ?bridge.state(), "session finished");
                    return Ok(status);
                }
            }
            None => {
                if let Some(status) = child.try_wait()? {
                    exited = Some((status, Instant::now()));
                    continue;
                }
            }
        }

        if let Err(error) = poll.poll(&mut events, Some(POLL_INTERVAL)) {
            if error.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(AppError::EventLoop(error));
        }
        for event in &events {
            let token = event.token();
            if signals.owns(token) {
                if let Some(signal) = signals.drain(token) {
                    bridge.inject_signal(signal)?;
                }
            } else {
                bridge.handle_event(event)?;
            }
        }
    }
}
