//! Two-phase termination of every descendant of this process.

use std::collections::BTreeSet;
use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use tracing::{debug, info, warn};

use crate::PROCESS_TARGET;
use crate::error::RunnerError;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Marks this process as a child subreaper.
///
/// Orphaned descendants are then reparented here instead of to init, which
/// keeps them visible to [`terminate_tree`].
///
/// # Errors
///
/// Returns [`RunnerError::Subreaper`] when the kernel refuses.
pub fn become_subreaper() -> Result<(), RunnerError> {
    nix::sys::prctl::set_child_subreaper(true).map_err(|errno| RunnerError::Subreaper {
        source: Arc::new(errno.into()),
    })?;
    debug!(target: PROCESS_TARGET, "became child subreaper");
    Ok(())
}

/// Lists the direct children of this process, zombies included.
#[must_use]
pub fn children() -> Vec<Pid> {
    let from_tasks = children_from_tasks();
    let pids = match from_tasks {
        Some(pids) => pids,
        None => children_from_stat(),
    };
    pids.into_iter().map(Pid::from_raw).collect()
}

fn children_from_tasks() -> Option<BTreeSet<i32>> {
    let tasks = fs::read_dir("/proc/self/task").ok()?;
    let mut pids = BTreeSet::new();
    let mut readable = false;
    for task in tasks.flatten() {
        let Ok(listing) = fs::read_to_string(task.path().join("children")) else {
            continue;
        };
        readable = true;
        pids.extend(listing.split_whitespace().filter_map(|pid| pid.parse::<i32>().ok()));
    }
    readable.then_some(pids)
}

fn children_from_stat() -> BTreeSet<i32> {
    let me = std::process::id().to_string();
    let Ok(entries) = fs::read_dir("/proc") else {
        return BTreeSet::new();
    };
    entries
        .flatten()
        .filter_map(|entry| {
            let pid = entry.file_name().to_str()?.parse::<i32>().ok()?;
            let stat = fs::read_to_string(entry.path().join("stat")).ok()?;
            (parent_of(&stat)? == me).then_some(pid)
        })
        .collect()
}

/// Extracts the parent pid from a `/proc/<pid>/stat` line.
fn parent_of(stat: &str) -> Option<&str> {
    let (_, after_comm) = stat.rsplit_once(')')?;
    after_comm.split_whitespace().nth(1)
}

/// Collects every exited child without blocking.
fn reap() {
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) | Err(Errno::ECHILD) => return,
            Ok(status) => {
                debug!(target: PROCESS_TARGET, ?status, "reaped descendant");
            }
            Err(Errno::EINTR) => {}
            Err(errno) => {
                warn!(target: PROCESS_TARGET, %errno, "waitpid failed");
                return;
            }
        }
    }
}

/// Signals children until none remain or `grace` elapses. Returns the
/// children still present at the deadline.
fn phase(signal: Signal, grace: Duration) -> Vec<Pid> {
    let deadline = Instant::now() + grace;
    let mut signalled = BTreeSet::new();
    loop {
        reap();
        let remaining = children();
        if remaining.is_empty() {
            return remaining;
        }
        for pid in &remaining {
            if !signalled.insert(pid.as_raw()) {
                continue;
            }
            match kill(*pid, signal) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(errno) => warn!(target: PROCESS_TARGET, pid = pid.as_raw(), %errno, "kill failed"),
            }
        }
        if Instant::now() >= deadline {
            return remaining;
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Terminates every child of this process.
///
/// Children get `SIGTERM` and up to `wait_grace` to exit; whatever remains
/// gets `SIGKILL` and up to `kill_grace`. Descendants reparented to this
/// process during the wait (see [`become_subreaper`]) are signalled as they
/// appear.
///
/// # Errors
///
/// Returns [`RunnerError::Survivors`] listing the processes still present
/// after both phases.
pub fn terminate_tree(wait_grace: Duration, kill_grace: Duration) -> Result<(), RunnerError> {
    let first = phase(Signal::SIGTERM, wait_grace);
    if first.is_empty() {
        return Ok(());
    }
    info!(
        target: PROCESS_TARGET,
        remaining = first.len(),
        "descendants ignored SIGTERM, escalating"
    );
    let survivors = phase(Signal::SIGKILL, kill_grace);
    if survivors.is_empty() {
        return Ok(());
    }
    Err(RunnerError::Survivors {
        pids: survivors.iter().map(|pid| pid.as_raw()).collect(),
    })
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::plain("42 (sleep) S 7 42 42 0 -1", Some("7"))]
    #[case::spaces_in_name("43 (my prog) R 1 43 43", Some("1"))]
    #[case::paren_in_name("44 (a) b) S 9 44", Some("9"))]
    #[case::truncated("45 (x)", None)]
    fn parses_parent_pid(#[case] stat: &str, #[case] expected: Option<&str>) {
        assert_eq!(parent_of(stat), expected);
    }
}
