//! Locating `bwrap` and assembling its complete command line.

use std::env;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use rustix::fs::Access;
use tracing::{debug, info};
use vessel_config::FALLBACK_BWRAP;

use crate::error::PlanError;
use crate::plan::{LauncherArgs, MountPlan};

const LAUNCHER_TARGET: &str = "vessel_container::launcher";
const PROGRAM_NAME: &str = "bwrap";

/// Flags passed to every launch before the mount plan.
pub const DEFAULT_FLAGS: &[&str] = &["--die-with-parent"];

/// The external sandbox launcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launcher {
    program: PathBuf,
    flags: Vec<OsString>,
}

impl Launcher {
    /// Wraps an explicit launcher program with the default flags.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            flags: DEFAULT_FLAGS.iter().map(OsString::from).collect(),
        }
    }

    /// Finds the launcher: `configured` if given, else `bwrap` on `PATH`,
    /// else the fallback location.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::LauncherNotFound`] when nothing executable is
    /// found.
    pub fn locate(configured: Option<&Path>) -> Result<Self, PlanError> {
        if let Some(program) = configured {
            debug!(target: LAUNCHER_TARGET, program = %program.display(), "using configured launcher");
            return Ok(Self::new(program));
        }
        let search = env::var_os("PATH").unwrap_or_default();
        let fallback = Path::new(FALLBACK_BWRAP);
        let program = search_path(&search, PROGRAM_NAME)
            .or_else(|| is_executable(fallback).then(|| fallback.to_path_buf()))
            .ok_or_else(|| PlanError::LauncherNotFound {
                fallback: fallback.to_path_buf(),
            })?;
        info!(target: LAUNCHER_TARGET, program = %program.display(), "located launcher");
        Ok(Self::new(program))
    }

    /// Adds an extra flag before the mount plan.
    #[must_use]
    pub fn with_flag(mut self, flag: impl Into<OsString>) -> Self {
        self.flags.push(flag.into());
        self
    }

    /// Launcher program.
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Builds `program flags... plan... -- command...`.
    ///
    /// The first argument of the result is the program itself. Descriptors
    /// owned by the plan move into the result.
    #[must_use]
    pub fn command_line(&self, plan: MountPlan, command: &[OsString]) -> LauncherArgs {
        let (plan_args, fds) = plan.into_launcher_args().into_parts();
        let mut argv = Vec::with_capacity(plan_args.len() + command.len() + self.flags.len() + 2);
        argv.push(self.program.clone().into_os_string());
        argv.extend(self.flags.iter().cloned());
        argv.extend(plan_args);
        argv.push(OsString::from("--"));
        argv.extend(command.iter().cloned());
        LauncherArgs::from_parts(argv, fds)
    }
}

/// Returns the first executable `name` in a `PATH`-style list.
#[must_use]
pub fn search_path(search: &OsStr, name: &str) -> Option<PathBuf> {
    env::split_paths(search)
        .filter(|dir| dir.is_absolute())
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    path.is_file() && rustix::fs::access(path, Access::EXEC_OK).is_ok()
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    use tempfile::TempDir;

    use super::*;
    use crate::plan::MountPlanEntry;

    fn install(dir: &Path, name: &str, mode: u32) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, "#!/bin/sh\n").expect("write program");
        fs::set_permissions(&path, fs::Permissions::from_mode(mode)).expect("chmod");
        path
    }

    #[test]
    fn search_path_skips_non_executables_and_relative_entries() {
        let first = TempDir::new().expect("temp dir");
        let second = TempDir::new().expect("temp dir");
        install(first.path(), "bwrap", 0o644);
        let expected = install(second.path(), "bwrap", 0o755);

        let search =
            env::join_paths([Path::new("relative/dir"), first.path(), second.path()]).expect("join");

        assert_eq!(search_path(&search, "bwrap"), Some(expected));
    }

    #[test]
    fn search_path_returns_none_when_absent() {
        let empty = TempDir::new().expect("temp dir");
        assert_eq!(search_path(empty.path().as_os_str(), "bwrap"), None);
    }

    #[test]
    fn configured_program_wins() {
        let launcher = Launcher::locate(Some(Path::new("/opt/bwrap"))).expect("configured");
        assert_eq!(launcher.program(), Path::new("/opt/bwrap"));
    }

    #[test]
    fn command_line_places_plan_between_flags_and_command() {
        let plan: MountPlan = [MountPlanEntry::Proc {
            path: PathBuf::from("/proc"),
        }]
        .into_iter()
        .collect();
        let command = [OsString::from("sh"), OsString::from("-c"), OsString::from("true")];

        let launcher = Launcher::new("/usr/bin/bwrap").with_flag("--unshare-pid");
        let argv = launcher.command_line(plan, &command);

        let rendered: Vec<_> = argv
            .args()
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            rendered,
            [
                "/usr/bin/bwrap",
                "--die-with-parent",
                "--unshare-pid",
                "--proc",
                "/proc",
                "--",
                "sh",
                "-c",
                "true",
            ]
        );
        assert!(argv.fds().is_empty());
    }
}
