//! Ordered mount plans and their launcher argument form.
//!
//! A [`MountPlan`] is built incrementally, checked with
//! [`MountPlan::validate_order`] and consumed exactly once by
//! [`MountPlan::into_launcher_args`]. Entries that embed file descriptors own
//! them; the descriptors move with the entry into [`LauncherArgs`] and stay
//! open until the launcher has been spawned.

use std::ffi::OsString;
use std::fmt;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::{Path, PathBuf};

use rustix::io::FdFlags;
use tracing::debug;

use crate::error::PlanError;


const PLAN_TARGET: &str = "vessel_container::plan";

/// One operation performed by the launcher while building the container.
#[derive(Debug)]
pub enum MountPlanEntry {
    /// Create an empty directory.
    Directory {
        /// Container path.
        path: PathBuf,
    },
    /// Create a symbolic link.
    Symlink {
        /// Literal link target.
        target: PathBuf,
        /// Container path of the link.
        path: PathBuf,
    },
    /// Bind-mount a host path read-only.
    BindReadOnly {
        /// Host path.
        source: PathBuf,
        /// Container path.
        path: PathBuf,
    },
    /// Bind-mount a host path read-write.
    BindReadWrite {
        /// Host path.
        source: PathBuf,
        /// Container path.
        path: PathBuf,
    },
    /// Materialise the content readable from `fd` as a read-only file.
    BindDataReadOnly {
        /// Open descriptor supplying the content.
        fd: OwnedFd,
        /// Container path.
        path: PathBuf,
    },
    /// Bind-mount a host path with device access.
    DevBind {
        /// Host path.
        source: PathBuf,
        /// Container path.
        path: PathBuf,
    },
    /// Mount a fresh procfs.
    Proc {
        /// Container path.
        path: PathBuf,
    },
    /// Mount an empty tmpfs.
    Tmpfs {
        /// Container path.
        path: PathBuf,
    },
}

impl MountPlanEntry {
    /// Container path the entry creates or covers.
    #[must_use]
    pub fn destination(&self) -> &Path {
        match self {
            Self::Directory { path }
            | Self::Symlink { path, .. }
            | Self::BindReadOnly { path, .. }
            | Self::BindReadWrite { path, .. }
            | Self::BindDataReadOnly { path, .. }
            | Self::DevBind { path, .. }
            | Self::Proc { path }
            | Self::Tmpfs { path } => path,
        }
    }

    /// Returns true when entries below [`Self::destination`] depend on this one.
    #[must_use]
    pub const fn establishes_directory(&self) -> bool {
        !matches!(
            self,
            Self::Symlink { .. } | Self::BindDataReadOnly { .. }
        )
    }

    fn flag(&self) -> &'static str {
        match self {
            Self::Directory { .. } => "--dir",
            Self::Symlink { .. } => "--symlink",
            Self::BindReadOnly { .. } => "--ro-bind",
            Self::BindReadWrite { .. } => "--bind",
            Self::BindDataReadOnly { .. } => "--ro-bind-data",
            Self::DevBind { .. } => "--dev-bind",
            Self::Proc { .. } => "--proc",
            Self::Tmpfs { .. } => "--tmpfs",
        }
    }

    fn push_args(&self, args: &mut Vec<OsString>) {
        args.push(OsString::from(self.flag()));
        match self {
            Self::Symlink { target, .. } => args.push(target.clone().into_os_string()),
            Self::BindReadOnly { source, .. }
            | Self::BindReadWrite { source, .. }
            | Self::DevBind { source, .. } => args.push(source.clone().into_os_string()),
            Self::BindDataReadOnly { fd, .. } => {
                args.push(OsString::from(fd.as_raw_fd().to_string()));
            }
            Self::Directory { .. } | Self::Proc { .. } | Self::Tmpfs { .. } => {}
        }
        args.push(self.destination().as_os_str().to_os_string());
    }
}

impl fmt::Display for MountPlanEntry {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut args = Vec::with_capacity(3);
        self.push_args(&mut args);
        let rendered: Vec<_> = args.iter().map(|arg| arg.to_string_lossy()).collect();
        formatter.write_str(&rendered.join(" "))
    }
}

/// Ordered, move-only list of mount operations.
#[derive(Debug, Default)]
pub struct MountPlan {
    entries: Vec<MountPlanEntry>,
}

impl MountPlan {
    /// Creates an empty plan.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Appends an entry.
    ///
    /// A [`MountPlanEntry::Directory`] whose destination an earlier
    /// `Directory` already creates is dropped.
    pub fn push(&mut self, entry: MountPlanEntry) {
        if let MountPlanEntry::Directory { path } = &entry
            && self.entries.iter().any(|existing| {
                matches!(existing, MountPlanEntry::Directory { path: seen } if seen == path)
            })
        {
            debug!(target: PLAN_TARGET, path = %path.display(), "skipping duplicate directory");
            return;
        }
        self.entries.push(entry);
    }

    /// Appends every entry of `other`, taking ownership of its descriptors.
    pub fn extend(&mut self, other: Self) {
        for entry in other.entries {
            self.push(entry);
        }
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when the plan has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in launch order.
    #[must_use]
    pub fn entries(&self) -> &[MountPlanEntry] {
        &self.entries
    }

    /// Checks that nothing is placed below a directory before that directory
    /// is established.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::OrderViolation`] naming the first misplaced entry.
    pub fn validate_order(&self) -> Result<(), PlanError> {
        for (child_index, child) in self.entries.iter().enumerate() {
            let child_path = child.destination();
            let established_later = self
                .entries
                .iter()
                .enumerate()
                .skip(child_index + 1)
                .find(|(_, parent)| {
                    parent.establishes_directory()
                        && is_strictly_below(child_path, parent.destination())
                        && !self.established_before(parent.destination(), child_index)
                });
            if let Some((parent_index, parent)) = established_later {
                return Err(PlanError::OrderViolation {
                    child: child_path.to_path_buf(),
                    child_index,
                    parent: parent.destination().to_path_buf(),
                    parent_index,
                });
            }
        }
        Ok(())
    }

    fn established_before(&self, path: &Path, index: usize) -> bool {
        self.entries
            .iter()
            .take(index)
            .any(|entry| entry.establishes_directory() && entry.destination() == path)
    }

    /// Renders the launcher arguments without consuming the plan.
    ///
    /// Data entries render the raw descriptor number they currently own.
    #[must_use]
    pub fn describe(&self) -> Vec<OsString> {
        let mut args = Vec::with_capacity(self.entries.len() * 3);
        for entry in &self.entries {
            entry.push_args(&mut args);
        }
        args
    }

    /// Consumes the plan into launcher arguments plus the descriptors they
    /// reference.
    #[must_use]
    pub fn into_launcher_args(self) -> LauncherArgs {
        let args = self.describe();
        let fds = self
            .entries
            .into_iter()
            .filter_map(|entry| match entry {
                MountPlanEntry::BindDataReadOnly { fd, .. } => Some(fd),
                _ => None,
            })
            .collect();
        LauncherArgs { args, fds }
    }
}

impl FromIterator<MountPlanEntry> for MountPlan {
    fn from_iter<I: IntoIterator<Item = MountPlanEntry>>(iter: I) -> Self {
        let mut plan = Self::new();
        for entry in iter {
            plan.push(entry);
        }
        plan
    }
}

fn is_strictly_below(path: &Path, ancestor: &Path) -> bool {
    path != ancestor && path.starts_with(ancestor)
}

/// Launcher arguments together with the descriptors they name.
///
/// The descriptors must stay open until the launcher has started, so keep
/// this value alive across the spawn.
#[derive(Debug)]
pub struct LauncherArgs {
    args: Vec<OsString>,
    fds: Vec<OwnedFd>,
}

impl LauncherArgs {
    pub(crate) const fn from_parts(args: Vec<OsString>, fds: Vec<OwnedFd>) -> Self {
        Self { args, fds }
    }

    /// Launcher arguments.
    #[must_use]
    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    /// Descriptors referenced by the arguments.
    #[must_use]
    pub fn fds(&self) -> &[OwnedFd] {
        &self.fds
    }

    /// Clears close-on-exec on every referenced descriptor so the launcher
    /// inherits them.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::Io`] when the descriptor flags cannot be changed.
    pub fn prepare_inheritance(&self) -> Result<(), PlanError> {
        for fd in &self.fds {
            rustix::io::fcntl_setfd(fd, FdFlags::empty()).map_err(|errno| {
                PlanError::io(
                    format!("/proc/self/fd/{}", fd.as_raw_fd()),
                    "fcntl",
                    io::Error::from(errno),
                )
            })?;
        }
        Ok(())
    }

    /// Splits into arguments and descriptors.
    #[must_use]
    pub fn into_parts(self) -> (Vec<OsString>, Vec<OwnedFd>) {
        (self.args, self.fds)
    }
}
