//! Domain errors raised while resolving paths and assembling mount plans.
//!
//! Resolution failures are non-fatal to plan construction: callers inspect
//! [`ResolveError::is_not_found`] and friends to fall back instead of
//! aborting. I/O errors are wrapped in `Arc` to keep the enums cheap to move.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use rustix::io::Errno;
use thiserror::Error;

/// File type a resolution was required to end on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedType {
    /// A directory.
    Directory,
    /// A regular file.
    Regular,
    /// A symbolic link.
    Symlink,
}

/// Errors raised while walking a path inside a sysroot.
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    /// A segment was missing and directory creation was not requested.
    #[error("{path} does not exist below {root}")]
    NotFound {
        /// Sysroot the walk started from.
        root: PathBuf,
        /// Path relative to the sysroot, up to the missing segment.
        path: PathBuf,
    },

    /// A non-final segment could not be traversed.
    #[error("{path} below {root} is not a directory")]
    NotADirectory {
        /// Sysroot the walk started from.
        root: PathBuf,
        /// Path relative to the sysroot, up to the offending segment.
        path: PathBuf,
    },

    /// The final segment had the wrong type.
    #[error("{path} below {root} is not a {expected:?}")]
    WrongType {
        /// Sysroot the walk started from.
        root: PathBuf,
        /// Canonical path relative to the sysroot.
        path: PathBuf,
        /// Type that was required.
        expected: ExpectedType,
    },

    /// A symlink was found while symlinks were rejected, or the substitution
    /// limit was exceeded.
    #[error("too many levels of symbolic links at {path} below {root} (limit {limit})")]
    TooManySymlinks {
        /// Sysroot the walk started from.
        root: PathBuf,
        /// Path relative to the sysroot, up to the symlink.
        path: PathBuf,
        /// Number of substitutions allowed; zero when symlinks are rejected.
        limit: u32,
    },

    /// Access to a segment was refused.
    #[error("permission denied at {path} below {root}")]
    PermissionDenied {
        /// Sysroot the walk started from.
        root: PathBuf,
        /// Path relative to the sysroot, up to the refused segment.
        path: PathBuf,
    },

    /// Any other system call failure.
    #[error("{operation} failed at {path} below {root}: {source}")]
    Io {
        /// Sysroot the walk started from.
        root: PathBuf,
        /// Path relative to the sysroot.
        path: PathBuf,
        /// System call that failed.
        operation: &'static str,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
}

impl ResolveError {
    pub(crate) fn from_errno(
        errno: Errno,
        root: PathBuf,
        path: PathBuf,
        operation: &'static str,
    ) -> Self {
        match errno {
            Errno::NOENT => Self::NotFound { root, path },
            Errno::NOTDIR => Self::NotADirectory { root, path },
            Errno::ACCESS | Errno::PERM => Self::PermissionDenied { root, path },
            other => Self::Io {
                root,
                path,
                operation,
                source: Arc::new(io::Error::from(other)),
            },
        }
    }

    /// Returns true when the error means the path simply is not there.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true when the path exists but is not what the caller wanted.
    #[must_use]
    pub const fn is_wrong_type(&self) -> bool {
        matches!(self, Self::WrongType { .. } | Self::NotADirectory { .. })
    }
}

/// Errors raised while building or consuming a mount plan.
#[derive(Debug, Clone, Error)]
pub enum PlanError {
    /// The provider or a probed location could not be resolved.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// A host directory could not be enumerated or read.
    #[error("{operation} failed for {path}: {source}")]
    Io {
        /// Host path involved.
        path: PathBuf,
        /// Operation that failed.
        operation: &'static str,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The staged tree does not end with the requested container path.
    #[error("{source_dir} does not end with container path {dest}")]
    SuffixMismatch {
        /// Staging directory on the host.
        source_dir: PathBuf,
        /// Requested container destination.
        dest: PathBuf,
    },

    /// A container destination was not absolute.
    #[error("container path {0} must be absolute")]
    RelativeDestination(PathBuf),

    /// The root of a staged tree is not a directory.
    #[error("{0} is not a directory")]
    NotADirectory(PathBuf),

    /// An entry was placed before the entry that creates its parent.
    #[error("{child} (entry {child_index}) precedes its parent {parent} (entry {parent_index})")]
    OrderViolation {
        /// Destination of the misplaced entry.
        child: PathBuf,
        /// Position of the misplaced entry.
        child_index: usize,
        /// Destination of the establishing entry.
        parent: PathBuf,
        /// Position of the establishing entry.
        parent_index: usize,
    },

    /// No launcher program could be found.
    #[error("bwrap not found on PATH or at {fallback}")]
    LauncherNotFound {
        /// Last location that was checked.
        fallback: PathBuf,
    },
}

impl PlanError {
    pub(crate) fn io(path: impl Into<PathBuf>, operation: &'static str, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            operation,
            source: Arc::new(source),
        }
    }
}
