//! Step-by-step path resolution confined to a sysroot.
//!
//! [`resolve_in_sysroot`] walks a path one segment at a time relative to a
//! root directory descriptor. Every segment is opened with
//! `O_PATH | O_NOFOLLOW`, so a symlink is opened as itself and then
//! substituted by hand: absolute targets restart from the root, relative
//! targets continue from the directory holding the link. `..` never climbs
//! above the root, mirroring what the kernel does after `chroot`.
//!
//! Only one descriptor below the root is held at a time. Moving to a child or
//! to a parent replaces it, so the number of open handles does not grow with
//! the depth of the path.

use std::collections::VecDeque;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};

use rustix::fs::{CWD, FileType, Mode, OFlags};
use rustix::io::Errno;
use tracing::debug;

use vessel_config::DEFAULT_SYMLINK_LIMIT;

use crate::error::{ExpectedType, ResolveError};

#[cfg(test)]
mod tests;

const RESOLVE_TARGET: &str = "vessel_container::sysroot";

/// Permissions given to directories created by [`ResolveFlags::MKDIR_P`].
const MKDIR_MODE: u32 = 0o755;

/// Options controlling [`resolve_in_sysroot`].
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveFlags(u8);

impl ResolveFlags {
    /// Plain resolution: follow every symlink, accept any final type.
    pub const NONE: Self = Self(0);
    /// Create missing segments as directories.
    pub const MKDIR_P: Self = Self(1 << 0);
    /// Do not dereference the final segment when it is a symlink.
    pub const KEEP_FINAL_SYMLINK: Self = Self(1 << 1);
    /// Fail if any segment, including the last, is a symlink.
    pub const REJECT_SYMLINKS: Self = Self(1 << 2);
    /// Fail unless the result is a directory.
    pub const MUST_BE_DIRECTORY: Self = Self(1 << 3);
    /// Fail unless the result is a regular file.
    pub const MUST_BE_REGULAR: Self = Self(1 << 4);
    /// Reopen the result with read access instead of a location-only handle.
    pub const READABLE: Self = Self(1 << 5);
    /// Reopen the result for reading and writing. Directories cannot be
    /// reopened this way and fail with `EISDIR`.
    pub const WRITABLE: Self = Self(1 << 6);

    /// Returns true when every flag in `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns the union of both flag sets.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl BitOr for ResolveFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for ResolveFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }
}

const FLAG_NAMES: [(ResolveFlags, &str); 7] = [
    (ResolveFlags::MKDIR_P, "MKDIR_P"),
    (ResolveFlags::KEEP_FINAL_SYMLINK, "KEEP_FINAL_SYMLINK"),
    (ResolveFlags::REJECT_SYMLINKS, "REJECT_SYMLINKS"),
    (ResolveFlags::MUST_BE_DIRECTORY, "MUST_BE_DIRECTORY"),
    (ResolveFlags::MUST_BE_REGULAR, "MUST_BE_REGULAR"),
    (ResolveFlags::READABLE, "READABLE"),
    (ResolveFlags::WRITABLE, "WRITABLE"),
];

impl fmt::Debug for ResolveFlags {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let set: Vec<&str> = FLAG_NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if set.is_empty() {
            formatter.write_str("NONE")
        } else {
            formatter.write_str(&set.join(" | "))
        }
    }
}

/// Coarse type of a resolved location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    /// A directory.
    Directory,
    /// A regular file.
    Regular,
    /// A symbolic link, only returned with [`ResolveFlags::KEEP_FINAL_SYMLINK`].
    Symlink,
    /// Devices, sockets and FIFOs.
    Other,
}

impl From<FileType> for EntryType {
    fn from(file_type: FileType) -> Self {
        match file_type {
            FileType::Directory => Self::Directory,
            FileType::RegularFile => Self::Regular,
            FileType::Symlink => Self::Symlink,
            _ => Self::Other,
        }
    }
}

/// Result of a successful resolution.
///
/// The descriptor is `O_PATH`-like unless [`ResolveFlags::READABLE`] or
/// [`ResolveFlags::WRITABLE`] was requested. It always denotes a location
/// inside the sysroot.
#[derive(Debug)]
pub struct ResolvedPath {
    fd: OwnedFd,
    path: PathBuf,
    entry_type: EntryType,
}

impl ResolvedPath {
    /// Borrows the resolved descriptor.
    #[must_use]
    pub fn fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }

    /// Takes ownership of the resolved descriptor.
    #[must_use]
    pub fn into_fd(self) -> OwnedFd {
        self.fd
    }

    /// Canonical path relative to the sysroot, without a leading slash.
    ///
    /// The sysroot itself resolves to the empty path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Type of the resolved location.
    #[must_use]
    pub const fn entry_type(&self) -> EntryType {
        self.entry_type
    }
}

/// A directory used as the root for [`resolve_in_sysroot`].
#[derive(Debug)]
pub struct Sysroot {
    path: PathBuf,
    fd: OwnedFd,
    symlink_limit: u32,
}

impl Sysroot {
    /// Opens `path` as a sysroot.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] when `path` is missing or not a directory.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ResolveError> {
        let path = path.into();
        let fd = rustix::fs::openat(
            CWD,
            path.as_path(),
            OFlags::PATH | OFlags::DIRECTORY | OFlags::CLOEXEC,
            Mode::empty(),
        )
        .map_err(|errno| ResolveError::from_errno(errno, path.clone(), PathBuf::new(), "open"))?;
        Ok(Self {
            path,
            fd,
            symlink_limit: DEFAULT_SYMLINK_LIMIT,
        })
    }

    /// Overrides the symlink substitution limit used by [`Sysroot::resolve`].
    #[must_use]
    pub const fn with_symlink_limit(mut self, limit: u32) -> Self {
        self.symlink_limit = limit;
        self
    }

    /// Host path of the sysroot.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Host path of a location previously resolved inside this sysroot.
    #[must_use]
    pub fn host_path(&self, resolved: &ResolvedPath) -> PathBuf {
        self.path.join(resolved.path())
    }

    /// Resolves `descendant` inside this sysroot.
    ///
    /// # Errors
    ///
    /// See [`resolve_in_sysroot`].
    pub fn resolve(
        &self,
        descendant: impl AsRef<Path>,
        flags: ResolveFlags,
    ) -> Result<ResolvedPath, ResolveError> {
        resolve_in_sysroot(
            self.fd.as_fd(),
            &self.path,
            descendant.as_ref(),
            flags,
            self.symlink_limit,
        )
    }

    /// Returns true when `descendant` resolves to anything.
    #[must_use]
    pub fn exists(&self, descendant: impl AsRef<Path>) -> bool {
        self.resolve(descendant, ResolveFlags::NONE).is_ok()
    }

    /// Returns true when `descendant` resolves to a directory.
    #[must_use]
    pub fn is_dir(&self, descendant: impl AsRef<Path>) -> bool {
        self.resolve(descendant, ResolveFlags::MUST_BE_DIRECTORY)
            .is_ok()
    }

    /// Returns true when the final segment of `descendant` is a symlink.
    #[must_use]
    pub fn is_symlink(&self, descendant: impl AsRef<Path>) -> bool {
        self.resolve(descendant, ResolveFlags::KEEP_FINAL_SYMLINK)
            .is_ok_and(|resolved| resolved.entry_type() == EntryType::Symlink)
    }

    /// Reads the literal target of the symlink at `descendant`.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::WrongType`] when the final segment is not a
    /// symlink, or any resolution error on the way there.
    pub fn read_link(&self, descendant: impl AsRef<Path>) -> Result<PathBuf, ResolveError> {
        let resolved = self.resolve(descendant, ResolveFlags::KEEP_FINAL_SYMLINK)?;
        if resolved.entry_type() != EntryType::Symlink {
            return Err(ResolveError::WrongType {
                root: self.path.clone(),
                path: resolved.path,
                expected: ExpectedType::Symlink,
            });
        }
        let target = rustix::fs::readlinkat(resolved.fd(), "", Vec::new()).map_err(|errno| {
            ResolveError::from_errno(errno, self.path.clone(), resolved.path.clone(), "readlinkat")
        })?;
        Ok(PathBuf::from(OsString::from_vec(target.into_bytes())))
    }
}

impl AsFd for Sysroot {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

/// Resolves `descendant` relative to `root` without ever leaving it.
///
/// `root_path` is only used to make error messages readable. Leading slashes
/// in `descendant` are ignored, so absolute and relative spellings resolve
/// identically.
///
/// # Errors
///
/// - [`ResolveError::NotFound`] when a segment is missing and
///   [`ResolveFlags::MKDIR_P`] is not set.
/// - [`ResolveError::NotADirectory`] when a non-final segment is not a
///   directory.
/// - [`ResolveError::TooManySymlinks`] when [`ResolveFlags::REJECT_SYMLINKS`]
///   is set and a symlink is met, or more than `symlink_limit` substitutions
///   were needed.
/// - [`ResolveError::WrongType`] when a final type check fails.
pub fn resolve_in_sysroot(
    root: BorrowedFd<'_>,
    root_path: &Path,
    descendant: &Path,
    flags: ResolveFlags,
    symlink_limit: u32,
) -> Result<ResolvedPath, ResolveError> {
    let mut walk = Walk {
        root,
        root_path,
        flags,
        symlink_limit,
        cursor: Cursor::Root,
        canonical: Vec::new(),
        pending: segments(descendant.as_os_str()).collect(),
        substitutions: 0,
    };
    walk.run()?;
    walk.finish()
}

enum Cursor {
    Root,
    Descendant(OwnedFd),
}

struct Walk<'a> {
    root: BorrowedFd<'a>,
    root_path: &'a Path,
    flags: ResolveFlags,
    symlink_limit: u32,
    cursor: Cursor,
    canonical: Vec<OsString>,
    pending: VecDeque<OsString>,
    substitutions: u32,
}

enum Step {
    Continue,
    Stop,
}

impl Walk<'_> {
    fn current(&self) -> BorrowedFd<'_> {
        match &self.cursor {
            Cursor::Root => self.root,
            Cursor::Descendant(fd) => fd.as_fd(),
        }
    }

    fn canonical_path(&self) -> PathBuf {
        self.canonical.iter().collect()
    }

    fn path_with(&self, segment: &OsStr) -> PathBuf {
        let mut path = self.canonical_path();
        path.push(segment);
        path
    }

    fn error(&self, errno: Errno, path: PathBuf, operation: &'static str) -> ResolveError {
        ResolveError::from_errno(errno, self.root_path.to_path_buf(), path, operation)
    }

    fn run(&mut self) -> Result<(), ResolveError> {
        while let Some(segment) = self.pending.pop_front() {
            if segment.as_bytes() == b".." {
                self.ascend()?;
                continue;
            }
            if let Step::Stop = self.descend(&segment)? {
                break;
            }
        }
        Ok(())
    }

    fn ascend(&mut self) -> Result<(), ResolveError> {
        if self.canonical.pop().is_none() {
            // Already at the root: clamp.
            return Ok(());
        }
        if self.canonical.is_empty() {
            self.cursor = Cursor::Root;
            return Ok(());
        }
        let parent = rustix::fs::openat(
            self.current(),
            "..",
            OFlags::PATH | OFlags::DIRECTORY | OFlags::CLOEXEC,
            Mode::empty(),
        )
        .map_err(|errno| self.error(errno, self.canonical_path(), "openat"))?;
        self.cursor = Cursor::Descendant(parent);
        Ok(())
    }

    fn open_segment(&self, segment: &OsStr) -> Result<OwnedFd, ResolveError> {
        let open = || {
            rustix::fs::openat(
                self.current(),
                segment,
                OFlags::PATH | OFlags::NOFOLLOW | OFlags::CLOEXEC,
                Mode::empty(),
            )
        };
        match open() {
            Ok(fd) => Ok(fd),
            Err(Errno::NOENT) if self.flags.contains(ResolveFlags::MKDIR_P) => {
                match rustix::fs::mkdirat(self.current(), segment, Mode::from_raw_mode(MKDIR_MODE))
                {
                    Ok(()) | Err(Errno::EXIST) => {}
                    Err(errno) => return Err(self.error(errno, self.path_with(segment), "mkdirat")),
                }
                debug!(
                    target: RESOLVE_TARGET,
                    root = %self.root_path.display(),
                    path = %self.path_with(segment).display(),
                    "created missing directory"
                );
                open().map_err(|errno| self.error(errno, self.path_with(segment), "openat"))
            }
            Err(errno) => Err(self.error(errno, self.path_with(segment), "openat")),
        }
    }

    fn descend(&mut self, segment: &OsStr) -> Result<Step, ResolveError> {
        let is_final = self.pending.is_empty();
        let fd = self.open_segment(segment)?;
        let file_type = file_type_of(&fd)
            .map_err(|errno| self.error(errno, self.path_with(segment), "fstat"))?;

        if file_type == FileType::Symlink {
            if self.flags.contains(ResolveFlags::REJECT_SYMLINKS) {
                return Err(ResolveError::TooManySymlinks {
                    root: self.root_path.to_path_buf(),
                    path: self.path_with(segment),
                    limit: 0,
                });
            }
            if is_final && self.flags.contains(ResolveFlags::KEEP_FINAL_SYMLINK) {
                self.canonical.push(segment.to_os_string());
                self.cursor = Cursor::Descendant(fd);
                return Ok(Step::Stop);
            }
            self.substitute(segment, &fd)?;
            return Ok(Step::Continue);
        }

        if !is_final && file_type != FileType::Directory {
            return Err(ResolveError::NotADirectory {
                root: self.root_path.to_path_buf(),
                path: self.path_with(segment),
            });
        }

        self.canonical.push(segment.to_os_string());
        self.cursor = Cursor::Descendant(fd);
        Ok(Step::Continue)
    }

    fn substitute(&mut self, segment: &OsStr, link: &OwnedFd) -> Result<(), ResolveError> {
        self.substitutions += 1;
        if self.substitutions > self.symlink_limit {
            return Err(ResolveError::TooManySymlinks {
                root: self.root_path.to_path_buf(),
                path: self.path_with(segment),
                limit: self.symlink_limit,
            });
        }

        let target = rustix::fs::readlinkat(link, "", Vec::new())
            .map_err(|errno| self.error(errno, self.path_with(segment), "readlinkat"))?;
        let target = OsString::from_vec(target.into_bytes());
        debug!(
            target: RESOLVE_TARGET,
            root = %self.root_path.display(),
            link = %self.path_with(segment).display(),
            target = %Path::new(&target).display(),
            "following symlink"
        );

        if target.as_bytes().first() == Some(&b'/') {
            self.cursor = Cursor::Root;
            self.canonical.clear();
        }
        for part in segments(&target).collect::<Vec<_>>().into_iter().rev() {
            self.pending.push_front(part);
        }
        Ok(())
    }

    fn finish(self) -> Result<ResolvedPath, ResolveError> {
        let Self {
            root,
            root_path,
            flags,
            cursor,
            canonical,
            ..
        } = self;
        let path: PathBuf = canonical.iter().collect();
        let fail = |errno: Errno, operation: &'static str| {
            ResolveError::from_errno(errno, root_path.to_path_buf(), path.clone(), operation)
        };

        let fd = match cursor {
            Cursor::Root => rustix::io::fcntl_dupfd_cloexec(root, 0).map_err(|errno| fail(errno, "dup"))?,
            Cursor::Descendant(fd) => fd,
        };
        let entry_type = EntryType::from(file_type_of(&fd).map_err(|errno| fail(errno, "fstat"))?);

        let expected = if flags.contains(ResolveFlags::MUST_BE_DIRECTORY) {
            Some(ExpectedType::Directory)
        } else if flags.contains(ResolveFlags::MUST_BE_REGULAR) {
            Some(ExpectedType::Regular)
        } else {
            None
        };
        let mismatch = match expected {
            Some(ExpectedType::Directory) => entry_type != EntryType::Directory,
            Some(ExpectedType::Regular) => entry_type != EntryType::Regular,
            Some(ExpectedType::Symlink) => entry_type != EntryType::Symlink,
            None => false,
        };
        if let Some(expected) = expected
            && mismatch
        {
            return Err(ResolveError::WrongType {
                root: root_path.to_path_buf(),
                path,
                expected,
            });
        }

        let access = if flags.contains(ResolveFlags::WRITABLE) {
            Some(OFlags::RDWR)
        } else if flags.contains(ResolveFlags::READABLE) {
            Some(OFlags::RDONLY)
        } else {
            None
        };
        let fd = match access {
            // Reopening through /proc would follow the link we were asked to keep.
            Some(_) if entry_type == EntryType::Symlink => {
                return Err(ResolveError::TooManySymlinks {
                    root: root_path.to_path_buf(),
                    path,
                    limit: 0,
                });
            }
            Some(access) => reopen(&fd, access, entry_type == EntryType::Directory)
                .map_err(|errno| fail(errno, "open"))?,
            None => fd,
        };

        Ok(ResolvedPath {
            fd,
            path,
            entry_type,
        })
    }
}

/// Splits on `/`, dropping empty and `.` segments. `..` is kept.
fn segments(path: &OsStr) -> impl Iterator<Item = OsString> + '_ {
    path.as_bytes()
        .split(|byte| *byte == b'/')
        .filter(|part| !part.is_empty() && *part != b".")
        .map(|part| OsString::from_vec(part.to_vec()))
}

fn file_type_of(fd: &OwnedFd) -> Result<FileType, Errno> {
    let stat = rustix::fs::fstat(fd)?;
    Ok(FileType::from_raw_mode(stat.st_mode))
}

/// Turns a location-only handle into one opened with `access`.
fn reopen(fd: &OwnedFd, access: OFlags, directory: bool) -> Result<OwnedFd, Errno> {
    let proc_path = format!("/proc/self/fd/{}", fd.as_raw_fd());
    let mut oflags = access | OFlags::CLOEXEC | OFlags::NOCTTY;
    if directory {
        oflags |= OFlags::DIRECTORY;
    }
    rustix::fs::openat(CWD, proc_path.as_str(), oflags, Mode::empty())
}
