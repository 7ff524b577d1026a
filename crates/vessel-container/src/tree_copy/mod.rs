//! Materialising a staged directory tree as read-only container content.

use std::path::Path;

use rustix::fs::{Mode, OFlags};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::PlanError;
use crate::plan::{MountPlan, MountPlanEntry};

#[cfg(test)]
mod tests;

const TREE_COPY_TARGET: &str = "vessel_container::tree_copy";

/// Emits one plan entry per object below `source_dir`.
///
/// `source_dir` must end with the components of `dest`: a tree staged at
/// `/tmp/stage/etc/ld.so.conf.d` maps onto `/etc/ld.so.conf.d`. Regular files
/// are opened now and embedded as descriptors, so the staging directory may
/// be removed before the plan is launched. Symlinks keep their literal
/// targets. Other file types are logged and skipped.
///
/// # Errors
///
/// - [`PlanError::RelativeDestination`] when `dest` is not absolute.
/// - [`PlanError::SuffixMismatch`] when `source_dir` does not end with `dest`.
/// - [`PlanError::NotADirectory`] when `source_dir` is not a directory.
/// - [`PlanError::Io`] when the walk itself fails.
pub fn copy_tree(source_dir: &Path, dest: &Path) -> Result<MountPlan, PlanError> {
    let Ok(suffix) = dest.strip_prefix("/") else {
        return Err(PlanError::RelativeDestination(dest.to_path_buf()));
    };
    if !source_dir.ends_with(suffix) {
        return Err(PlanError::SuffixMismatch {
            source_dir: source_dir.to_path_buf(),
            dest: dest.to_path_buf(),
        });
    }
    let metadata = std::fs::symlink_metadata(source_dir)
        .map_err(|error| PlanError::io(source_dir, "lstat", error))?;
    if !metadata.is_dir() {
        return Err(PlanError::NotADirectory(source_dir.to_path_buf()));
    }

    let mut plan = MountPlan::new();
    let walker = WalkDir::new(source_dir)
        .follow_links(false)
        .sort_by_file_name();
    for entry in walker {
        let entry = entry.map_err(|error| {
            let path = error
                .path()
                .map_or_else(|| source_dir.to_path_buf(), Path::to_path_buf);
            PlanError::io(path, "readdir", error.into())
        })?;
        let Ok(relative) = entry.path().strip_prefix(source_dir) else {
            continue;
        };
        // Joining an empty path would leave a trailing slash on the root.
        let path = if relative.as_os_str().is_empty() {
            dest.to_path_buf()
        } else {
            dest.join(relative)
        };
        let file_type = entry.file_type();

        if file_type.is_dir() {
            plan.push(MountPlanEntry::Directory { path });
        } else if file_type.is_symlink() {
            let target = std::fs::read_link(entry.path())
                .map_err(|error| PlanError::io(entry.path(), "readlink", error))?;
            plan.push(MountPlanEntry::Symlink { target, path });
        } else if file_type.is_file() {
            match rustix::fs::open(
                entry.path(),
                OFlags::RDONLY | OFlags::CLOEXEC | OFlags::NOFOLLOW | OFlags::NOCTTY,
                Mode::empty(),
            ) {
                Ok(fd) => plan.push(MountPlanEntry::BindDataReadOnly { fd, path }),
                Err(errno) => warn!(
                    target: TREE_COPY_TARGET,
                    file = %entry.path().display(),
                    error = %errno,
                    "cannot open staged file, skipping"
                ),
            }
        } else {
            warn!(
                target: TREE_COPY_TARGET,
                file = %entry.path().display(),
                "unsupported file type in staged tree, skipping"
            );
        }
    }

    debug!(
        target: TREE_COPY_TARGET,
        source = %source_dir.display(),
        dest = %dest.display(),
        entries = plan.len(),
        "staged tree planned"
    );
    Ok(plan)
}
