//! Merging a provider's `/usr` and its top-level library directories into
//! the container.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::PlanError;
use crate::plan::{MountPlan, MountPlanEntry};
use crate::sysroot::Sysroot;

#[cfg(test)]
mod tests;

const BIND_USR_TARGET: &str = "vessel_container::bind_usr";

/// Shape of a provider root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsrLayout {
    /// `usr` is a separate directory next to `bin`, `lib` and friends.
    Split,
    /// The provider root is itself the merged `/usr`.
    Merged,
}

/// Detects the layout of the provider at `provider_local`.
///
/// # Errors
///
/// Returns [`PlanError::Resolve`] when the provider root cannot be opened.
pub fn detect_layout(provider_local: &Path) -> Result<UsrLayout, PlanError> {
    Ok(layout_of(&Sysroot::open(provider_local)?))
}

fn layout_of(sysroot: &Sysroot) -> UsrLayout {
    if sysroot.is_dir("usr") {
        UsrLayout::Split
    } else {
        UsrLayout::Merged
    }
}

/// Builds the plan that exposes the provider's `/usr` below `mount_point`.
///
/// `provider_host` is the provider as the launcher sees it, while
/// `provider_local` is where this process can inspect it. They differ when
/// the supervisor itself runs inside a container.
///
/// `/etc` is not handled here.
///
/// # Errors
///
/// Returns [`PlanError`] when the provider cannot be opened or enumerated.
pub fn bind_usr(
    provider_host: &Path,
    provider_local: &Path,
    mount_point: &Path,
) -> Result<MountPlan, PlanError> {
    let sysroot = Sysroot::open(provider_local)?;
    let layout = layout_of(&sysroot);
    info!(
        target: BIND_USR_TARGET,
        provider = %provider_host.display(),
        mount_point = %mount_point.display(),
        ?layout,
        "binding provider /usr"
    );

    let mut plan = MountPlan::new();
    let usr_source = match layout {
        UsrLayout::Split => provider_host.join("usr"),
        UsrLayout::Merged => provider_host.to_path_buf(),
    };
    plan.push(MountPlanEntry::BindReadOnly {
        source: usr_source,
        path: mount_point.join("usr"),
    });

    for entry in WalkDir::new(provider_local)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|error| {
            let path = error
                .path()
                .map_or_else(|| provider_local.to_path_buf(), Path::to_path_buf);
            PlanError::io(path, "readdir", error.into())
        })?;
        let name = entry.file_name();
        if !is_usr_companion(name) {
            continue;
        }
        let path = mount_point.join(name);

        let planned = match layout {
            UsrLayout::Merged => MountPlanEntry::Symlink {
                target: Path::new("usr").join(name),
                path,
            },
            UsrLayout::Split if entry.path_is_symlink() => MountPlanEntry::Symlink {
                target: sysroot.read_link(name)?,
                path,
            },
            UsrLayout::Split => MountPlanEntry::BindReadOnly {
                source: provider_host.join(name),
                path,
            },
        };
        debug!(target: BIND_USR_TARGET, entry = %planned, "planned top-level entry");
        plan.push(planned);
    }

    Ok(plan)
}

/// `lib*` except `libexec`, plus `bin`, `sbin` and `.ref`.
fn is_usr_companion(name: &OsStr) -> bool {
    let name = name.as_bytes();
    (name.starts_with(b"lib") && name != b"libexec") || matches!(name, b"bin" | b"sbin" | b".ref")
}
