//! Kernel API filesystems every container needs.

use std::path::{Path, PathBuf};

use tracing::debug;
use vessel_config::SysfsMode;

use crate::plan::{MountPlan, MountPlanEntry};
use crate::sysroot::{ResolveFlags, Sysroot};

const API_TARGET: &str = "vessel_container::api";

/// Plans `/dev`, `/proc`, `/sys` and the `/run/shm` compatibility path.
///
/// Sources are taken from `host`, which is normally the real root. `/sys` is
/// bound read-write only when `sysfs` allows it. When the host's `/dev/shm`
/// is a symlink that lands on a real `/run/shm` directory, that directory is
/// bound; otherwise an empty `/run/shm` is created so the link still has a
/// destination inside the container.
#[must_use]
pub fn api_filesystems(host: &Sysroot, sysfs: SysfsMode) -> MountPlan {
    let mut plan = MountPlan::new();
    plan.push(MountPlanEntry::DevBind {
        source: host.path().join("dev"),
        path: PathBuf::from("/dev"),
    });
    plan.push(MountPlanEntry::Proc {
        path: PathBuf::from("/proc"),
    });
    let sys_source = host.path().join("sys");
    let sys_path = PathBuf::from("/sys");
    plan.push(if sysfs.is_writable() {
        MountPlanEntry::BindReadWrite {
            source: sys_source,
            path: sys_path,
        }
    } else {
        MountPlanEntry::BindReadOnly {
            source: sys_source,
            path: sys_path,
        }
    });

    let shm = shared_memory_dir(host);
    debug!(target: API_TARGET, bound = shm.is_some(), "planned /run/shm");
    plan.push(match shm {
        Some(source) => MountPlanEntry::BindReadWrite {
            source,
            path: PathBuf::from("/run/shm"),
        },
        None => MountPlanEntry::Directory {
            path: PathBuf::from("/run/shm"),
        },
    });
    plan
}

fn shared_memory_dir(host: &Sysroot) -> Option<PathBuf> {
    if !host.is_symlink("dev/shm") {
        return None;
    }
    let resolved = host
        .resolve("dev/shm", ResolveFlags::MUST_BE_DIRECTORY)
        .ok()?;
    (resolved.path() == Path::new("run/shm")).then(|| host.host_path(&resolved))
}
