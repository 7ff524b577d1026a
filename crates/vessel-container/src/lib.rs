//! Container layout planning for the `vessel` launcher.
//!
//! The crate never mounts anything itself. It inspects provider and host
//! trees through [`Sysroot`], which resolves paths without ever escaping its
//! root, and records the operations the external `bwrap` launcher should
//! perform as an ordered [`MountPlan`]:
//!
//! - [`bind_usr`] exposes a provider's `/usr` and its top-level `lib*`,
//!   `bin` and `sbin` companions below a mount point.
//! - [`copy_tree`] turns a staged directory into directories, symlinks and
//!   descriptor-backed files.
//! - [`api_filesystems`] adds `/dev`, `/proc`, `/sys` and `/run/shm`.
//! - [`Launcher`] renders the finished plan into a complete command line.

mod api;
mod bind_usr;
mod error;
mod launcher;
mod plan;
mod sysroot;
mod tree_copy;

#[cfg(test)]
mod tests;

pub use api::api_filesystems;
pub use bind_usr::{UsrLayout, bind_usr, detect_layout};
pub use error::{ExpectedType, PlanError, ResolveError};
pub use launcher::{DEFAULT_FLAGS, Launcher, search_path};
pub use plan::{LauncherArgs, MountPlan, MountPlanEntry};
pub use sysroot::{EntryType, ResolveFlags, ResolvedPath, Sysroot, resolve_in_sysroot};
pub use tree_copy::copy_tree;
