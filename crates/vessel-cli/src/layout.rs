//! Assembles the mount plan for a command-line layout.

use tracing::info;
use vessel_config::Config;
use vessel_container::{MountPlan, Sysroot, api_filesystems, bind_usr, copy_tree};

use crate::cli::LayoutArgs;
use crate::errors::AppError;

const LAYOUT_TARGET: &str = "vessel_cli::layout";

/// Plans API filesystems, the provider's `/usr` and every overlay, in that
/// order, and checks the result is correctly ordered.
pub(crate) fn build_plan(layout: &LayoutArgs, config: &Config) -> Result<MountPlan, AppError> {
    let host = Sysroot::open("/")?.with_symlink_limit(config.symlink_limit());
    let mut plan = api_filesystems(&host, config.sysfs());
    plan.extend(bind_usr(
        &layout.provider,
        layout.provider_local(),
        &layout.mount_point,
    )?);
    for overlay in &layout.overlays {
        plan.extend(copy_tree(&overlay.source, &overlay.dest)?);
    }
    plan.validate_order()?;
    info!(
        target: LAYOUT_TARGET,
        provider = %layout.provider.display(),
        overlays = layout.overlays.len(),
        entries = plan.len(),
        "mount plan ready"
    );
    Ok(plan)
}
