use std::time::Duration;

use crate::{LogFormat, SysfsMode};

/// Default log filter expression used by the binary.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Conventional cap on symlink substitutions during sysroot resolution.
pub const DEFAULT_SYMLINK_LIMIT: u32 = 40;

/// Grace period granted to descendants after `SIGTERM`.
pub const DEFAULT_TERMINATE_WAIT: Duration = Duration::from_secs(2);

/// Grace period granted to descendants after `SIGKILL`.
pub const DEFAULT_TERMINATE_KILL: Duration = Duration::from_secs(1);

/// Container path under which the provider's `/usr` is assembled.
pub const DEFAULT_MOUNT_POINT: &str = "/run/host";

/// Fallback location of the launcher when it is not on `PATH`.
pub const FALLBACK_BWRAP: &str = "/usr/bin/bwrap";

/// Log filter applied when no layer sets one.
#[must_use]
pub const fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Log format applied when no layer sets one.
#[must_use]
pub const fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// `/sys` access applied when no layer sets one.
#[must_use]
pub const fn default_sysfs_mode() -> SysfsMode {
    SysfsMode::ReadOnly
}

pub(crate) const fn default_symlink_limit() -> u32 {
    DEFAULT_SYMLINK_LIMIT
}

pub(crate) fn default_terminate_wait_ms() -> u64 {
    u64::try_from(DEFAULT_TERMINATE_WAIT.as_millis()).unwrap_or(u64::MAX)
}

pub(crate) fn default_terminate_kill_ms() -> u64 {
    u64::try_from(DEFAULT_TERMINATE_KILL.as_millis()).unwrap_or(u64::MAX)
}
